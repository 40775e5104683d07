//! The Bayeux protocol engine.
//!
//! The engine owns the client map and the channel registry. It answers meta
//! messages, fans published messages out to matching subscribers and holds
//! `/meta/connect` requests open until events are available.

use crate::channel::{self, meta, ChannelRegistry};
use crate::connection::{Connection, Polled};
use crate::error::ProtocolError;
use crate::message::{entry_pattern, subscription_entries, ClientId, Message};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Engine configuration chosen by the hosting transport.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Protocol version reported by the handshake.
    pub version: String,
    /// Connection types the server supports.
    pub connection_types: Vec<String>,
    /// How long a connect is held open without events.
    pub poll_timeout: Duration,
    /// Delay clients are advised to wait before reconnecting.
    pub interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            connection_types: [
                "long-polling",
                "cross-origin-long-polling",
                "callback-polling",
                "websocket",
                "in-process",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            poll_timeout: Duration::from_secs(60),
            interval: Duration::ZERO,
        }
    }
}

/// Engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of live clients.
    pub client_count: usize,
    /// Number of patterns with at least one subscriber.
    pub pattern_count: usize,
    /// Total number of subscriptions.
    pub subscription_count: usize,
}

/// Outcome of dispatching one message.
enum Dispatch {
    Immediate(Vec<Message>),
    Suspended(BoxFuture<'static, Vec<Message>>),
}

/// The protocol engine.
pub struct Engine {
    /// Live clients by id.
    clients: DashMap<ClientId, Arc<Connection>>,
    /// Subscription patterns.
    channels: RwLock<ChannelRegistry>,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create an engine with custom configuration.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        info!("Creating engine with config: {:?}", config);
        Self {
            clients: DashMap::new(),
            channels: RwLock::new(ChannelRegistry::new()),
            config,
        }
    }

    /// Get the engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Process a batch of messages.
    ///
    /// Every message is dispatched before any connect is awaited. Responses
    /// to messages that complete immediately come first, in submission order;
    /// a connect that finds events already queued completes immediately too.
    /// Each suspended connect contributes its response followed by its
    /// events once it resolves, in completion order.
    pub async fn process(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut responses = Vec::with_capacity(messages.len());
        let mut suspended = FuturesUnordered::new();

        for message in messages {
            match self.dispatch(message) {
                Dispatch::Immediate(batch) => responses.extend(batch),
                Dispatch::Suspended(poll) => suspended.push(poll),
            }
        }

        while let Some(batch) = suspended.next().await {
            responses.extend(batch);
        }
        responses
    }

    /// Process a single message.
    pub async fn handle(&self, message: Message) -> Vec<Message> {
        self.process(vec![message]).await
    }

    fn dispatch(&self, message: Message) -> Dispatch {
        if !channel::is_meta(&message.channel) {
            return Dispatch::Immediate(vec![self.publish(message)]);
        }

        let response = match message.channel.as_str() {
            meta::HANDSHAKE => self.handshake(&message),
            meta::CONNECT => return self.connect(&message),
            meta::DISCONNECT => self.disconnect(&message),
            meta::SUBSCRIBE => self.subscribe(&message),
            meta::UNSUBSCRIBE => self.unsubscribe(&message),
            other => {
                debug!(channel = %other, "Unknown meta channel");
                let mut response = message.reply();
                response.settle(Some(ProtocolError::ChannelUnknown(other.to_string())));
                response
            }
        };
        Dispatch::Immediate(vec![response])
    }

    fn advice(&self) -> Value {
        json!({
            "reconnect": "retry",
            "interval": self.config.interval.as_millis() as u64,
            "timeout": self.config.poll_timeout.as_millis() as u64,
        })
    }

    /// Get the connection for a client id.
    #[must_use]
    pub fn connection(&self, client_id: &str) -> Option<Arc<Connection>> {
        self.clients.get(client_id).map(|c| Arc::clone(c.value()))
    }

    fn require_client(&self, client_id: Option<&str>) -> Result<Arc<Connection>, ProtocolError> {
        let id = client_id.ok_or(ProtocolError::ParameterMissing("clientId"))?;
        self.connection(id)
            .ok_or_else(|| ProtocolError::ClientUnknown(id.to_string()))
    }

    fn create_client(&self) -> ClientId {
        loop {
            let id = Uuid::new_v4().simple().to_string();
            if let Entry::Vacant(slot) = self.clients.entry(id.clone()) {
                slot.insert(Arc::new(Connection::new(id.clone())));
                return id;
            }
        }
    }

    fn handshake(&self, message: &Message) -> Message {
        let mut response = message.reply();
        response.version = Some(self.config.version.clone());
        response.supported_connection_types = Some(self.config.connection_types.clone());

        let error = match &message.supported_connection_types {
            None => Some(ProtocolError::ParameterMissing("supportedConnectionTypes")),
            Some(offered)
                if !offered
                    .iter()
                    .any(|t| self.config.connection_types.contains(t)) =>
            {
                Some(ProtocolError::ConntypeMismatch(offered.clone()))
            }
            Some(_) if message.version.is_none() => {
                Some(ProtocolError::ParameterMissing("version"))
            }
            Some(_) => None,
        };

        if let Some(error) = error {
            warn!(code = error.code(), error = %error, "Handshake rejected");
            response.settle(Some(error));
            return response;
        }

        let client_id = self.create_client();
        info!(client = %client_id, "Client handshaken");
        response.client_id = Some(client_id);
        response.advice = Some(self.advice());
        response.settle(None);
        response
    }

    fn connect(&self, message: &Message) -> Dispatch {
        let mut response = message.reply();

        let client = match message
            .connection_type
            .as_ref()
            .ok_or(ProtocolError::ParameterMissing("connectionType"))
            .and_then(|_| self.require_client(message.client_id.as_deref()))
        {
            Ok(client) => client,
            Err(error) => {
                debug!(code = error.code(), error = %error, "Connect rejected");
                response.settle(Some(error));
                return Dispatch::Immediate(vec![response]);
            }
        };

        response.client_id = Some(client.id().to_string());
        response.advice = Some(self.advice());
        response.settle(None);

        let waiter = match client.try_poll() {
            Polled::Ready(events) => {
                debug!(client = %client.id(), events = events.len(), "Connect answered from queue");
                return Dispatch::Immediate(connect_batch(response, events));
            }
            Polled::Waiting(waiter) => waiter,
        };

        let timeout = self.config.poll_timeout;
        Dispatch::Suspended(Box::pin(async move {
            let events = waiter.wait(timeout).await;
            debug!(client = %client.id(), events = events.len(), "Connect resolved");
            connect_batch(response, events)
        }))
    }

    fn disconnect(&self, message: &Message) -> Message {
        let mut response = message.reply();

        let client = match self.require_client(message.client_id.as_deref()) {
            Ok(client) => client,
            Err(error) => {
                debug!(code = error.code(), error = %error, "Disconnect rejected");
                response.settle(Some(error));
                return response;
            }
        };

        self.destroy_client(&client);
        info!(client = %client.id(), "Client disconnected");

        response.client_id = Some(client.id().to_string());
        response.settle(None);
        response
    }

    fn destroy_client(&self, client: &Connection) {
        self.clients.remove(client.id());
        let mut registry = self.channels.write();
        for pattern in client.disconnect() {
            registry.unregister(&pattern, client.id());
        }
    }

    fn subscribe(&self, message: &Message) -> Message {
        let mut response = message.reply();
        response.client_id = message.client_id.clone();

        let Some(entries) = subscription_entries(message.subscription.as_ref()) else {
            response.settle(Some(ProtocolError::ParameterMissing("subscription")));
            return response;
        };
        response.subscription = Some(Value::Array(entries.clone()));

        let client = match self.require_client(message.client_id.as_deref()) {
            Ok(client) => client,
            Err(error) => {
                debug!(code = error.code(), error = %error, "Subscribe rejected");
                response.settle(Some(error));
                return response;
            }
        };

        let mut first_error = None;
        let mut registry = self.channels.write();
        for entry in &entries {
            let pattern = match subscribable_pattern(entry) {
                Ok(pattern) => pattern,
                Err(error) => {
                    debug!(client = %client.id(), code = error.code(), error = %error, "Subscription refused");
                    first_error.get_or_insert(error);
                    continue;
                }
            };
            if client.add_subscription(pattern) {
                registry.register(pattern, client.id());
                debug!(client = %client.id(), pattern = %pattern, "Subscribed");
            }
        }
        drop(registry);

        response.settle(first_error);
        response
    }

    fn unsubscribe(&self, message: &Message) -> Message {
        let mut response = message.reply();
        response.client_id = message.client_id.clone();

        let Some(entries) = subscription_entries(message.subscription.as_ref()) else {
            response.settle(Some(ProtocolError::ParameterMissing("subscription")));
            return response;
        };
        response.subscription = Some(Value::Array(entries.clone()));

        let client = match self.require_client(message.client_id.as_deref()) {
            Ok(client) => client,
            Err(error) => {
                debug!(code = error.code(), error = %error, "Unsubscribe rejected");
                response.settle(Some(error));
                return response;
            }
        };

        let mut first_error = None;
        let mut registry = self.channels.write();
        for entry in &entries {
            let pattern = match entry_pattern(entry) {
                Ok(pattern) if channel::is_valid(pattern) => pattern,
                Ok(pattern) => {
                    first_error.get_or_insert(ProtocolError::ChannelInvalid(pattern.to_string()));
                    continue;
                }
                Err(error) => {
                    first_error.get_or_insert(error);
                    continue;
                }
            };
            if client.remove_subscription(pattern) {
                registry.unregister(pattern, client.id());
                debug!(client = %client.id(), pattern = %pattern, "Unsubscribed");
            }
        }
        drop(registry);

        response.settle(first_error);
        response
    }

    fn publish(&self, message: Message) -> Message {
        let mut response = message.reply();

        if message.client_id.is_none() || channel::is_service(&message.channel) {
            response.settle(None);
            return response;
        }
        if !channel::is_concrete(&message.channel) {
            response.settle(Some(ProtocolError::ChannelInvalid(message.channel.clone())));
            return response;
        }

        let recipients = self.channels.read().matching_subscribers(&message.channel);
        let delivered = recipients
            .iter()
            .filter_map(|id| self.connection(id))
            .filter(|client| client.deliver(message.clone()))
            .count();
        trace!(channel = %message.channel, recipients = delivered, "Published message");

        response.settle(None);
        response
    }

    /// Ids of all live clients.
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|c| c.key().clone()).collect()
    }

    /// Get engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let registry = self.channels.read();
        EngineStats {
            client_count: self.clients.len(),
            pattern_count: registry.pattern_count(),
            subscription_count: registry.subscription_count(),
        }
    }

    /// Disconnect every client.
    ///
    /// Pending polls resolve immediately with no events.
    pub fn destroy(&self) {
        let mut registry = self.channels.write();
        let ids = self.client_ids();
        for id in &ids {
            if let Some((_, client)) = self.clients.remove(id) {
                client.disconnect();
            }
        }
        registry.clear();
        info!(clients = ids.len(), "Engine destroyed");
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// A connect response followed by the events it hands out.
fn connect_batch(response: Message, events: Vec<Message>) -> Vec<Message> {
    let mut batch = Vec::with_capacity(events.len() + 1);
    batch.push(response);
    batch.extend(events);
    batch
}

/// Validate a subscription entry for subscribing.
fn subscribable_pattern(entry: &Value) -> Result<&str, ProtocolError> {
    let pattern = entry_pattern(entry)?;
    if !channel::is_valid(pattern) {
        return Err(ProtocolError::ChannelInvalid(pattern.to_string()));
    }
    if !channel::is_subscribable(pattern) {
        return Err(ProtocolError::ChannelForbidden(pattern.to_string()));
    }
    Ok(pattern)
}
