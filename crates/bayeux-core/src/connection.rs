//! Per-client mailbox and long-poll rendezvous.
//!
//! Each handshaken client owns a [`Connection`]. Published events are queued
//! on it and handed out in batches to at most one outstanding poll. A poll
//! waits until an event arrives, the poll timeout elapses, or the client is
//! disconnected, whichever comes first.

use crate::message::{ClientId, Message};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time;
use tracing::debug;

/// A suspended poll waiting for events.
#[derive(Debug)]
struct PendingPoll {
    ticket: u64,
    sender: oneshot::Sender<Vec<Message>>,
}

impl PendingPoll {
    /// Resolve the poll with no events.
    fn release(self) {
        let _ = self.sender.send(Vec::new());
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    queue: Vec<Message>,
    subscriptions: HashSet<String>,
    pending: Option<PendingPoll>,
    closed: bool,
    next_ticket: u64,
}

impl ConnectionState {
    /// Hand the whole queue to the pending poll, if there is one.
    ///
    /// Returns the number of events handed over.
    fn flush(&mut self) -> Option<usize> {
        let pending = self.pending.take()?;
        let events = std::mem::take(&mut self.queue);
        let count = events.len();
        match pending.sender.send(events) {
            Ok(()) => Some(count),
            // The poll was abandoned by its transport.
            Err(events) => {
                self.queue = events;
                None
            }
        }
    }
}

/// Outcome of [`Connection::try_poll`].
#[derive(Debug)]
pub enum Polled {
    /// Events were queued (or the connection is closed) and are returned now.
    Ready(Vec<Message>),
    /// The poll is registered and must be awaited.
    Waiting(Waiter),
}

/// A registered poll that has not resolved yet.
///
/// Dropping a waiter that was already handed events puts them back at the
/// front of the queue.
#[derive(Debug)]
pub struct Waiter {
    connection: Arc<Connection>,
    ticket: u64,
    receiver: oneshot::Receiver<Vec<Message>>,
}

impl Waiter {
    /// Wait for the next delivery, the timeout, or a disconnect.
    pub async fn wait(mut self, timeout: Duration) -> Vec<Message> {
        match time::timeout(timeout, &mut self.receiver).await {
            Ok(events) => events.unwrap_or_default(),
            Err(_) => {
                let mut state = self.connection.state.lock();
                if state.pending.as_ref().is_some_and(|p| p.ticket == self.ticket) {
                    state.pending = None;
                    drop(state);
                    debug!(client = %self.connection.id, "Poll timed out");
                    return Vec::new();
                }
                drop(state);
                // Someone resolved the poll between the timer firing and the lock.
                self.receiver.try_recv().unwrap_or_default()
            }
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut state = self.connection.state.lock();
        if state.pending.as_ref().is_some_and(|p| p.ticket == self.ticket) {
            state.pending = None;
        }

        let Ok(mut events) = self.receiver.try_recv() else {
            return;
        };
        if events.is_empty() || state.closed {
            return;
        }
        debug!(client = %self.connection.id, events = events.len(), "Requeueing undelivered events");
        events.append(&mut state.queue);
        state.queue = events;
        state.flush();
    }
}

/// A handshaken client's connection state.
#[derive(Debug)]
pub struct Connection {
    id: ClientId,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// Create a connection for a client id.
    #[must_use]
    pub fn new(id: impl Into<ClientId>) -> Self {
        Self {
            id: id.into(),
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Get the client id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Check if the connection has been disconnected.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of events waiting for a poll.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Check if a poll is currently suspended on this connection.
    #[must_use]
    pub fn has_pending_poll(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Record a subscription pattern.
    ///
    /// Returns `false` if the connection is closed or already had it.
    pub fn add_subscription(&self, pattern: &str) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.subscriptions.insert(pattern.to_string())
    }

    /// Forget a subscription pattern.
    ///
    /// Returns `true` if the pattern was recorded.
    pub fn remove_subscription(&self, pattern: &str) -> bool {
        self.state.lock().subscriptions.remove(pattern)
    }

    /// Check if a pattern is recorded for this connection.
    #[must_use]
    pub fn is_subscribed(&self, pattern: &str) -> bool {
        self.state.lock().subscriptions.contains(pattern)
    }

    /// Get the recorded subscription patterns.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<String> {
        self.state.lock().subscriptions.iter().cloned().collect()
    }

    /// Queue an event, waking the pending poll if there is one.
    ///
    /// Returns `false` if the connection is closed and the event was dropped.
    pub fn deliver(&self, event: Message) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.queue.push(event);

        if let Some(count) = state.flush() {
            debug!(client = %self.id, events = count, "Woke pending poll");
        }
        true
    }

    /// Take queued events now, or register a poll for later ones.
    ///
    /// Returns the whole queue if it is non-empty, or nothing if the
    /// connection is closed. Otherwise registers a poll, releasing any
    /// previous one with no events.
    pub fn try_poll(self: &Arc<Self>) -> Polled {
        let mut state = self.state.lock();
        if state.closed {
            return Polled::Ready(Vec::new());
        }
        if !state.queue.is_empty() {
            return Polled::Ready(std::mem::take(&mut state.queue));
        }

        if let Some(previous) = state.pending.take() {
            debug!(client = %self.id, "Releasing superseded poll");
            previous.release();
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        let (sender, receiver) = oneshot::channel();
        state.pending = Some(PendingPoll { ticket, sender });
        Polled::Waiting(Waiter {
            connection: Arc::clone(self),
            ticket,
            receiver,
        })
    }

    /// Wait for queued events.
    ///
    /// Resolves immediately with the whole queue if it is non-empty, or with
    /// nothing if the connection is closed. Otherwise suspends until the next
    /// delivery, the timeout, or a disconnect. A later poll releases this one
    /// with no events.
    pub async fn poll(self: &Arc<Self>, timeout: Duration) -> Vec<Message> {
        match self.try_poll() {
            Polled::Ready(events) => events,
            Polled::Waiting(waiter) => waiter.wait(timeout).await,
        }
    }

    /// Close the connection.
    ///
    /// Releases the pending poll, drops queued events and returns the
    /// subscription patterns so the caller can unregister them.
    pub fn disconnect(&self) -> HashSet<String> {
        let mut state = self.state.lock();
        state.closed = true;
        if let Some(pending) = state.pending.take() {
            pending.release();
        }
        state.queue.clear();
        debug!(client = %self.id, "Connection closed");
        std::mem::take(&mut state.subscriptions)
    }
}
