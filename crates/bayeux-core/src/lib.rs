//! # bayeux-core
//!
//! Server-side protocol engine for Bayeux publish/subscribe messaging.
//!
//! This crate provides the building blocks a transport hosts:
//!
//! - **Engine** - Meta-channel state machine and publish fan-out
//! - **ChannelRegistry** - Trie of subscription patterns with `*` and `**` wildcards
//! - **Connection** - Per-client event queue and long-poll rendezvous
//! - **ProtocolError** - Bayeux advisory error codes
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────────┐
//! │  Transport  │────▶│   Engine    │────▶│ ChannelRegistry │
//! └─────────────┘     └─────────────┘     └─────────────────┘
//!                            │
//!                            ▼
//!                     ┌─────────────┐
//!                     │ Connection  │
//!                     └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use bayeux_core::{Engine, Message};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = Engine::new();
//!
//! let mut handshake = Message::new("/meta/handshake");
//! handshake.version = Some("1.0".into());
//! handshake.supported_connection_types = Some(vec!["long-polling".into()]);
//!
//! let responses = engine.handle(handshake).await;
//! assert!(responses[0].is_successful());
//! assert!(responses[0].client_id.is_some());
//! # });
//! ```

pub mod channel;
pub mod connection;
pub mod engine;
pub mod error;
pub mod message;

pub use channel::ChannelRegistry;
pub use connection::{Connection, Polled, Waiter};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::ProtocolError;
pub use message::{ClientId, Message};
