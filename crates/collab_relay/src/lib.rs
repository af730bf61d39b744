//! # Collab Relay - room-scoped update relay for collaborative editing
//!
//! Clients editing the same document open a WebSocket to
//! `ws://host:port/<document>` and send opaque update frames produced by their
//! CRDT library. The relay forwards each frame, byte-for-byte, to every other
//! open connection in the same room and to nobody else. It keeps no document
//! state; a restarted relay is resynchronized by the clients themselves.
//!
//! ## Quick Start
//!
//! ```bash
//! # Listen on 0.0.0.0:1234
//! cargo run --bin collab-relay
//!
//! # Custom port and JSON logs
//! cargo run --bin collab-relay -- --port 9000 --log-format json
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Configuration management
//! - [`logging`] - Tracing setup and console status output
//! - [`connection`] - Connection identity, lifecycle and update payloads
//! - [`room`] - Room membership registry
//! - [`relay`] - Connect/message/disconnect handling and fan-out
//! - [`server`] - Axum WebSocket transport, health and metrics routes
//! - [`client`] - Minimal client with connection status
//! - [`metrics`] - Prometheus metrics
//! - [`health`] - Health endpoint payload
//! - [`shutdown`] - Graceful shutdown coordination

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod relay;
pub mod room;
pub mod server;
pub mod shutdown;

// Re-export commonly used types
pub use client::{ConnectionStatus, RelayClient};
pub use config::Config;
pub use connection::{ConnectionId, ConnectionState, PeerHandle, UpdateMessage};
pub use error::{PeerSendFailure, RelayError};
pub use metrics::METRICS;
pub use relay::{CloseReason, ConnectionEvent, DeliveryReport, Relay};
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
