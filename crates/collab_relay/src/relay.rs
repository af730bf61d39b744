//! Room-scoped update relay
//!
//! `Relay` is the lifecycle object the transport drives. Every socket task
//! reports its events through [`Relay::dispatch`], which maps them onto the
//! three relay operations: connect, message and disconnect.
//!
//! Payloads are never inspected. An update from one connection is queued,
//! unchanged, onto the outbound queue of every other open connection in the
//! same room. Each queue is FIFO and drained by a single writer, which keeps
//! one sender's updates in order for every recipient.
//!
//! An open peer whose queue rejects an update is closed on the spot. Its
//! replica would otherwise carry a silent gap; closing it makes the client
//! reconnect and resynchronize through its own handshake.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connection::{ConnectionState, PeerHandle, UpdateMessage};
use crate::error::RelayError;
use crate::metrics::METRICS;
use crate::room::{RoomRegistry, RoomSummary};

/// Lifecycle events reported by the transport for one connection
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Handshake completed
    Opened,
    /// A data frame arrived
    Message(UpdateMessage),
    /// Socket closed, errored, or the server is shutting down
    Closed { reason: CloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    ClientClosed,
    TransportError,
    /// The relay could not queue an update for this peer
    DeliveryFailed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::DeliveryFailed => "delivery_failed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Queued to an open peer
    pub delivered: usize,
    /// Peer was not open; silently passed over
    pub skipped: usize,
    /// Peer was open but its queue rejected the update; the peer was closed
    pub failed: usize,
}

pub struct Relay {
    config: Arc<Config>,
    rooms: RoomRegistry,
    started_at: Instant,
}

impl Relay {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            rooms: RoomRegistry::new(),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Map a requested room onto a room name. Missing or empty selects the
    /// default room.
    pub fn resolve_room(&self, requested: Option<&str>) -> String {
        match requested {
            Some(room) if !room.is_empty() => room.to_string(),
            _ => self.config.default_room.clone(),
        }
    }

    /// Create the relay side of a new connection in the `Connecting` state.
    ///
    /// The returned receiver is the connection's outbound queue; the transport
    /// drains it into the socket. The connection joins its room on `Opened`.
    pub fn connect(&self, requested_room: Option<&str>) -> (PeerHandle, mpsc::Receiver<UpdateMessage>) {
        let room = self.resolve_room(requested_room);
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_capacity);
        (PeerHandle::new(room, tx), rx)
    }

    /// Single entry point for connection lifecycle events
    pub fn dispatch(&self, peer: &PeerHandle, event: ConnectionEvent) -> Option<DeliveryReport> {
        match event {
            ConnectionEvent::Opened => {
                self.on_connect(peer);
                None
            }
            ConnectionEvent::Message(update) => Some(self.on_message(peer, update)),
            ConnectionEvent::Closed { reason } => {
                self.on_disconnect(peer, reason);
                None
            }
        }
    }

    /// Register the connection in its room. Only a connecting peer can open;
    /// anything else is ignored.
    pub fn on_connect(&self, peer: &PeerHandle) {
        if !peer.state_cell().open() {
            debug!(connection = %peer.id(), state = ?peer.state(), "Ignoring open for non-connecting peer");
            return;
        }

        let outcome = self.rooms.join(peer.clone());

        if outcome.room_created {
            debug!(room = %peer.room(), "Room created");
        }

        METRICS.connections_total.inc();
        self.refresh_gauges();

        info!(
            connection = %peer.id(),
            room = %peer.room(),
            members = outcome.members,
            "🔌 Client connected"
        );
    }

    /// Fan an update out to every other open member of the sender's room
    pub fn on_message(&self, peer: &PeerHandle, update: UpdateMessage) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        if peer.state() != ConnectionState::Open {
            debug!(connection = %peer.id(), "Dropping update from connection that is not open");
            return report;
        }

        METRICS
            .messages_received
            .with_label_values(&[update.kind()])
            .inc();

        let bytes = update.len();

        for target in self.rooms.peers_except(peer.room(), peer.id()) {
            if target.state() != ConnectionState::Open {
                report.skipped += 1;
                METRICS.deliveries_skipped.with_label_values(&["not_open"]).inc();
                continue;
            }

            match target.try_deliver(update.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    METRICS.deliveries_total.inc();
                    METRICS.relay_bytes_total.inc_by(bytes as f64);
                }
                Err(reason) => {
                    report.failed += 1;
                    METRICS
                        .deliveries_skipped
                        .with_label_values(&[reason.as_label()])
                        .inc();

                    let err = RelayError::PeerSend {
                        connection: target.id(),
                        reason,
                    };
                    warn!(room = %peer.room(), from = %peer.id(), error = %err, "Delivery failed, closing peer");

                    self.on_disconnect(&target, CloseReason::DeliveryFailed);
                }
            }
        }

        debug!(
            connection = %peer.id(),
            room = %peer.room(),
            bytes,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Relayed update"
        );

        report
    }

    /// Remove the connection from its room. Safe to call more than once.
    pub fn on_disconnect(&self, peer: &PeerHandle, reason: CloseReason) {
        let was_open = peer.state() == ConnectionState::Open;
        if !peer.state_cell().close() {
            return;
        }

        let outcome = self.rooms.leave(peer.room(), peer.id());
        self.refresh_gauges();

        if outcome.room_discarded {
            debug!(room = %peer.room(), "Room discarded");
        }

        if was_open {
            info!(
                connection = %peer.id(),
                room = %peer.room(),
                reason = reason.as_str(),
                remaining = outcome.remaining,
                "👋 Client disconnected"
            );
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.room_count()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.connection_count()
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.member_count(room)
    }

    pub fn rooms(&self) -> Vec<RoomSummary> {
        self.rooms.summaries()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    fn refresh_gauges(&self) {
        METRICS.connections_active.set(self.rooms.connection_count() as f64);
        METRICS.rooms_active.set(self.rooms.room_count() as f64);
    }
}
