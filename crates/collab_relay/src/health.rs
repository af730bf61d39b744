use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::relay::Relay;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub rooms: usize,
    pub connections: usize,
}

pub struct HealthChecker {
    relay: Arc<Relay>,
}

impl HealthChecker {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }

    /// The relay holds no external dependencies, so it is healthy whenever it
    /// can answer.
    pub fn check_health(&self) -> HealthStatus {
        HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
            uptime_secs: self.relay.uptime_secs(),
            rooms: self.relay.room_count(),
            connections: self.relay.connection_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::relay::ConnectionEvent;

    #[test]
    fn test_health_reports_counts() {
        let relay = Arc::new(Relay::new(Arc::new(Config::default())));
        let checker = HealthChecker::new(relay.clone());

        let status = checker.check_health();
        assert_eq!(status.status, "healthy");
        assert_eq!(status.connections, 0);

        let (peer, _rx) = relay.connect(Some("doc-1"));
        relay.dispatch(&peer, ConnectionEvent::Opened);

        let status = checker.check_health();
        assert_eq!(status.rooms, 1);
        assert_eq!(status.connections, 1);
    }
}
