//! SFU Configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// STUN/TURN server handed to every transport session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// SFU configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfuConfig {
    /// ICE servers used for connectivity discovery
    pub ice_servers: Vec<IceServer>,
    /// Upper bound for one offer/answer exchange (seconds, 0 = unlimited)
    pub negotiation_timeout_secs: u64,
    /// Capacity of each endpoint's outbound message queue
    pub outbox_capacity: usize,
}

impl Default for SfuConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::stun("stun:stun.l.google.com:19302")],
            negotiation_timeout_secs: 30,
            outbox_capacity: 256,
        }
    }
}

impl SfuConfig {
    #[must_use]
    pub const fn negotiation_timeout(&self) -> Option<Duration> {
        if self.negotiation_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.negotiation_timeout_secs))
        }
    }

    /// Collect every problem instead of stopping at the first one
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (index, server) in self.ice_servers.iter().enumerate() {
            if server.urls.is_empty() {
                errors.push(format!("sfu.ice_servers[{index}] has no urls"));
            }
            for url in &server.urls {
                let known = ["stun:", "stuns:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !known {
                    errors.push(format!("sfu.ice_servers[{index}] url '{url}' is not a stun/turn url"));
                }
            }
        }

        if self.outbox_capacity == 0 {
            errors.push("sfu.outbox_capacity must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
