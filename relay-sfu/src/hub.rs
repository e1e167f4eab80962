//! In-process message channel: one bounded outbox per connected endpoint

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::DeliveryError;
use crate::protocol::ServerMessage;
use crate::types::EndpointId;

/// Outbound side of the message channel as seen by the signaling core
pub trait Outbox: Send + Sync {
    /// Queue `message` for `to` without waiting
    fn send(&self, to: &EndpointId, message: ServerMessage) -> Result<(), DeliveryError>;

    /// Send and log a failed delivery; the caller's work is unaffected
    fn deliver(&self, to: &EndpointId, message: ServerMessage) {
        let event = message.event();
        if let Err(e) = self.send(to, message) {
            warn!(endpoint_id = %to, event, error = %e, "Dropped outbound message");
        }
    }
}

/// Routes outbound messages to connected endpoints
pub struct ConnectionHub {
    connections: DashMap<EndpointId, mpsc::Sender<ServerMessage>>,
    capacity: usize,
}

impl ConnectionHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Register an endpoint and hand back the receiving end of its outbox.
    /// A second registration for the same id replaces the first.
    pub fn connect(&self, id: EndpointId) -> mpsc::Receiver<ServerMessage> {
        let (tx, rx) = mpsc::channel(self.capacity);
        if self.connections.insert(id.clone(), tx).is_some() {
            warn!(endpoint_id = %id, "Replaced an existing connection with the same id");
        }
        info!(endpoint_id = %id, total = self.connections.len(), "Endpoint connected");
        rx
    }

    /// Drop the endpoint's outbox; its receiver drains and then ends
    pub fn disconnect(&self, id: &EndpointId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(endpoint_id = %id, total = self.connections.len(), "Endpoint outbox removed");
        }
        removed
    }

    #[must_use]
    pub fn is_connected(&self, id: &EndpointId) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Outbox for ConnectionHub {
    fn send(&self, to: &EndpointId, message: ServerMessage) -> Result<(), DeliveryError> {
        let sender = self
            .connections
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DeliveryError::NotConnected(to.clone()))?;

        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full(to.clone()),
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed(to.clone()),
        })
    }
}
