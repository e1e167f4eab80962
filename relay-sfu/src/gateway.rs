//! Signaling Gateway: entry point for inbound frames and disconnects

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::candidate::CandidateRelay;
use crate::config::SfuConfig;
use crate::directory::RoomDirectory;
use crate::engine::TransportEngine;
use crate::error::SignalError;
use crate::hub::{ConnectionHub, Outbox};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::publish::PublishNegotiator;
use crate::registry::SessionRegistry;
use crate::subscribe::SubscribeNegotiator;
use crate::types::{EndpointId, SessionKey};

/// Point-in-time counters for health reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    pub publishers: usize,
    pub subscriptions: usize,
    pub viewers: usize,
    pub connections: usize,
}

/// Owns every relay component for the lifetime of the process.
///
/// Frames are handled one at a time per endpoint (the transport hands them
/// to [`handle_frame`](Self::handle_frame) in arrival order) and
/// concurrently across endpoints. [`disconnect`](Self::disconnect) may run
/// while one of the endpoint's handlers is suspended; the handler then
/// finds its records gone and stops without replying. No failure inside a handler escapes it:
/// the endpoint receives one `error` frame and everyone else is unaffected.
pub struct SignalingGateway {
    config: SfuConfig,
    registry: Arc<SessionRegistry>,
    hub: Arc<ConnectionHub>,
    directory: Arc<RoomDirectory>,
    publisher: PublishNegotiator,
    subscriber: SubscribeNegotiator,
    candidates: CandidateRelay,
}

impl SignalingGateway {
    pub fn new(config: SfuConfig, engine: Arc<dyn TransportEngine>) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let hub = Arc::new(ConnectionHub::new(config.outbox_capacity));
        let outbox: Arc<dyn Outbox> = hub.clone();
        let directory = Arc::new(RoomDirectory::new(Arc::clone(&registry), Arc::clone(&outbox)));
        let timeout = config.negotiation_timeout();

        let publisher = PublishNegotiator::new(
            Arc::clone(&registry),
            Arc::clone(&directory),
            Arc::clone(&outbox),
            Arc::clone(&engine),
            timeout,
        );
        let subscriber = SubscribeNegotiator::new(Arc::clone(&registry), outbox, engine, timeout);
        let candidates = CandidateRelay::new(Arc::clone(&registry));

        info!(
            negotiation_timeout = ?timeout,
            outbox_capacity = config.outbox_capacity,
            "Signaling gateway created"
        );

        Arc::new(Self {
            config,
            registry,
            hub,
            directory,
            publisher,
            subscriber,
            candidates,
        })
    }

    /// Open a connection under a freshly generated identity
    pub fn connect(&self) -> (EndpointId, mpsc::Receiver<ServerMessage>) {
        let id = EndpointId::generate();
        let rx = self.attach(id.clone());
        (id, rx)
    }

    /// Open a connection under `id`.
    ///
    /// The first frame in the returned outbox is `connected`, carrying the
    /// identity. Endpoints wait for it instead of polling for readiness.
    pub fn attach(&self, id: EndpointId) -> mpsc::Receiver<ServerMessage> {
        let rx = self.hub.connect(id.clone());
        self.hub.deliver(&id, ServerMessage::Connected { id: id.clone() });
        rx
    }

    /// Decode and handle one text frame from `from`.
    ///
    /// Frames that reach the gateway after `from` disconnected are dropped,
    /// so nothing is registered for an endpoint that is already gone.
    pub async fn handle_frame(&self, from: &EndpointId, text: &str) {
        if !self.hub.is_connected(from) {
            debug!(endpoint_id = %from, "Dropping frame from disconnected endpoint");
            return;
        }
        match ClientMessage::decode(text) {
            Ok(message) => self.handle(from, message).await,
            Err(e) => {
                let event = serde_json::from_str::<serde_json::Value>(text)
                    .ok()
                    .and_then(|frame| frame.get("event")?.as_str().map(str::to_string))
                    .unwrap_or_else(|| "message".to_string());
                self.report(from, &event, &e);
            }
        }
    }

    pub async fn handle(&self, from: &EndpointId, message: ClientMessage) {
        let event = message.event();
        debug!(endpoint_id = %from, event, "Handling message");
        if let Err(e) = self.dispatch(from, message).await {
            self.report(from, event, &e);
        }
    }

    async fn dispatch(&self, from: &EndpointId, message: ClientMessage) -> Result<(), SignalError> {
        match message {
            ClientMessage::PublishIntent(intent) => {
                ensure_self(from, &intent.endpoint_id, "endpointId")?;
                self.publisher.register(from);
                Ok(())
            }
            ClientMessage::PublishOffer(offer) => {
                ensure_self(from, &offer.sender_id, "senderId")?;
                self.publisher.negotiate(from, offer.description).await
            }
            ClientMessage::PublishCandidate(body) => {
                ensure_self(from, &body.sender_id, "senderId")?;
                self.candidates
                    .relay(&SessionKey::Publish(from.clone()), body.candidate)
                    .await
            }
            ClientMessage::ViewJoin(_) => {
                self.directory.join(from);
                Ok(())
            }
            ClientMessage::SubscribeOffer(offer) => {
                ensure_self(from, &offer.viewer_id, "viewerId")?;
                self.subscriber
                    .negotiate(from, &offer.target_id, offer.description)
                    .await
            }
            ClientMessage::SubscribeCandidate(body) => {
                ensure_self(from, &body.viewer_id, "viewerId")?;
                let key = SessionKey::Subscribe {
                    viewer: from.clone(),
                    target: body.target_id,
                };
                self.candidates.relay(&key, body.candidate).await
            }
        }
    }

    fn report(&self, to: &EndpointId, event: &str, error: &SignalError) {
        warn!(endpoint_id = %to, event, error = %error, "Failed to handle message");
        self.hub.deliver(
            to,
            ServerMessage::Error {
                message: format!("Failed to handle {event}: {error}"),
            },
        );
    }

    /// Tear down everything `id` takes part in.
    ///
    /// Removes its publisher record, the subscriptions it holds as a viewer
    /// and every subscription targeting it, then closes each session once.
    /// Members that knew it as a publisher receive `publisher-left`. Safe to
    /// call more than once.
    pub async fn disconnect(&self, id: &EndpointId) {
        let was_connected = self.hub.disconnect(id);
        let was_member = self.directory.leave(id);
        let eviction = self.registry.evict(id);
        if !was_connected && !was_member && eviction.is_empty() {
            debug!(endpoint_id = %id, "Endpoint already disconnected");
            return;
        }

        let notified = if eviction.publisher.is_some() {
            self.directory.forget_publisher(id)
        } else {
            0
        };

        let sessions = eviction.sessions();
        let mut closed = 0;
        for session in &sessions {
            if session.close().await {
                closed += 1;
            }
        }

        if let Some(record) = &eviction.publisher {
            debug!(
                endpoint_id = %record.id(),
                tracks = record.tracks().len(),
                had_session = record.session().is_some(),
                published_secs = (Utc::now() - record.registered_at()).num_seconds(),
                "Publisher removed"
            );
        }
        info!(
            endpoint_id = %id,
            was_publisher = eviction.publisher.is_some(),
            was_member,
            viewing = eviction.viewing.len(),
            targeted = eviction.targeted.len(),
            closed,
            notified,
            "Endpoint disconnected"
        );
    }

    /// Close every session the relay holds. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let sessions = self.registry.drain();
        let mut closed = 0;
        for session in &sessions {
            if session.close().await {
                closed += 1;
            }
        }
        info!(closed, "Signaling gateway shut down");
        closed
    }

    #[must_use]
    pub fn stats(&self) -> RelayStats {
        RelayStats {
            publishers: self.registry.publisher_count(),
            subscriptions: self.registry.subscription_count(),
            viewers: self.directory.member_count(),
            connections: self.hub.connection_count(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SfuConfig {
        &self.config
    }

    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }
}

/// Identities in a payload must be the sender's own
fn ensure_self(from: &EndpointId, claimed: &EndpointId, field: &str) -> Result<(), SignalError> {
    if from != claimed {
        return Err(SignalError::Malformed(format!(
            "{field} {claimed} does not match connection {from}"
        )));
    }
    Ok(())
}
