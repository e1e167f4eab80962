//! Publish Negotiator: ingest sessions for endpoints pushing media in

use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};

use crate::directory::RoomDirectory;
use crate::engine::{MediaConstraints, SessionEvents, TransportEngine};
use crate::error::{Phase, PhaseExt, SignalError};
use crate::hub::Outbox;
use crate::protocol::{ServerMessage, SessionDescription};
use crate::registry::SessionRegistry;
use crate::session::{settle, within, SessionHandle};
use crate::types::{EndpointId, SessionId, SessionKey};

pub struct PublishNegotiator {
    registry: Arc<SessionRegistry>,
    directory: Arc<RoomDirectory>,
    outbox: Arc<dyn Outbox>,
    engine: Arc<dyn TransportEngine>,
    timeout: Option<Duration>,
}

impl PublishNegotiator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        directory: Arc<RoomDirectory>,
        outbox: Arc<dyn Outbox>,
        engine: Arc<dyn TransportEngine>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            directory,
            outbox,
            engine,
            timeout,
        }
    }

    /// Announce the intent to publish. Re-announcing keeps the existing record.
    pub fn register(&self, id: &EndpointId) -> bool {
        self.registry.register_publisher(id)
    }

    /// Answer a publisher's offer with a receive-all ingest session.
    ///
    /// A session from an earlier attempt is replaced and closed. If the
    /// publisher goes away while the engine is working, the new session is
    /// closed and nothing is sent.
    pub async fn negotiate(&self, id: &EndpointId, offer: SessionDescription) -> Result<(), SignalError> {
        offer.expect_offer()?;
        self.registry.register_publisher(id);

        let key = SessionKey::Publish(id.clone());
        let session_id = SessionId::generate();
        let transport = self
            .engine
            .create_session(&key, self.events(id, &session_id))
            .await
            .phase(Phase::CreateSession)?;
        let session = SessionHandle::new(session_id, key, transport);

        let stale = match self.registry.attach_publisher_session(id, Arc::clone(&session)) {
            Ok(stale) => stale,
            Err(e) => {
                debug!(endpoint_id = %id, error = %e, "Publisher left before its session was ready");
                session.close().await;
                return Ok(());
            }
        };
        if let Some(stale) = stale {
            debug!(endpoint_id = %id, session_id = %stale.id(), "Replacing earlier publish session");
            stale.close().await;
        }

        let outcome = within(
            self.timeout,
            session.answer(offer, MediaConstraints::receive_all()),
        )
        .await;

        let Some(answer) = settle(&self.registry, &session, outcome).await? else {
            return Ok(());
        };

        self.outbox
            .deliver(id, ServerMessage::PublishAnswer { description: answer });
        info!(endpoint_id = %id, session_id = %session.id(), "Publish session negotiated");
        Ok(())
    }

    /// Engine callbacks for one publish session. They hold weak references so
    /// a session never keeps the registry alive.
    fn events(&self, id: &EndpointId, session_id: &SessionId) -> SessionEvents {
        let outbox = Arc::downgrade(&self.outbox);
        let candidate_to = id.clone();

        let registry: Weak<SessionRegistry> = Arc::downgrade(&self.registry);
        let directory: Weak<RoomDirectory> = Arc::downgrade(&self.directory);
        let publisher = id.clone();
        let session_id = session_id.clone();

        SessionEvents::new(
            move |candidate| {
                if let Some(outbox) = outbox.upgrade() {
                    outbox.deliver(&candidate_to, ServerMessage::PublishCandidateRelay { candidate });
                }
            },
            move |track| {
                let (Some(registry), Some(directory)) = (registry.upgrade(), directory.upgrade()) else {
                    return;
                };
                match registry.record_inbound_track(&publisher, &session_id, track) {
                    Ok(()) => {
                        directory.announce_publisher(&publisher);
                    }
                    Err(e) => {
                        debug!(endpoint_id = %publisher, error = %e, "Dropped track from an abandoned session");
                    }
                }
            },
        )
    }
}
