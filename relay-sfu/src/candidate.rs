//! Candidate Relay: endpoint candidates into the session they belong to

use std::sync::Arc;
use tracing::trace;

use crate::error::{Phase, PhaseExt, SignalError};
use crate::protocol::IceCandidate;
use crate::registry::SessionRegistry;
use crate::types::SessionKey;

pub struct CandidateRelay {
    registry: Arc<SessionRegistry>,
}

impl CandidateRelay {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Hand `candidate` to the session registered under `key`.
    ///
    /// No session under `key` is a silent no-op: candidates routinely race
    /// session setup and teardown. A candidate the engine cannot use is an
    /// error for the sender only.
    pub async fn relay(&self, key: &SessionKey, candidate: IceCandidate) -> Result<(), SignalError> {
        let Ok(session) = self.registry.get_session(key) else {
            trace!(session = %key, "No session for candidate, dropped");
            return Ok(());
        };
        session.add_candidate(candidate).await.phase(Phase::AddCandidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{SessionEvents, TransportEngine};
    use crate::protocol::SessionDescription;
    use crate::session::SessionHandle;
    use crate::testing::{candidate, FakeEngine, MALFORMED_CANDIDATE};
    use crate::types::{EndpointId, SessionId};

    async fn published(engine: &FakeEngine, registry: &SessionRegistry) -> Arc<SessionHandle> {
        let id = EndpointId::from("c1");
        let key = SessionKey::Publish(id.clone());
        registry.register_publisher(&id);
        let transport = engine
            .create_session(&key, SessionEvents::new(|_| {}, |_| {}))
            .await
            .unwrap();
        let session = SessionHandle::new(SessionId::generate(), key, transport);
        registry.attach_publisher_session(&id, Arc::clone(&session)).unwrap();
        session
    }

    #[tokio::test]
    async fn test_unknown_session_is_a_no_op() {
        let relay = CandidateRelay::new(Arc::new(SessionRegistry::new()));
        relay
            .relay(&SessionKey::subscribe("a1", "c1"), candidate("10.0.0.1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_candidate_reaches_the_addressed_session() {
        let engine = FakeEngine::new();
        let registry = Arc::new(SessionRegistry::new());
        let session = published(&engine, &registry).await;
        session.apply_remote(SessionDescription::offer("v=0")).await.unwrap();

        let relay = CandidateRelay::new(Arc::clone(&registry));
        relay
            .relay(&SessionKey::Publish("c1".into()), candidate("10.0.0.1"))
            .await
            .unwrap();

        assert_eq!(engine.last_session().unwrap().candidates(), vec![candidate("10.0.0.1")]);
    }

    #[tokio::test]
    async fn test_malformed_candidate_is_reported() {
        let engine = FakeEngine::new();
        let registry = Arc::new(SessionRegistry::new());
        let session = published(&engine, &registry).await;
        session.apply_remote(SessionDescription::offer("v=0")).await.unwrap();

        let relay = CandidateRelay::new(registry);
        let bad = IceCandidate {
            candidate: MALFORMED_CANDIDATE.to_string(),
            ..Default::default()
        };
        let err = relay.relay(&SessionKey::Publish("c1".into()), bad).await.unwrap_err();
        assert!(matches!(err, SignalError::Engine { phase: Phase::AddCandidate, .. }));
    }
}
