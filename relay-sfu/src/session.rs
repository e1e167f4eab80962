//! Registry-owned wrapper around one engine session

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::engine::{MediaConstraints, MediaTrack, TransportSession};
use crate::error::{EngineError, Phase, PhaseExt, SignalError};
use crate::protocol::{IceCandidate, SessionDescription};
use crate::registry::SessionRegistry;
use crate::types::{SessionId, SessionKey};

/// Candidates that arrive before the remote description are held back
enum CandidateGate {
    Buffering(Vec<IceCandidate>),
    Open,
}

pub struct SessionHandle {
    id: SessionId,
    key: SessionKey,
    transport: Arc<dyn TransportSession>,
    gate: Mutex<CandidateGate>,
    closed: AtomicBool,
    created_at: DateTime<Utc>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("closed", &self.closed)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SessionHandle {
    pub fn new(id: SessionId, key: SessionKey, transport: Arc<dyn TransportSession>) -> Arc<Self> {
        Arc::new(Self {
            id,
            key,
            transport,
            gate: Mutex::new(CandidateGate::Buffering(Vec::new())),
            closed: AtomicBool::new(false),
            created_at: Utc::now(),
        })
    }

    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    #[must_use]
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Apply the remote offer, then release any candidates held back
    pub async fn apply_remote(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.transport.set_remote_description(description).await?;

        let pending = match mem::replace(&mut *self.gate.lock(), CandidateGate::Open) {
            CandidateGate::Buffering(pending) => pending,
            CandidateGate::Open => Vec::new(),
        };

        if !pending.is_empty() {
            debug!(session = %self.key, count = pending.len(), "Flushing buffered candidates");
        }
        for candidate in pending {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                warn!(session = %self.key, error = %e, "Buffered candidate rejected");
            }
        }
        Ok(())
    }

    pub async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if self.is_closed() {
            return Ok(());
        }
        {
            let mut gate = self.gate.lock();
            if let CandidateGate::Buffering(pending) = &mut *gate {
                pending.push(candidate);
                return Ok(());
            }
        }
        self.transport.add_ice_candidate(candidate).await
    }

    pub async fn create_answer(&self, constraints: MediaConstraints) -> Result<SessionDescription, EngineError> {
        self.transport.create_answer(constraints).await
    }

    pub async fn apply_local(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.transport.set_local_description(description).await
    }

    pub async fn attach(&self, track: &MediaTrack) -> Result<(), EngineError> {
        self.transport.add_track(track).await
    }

    /// Apply `offer`, then produce and apply the matching local answer
    pub(crate) async fn answer(
        &self,
        offer: SessionDescription,
        constraints: MediaConstraints,
    ) -> Result<SessionDescription, SignalError> {
        self.apply_remote(offer).await.phase(Phase::ApplyOffer)?;
        let answer = self.create_answer(constraints).await.phase(Phase::CreateAnswer)?;
        self.apply_local(answer.clone()).await.phase(Phase::ApplyAnswer)?;
        Ok(answer)
    }

    /// Close the engine session; only the first call reaches the engine
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Err(e) = self.transport.close().await {
            warn!(session = %self.key, error = %e, "Engine reported an error while closing");
        }
        debug!(
            session = %self.key,
            session_id = %self.id,
            lifetime_ms = (Utc::now() - self.created_at).num_milliseconds(),
            "Session closed"
        );
        true
    }
}

/// Run one negotiation under the configured deadline
pub(crate) async fn within<T, F>(limit: Option<Duration>, negotiation: F) -> Result<T, SignalError>
where
    F: Future<Output = Result<T, SignalError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, negotiation)
            .await
            .map_err(|_| SignalError::Timeout(limit))?,
        None => negotiation.await,
    }
}

/// Resolve a finished negotiation against the registry.
///
/// A session that is no longer the registered one was superseded or torn
/// down while the negotiation was suspended: it is closed and the outcome
/// discarded (`Ok(None)`). A failure of the live session releases it from
/// the registry before the error is returned.
pub(crate) async fn settle<T>(
    registry: &SessionRegistry,
    session: &SessionHandle,
    outcome: Result<T, SignalError>,
) -> Result<Option<T>, SignalError> {
    if !registry.is_current(session.key(), session.id()) {
        debug!(session = %session.key(), session_id = %session.id(), "Session vanished during negotiation");
        session.close().await;
        return Ok(None);
    }

    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            registry.release_session(session.key(), session.id());
            session.close().await;
            Err(e)
        }
    }
}
