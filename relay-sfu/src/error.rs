use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::types::{EndpointId, SessionKey};

/// Failure reported by the transport engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("description rejected: {0}")]
    Description(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    #[error("track rejected: {0}")]
    Track(String),

    #[error("session already closed")]
    Closed,

    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no publisher record for {0}")]
    PublisherNotFound(EndpointId),

    #[error("no session for {0}")]
    SessionNotFound(SessionKey),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("endpoint {0} is not connected")]
    NotConnected(EndpointId),

    #[error("outbox of endpoint {0} is full")]
    Full(EndpointId),

    #[error("outbox of endpoint {0} is closed")]
    Closed(EndpointId),
}

/// Negotiation step that failed; named in the error sent to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    CreateSession,
    AttachTracks,
    ApplyOffer,
    CreateAnswer,
    ApplyAnswer,
    AddCandidate,
}

impl Phase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CreateSession => "create-session",
            Self::AttachTracks => "attach-tracks",
            Self::ApplyOffer => "apply-offer",
            Self::CreateAnswer => "create-answer",
            Self::ApplyAnswer => "apply-answer",
            Self::AddCandidate => "add-candidate",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one inbound message; becomes a single `error` frame
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("{phase} failed: {source}")]
    Engine {
        phase: Phase,
        #[source]
        source: EngineError,
    },

    #[error("publisher {0} not found")]
    MissingTarget(EndpointId),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("timeout: negotiation did not finish within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Tag an engine result with the negotiation phase it belongs to
pub(crate) trait PhaseExt<T> {
    fn phase(self, phase: Phase) -> Result<T, SignalError>;
}

impl<T> PhaseExt<T> for Result<T, EngineError> {
    fn phase(self, phase: Phase) -> Result<T, SignalError> {
        self.map_err(|source| SignalError::Engine { phase, source })
    }
}
