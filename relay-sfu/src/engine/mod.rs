//! Media transport engine seam
//!
//! The signaling core never touches ICE, DTLS/SRTP or RTP directly. It asks an
//! engine for sessions and drives them through the offer/answer exchange;
//! everything below that line belongs to the engine.

pub mod rtc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::protocol::{IceCandidate, SessionDescription};
use crate::types::{SessionKey, TrackId};

/// Media track kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Which media kinds the relay is willing to receive in an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub receive_audio: bool,
    pub receive_video: bool,
}

impl MediaConstraints {
    /// Ingest: accept both audio and video from the remote side
    #[must_use]
    pub const fn receive_all() -> Self {
        Self {
            receive_audio: true,
            receive_video: true,
        }
    }

    /// Egress: the relay only sends on this session
    #[must_use]
    pub const fn send_only() -> Self {
        Self {
            receive_audio: false,
            receive_video: false,
        }
    }

    #[must_use]
    pub const fn receives(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Audio => self.receive_audio,
            TrackKind::Video => self.receive_video,
        }
    }
}

/// Handle to a track of inbound media, attachable to other sessions.
///
/// The payload is engine specific; the signaling core only stores and
/// hands the handle back to the engine that produced it.
#[derive(Clone)]
pub struct MediaTrack {
    id: TrackId,
    stream_id: String,
    kind: TrackKind,
    payload: Arc<dyn Any + Send + Sync>,
}

impl MediaTrack {
    pub fn new(
        id: TrackId,
        stream_id: impl Into<String>,
        kind: TrackKind,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            id,
            stream_id: stream_id.into(),
            kind,
            payload,
        }
    }

    #[must_use]
    pub const fn id(&self) -> &TrackId {
        &self.id
    }

    #[must_use]
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Recover the engine's own track type
    #[must_use]
    pub fn payload<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.payload).downcast::<T>().ok()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("stream_id", &self.stream_id)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

pub type CandidateCallback = Arc<dyn Fn(Option<IceCandidate>) + Send + Sync>;
pub type TrackCallback = Arc<dyn Fn(MediaTrack) + Send + Sync>;

/// Callbacks an engine session fires while it runs
#[derive(Clone)]
pub struct SessionEvents {
    /// Local candidate discovered; `None` marks the end of gathering
    pub on_candidate: CandidateCallback,
    /// Inbound media arrived, once per track
    pub on_track: TrackCallback,
}

impl SessionEvents {
    pub fn new(
        on_candidate: impl Fn(Option<IceCandidate>) + Send + Sync + 'static,
        on_track: impl Fn(MediaTrack) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_candidate: Arc::new(on_candidate),
            on_track: Arc::new(on_track),
        }
    }
}

/// One transport session terminated by the relay
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError>;

    async fn create_answer(&self, constraints: MediaConstraints) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;

    /// Attach a track received on another session as outbound media
    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Factory for transport sessions
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn create_session(
        &self,
        key: &SessionKey,
        events: SessionEvents,
    ) -> Result<Arc<dyn TransportSession>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraints() {
        assert!(MediaConstraints::receive_all().receives(TrackKind::Audio));
        assert!(MediaConstraints::receive_all().receives(TrackKind::Video));
        assert!(!MediaConstraints::send_only().receives(TrackKind::Audio));
        assert!(!MediaConstraints::send_only().receives(TrackKind::Video));
    }

    #[test]
    fn test_track_payload_downcast() {
        let track = MediaTrack::new(TrackId::from("t1"), "s1", TrackKind::Video, Arc::new(42_u32));
        assert_eq!(track.payload::<u32>().as_deref(), Some(&42));
        assert!(track.payload::<String>().is_none());
        assert_eq!(track.stream_id(), "s1");
    }
}
