//! Scripted transport engine for tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::engine::{MediaConstraints, MediaTrack, SessionEvents, TrackKind, TransportEngine, TransportSession};
use crate::error::EngineError;
use crate::protocol::{IceCandidate, SessionDescription};
use crate::types::{SessionKey, TrackId};

/// Candidate string the fake engine refuses to parse
pub const MALFORMED_CANDIDATE: &str = "not-a-candidate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    CreateSession,
    SetRemote,
    CreateAnswer,
    SetLocal,
    AddTrack,
}

#[derive(Default)]
struct Script {
    fail: Option<FailPoint>,
    stall_answers: bool,
    hold_creates: Option<Arc<Notify>>,
}

pub struct FakeEngine {
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    script: Mutex<Script>,
    waiting_creates: AtomicUsize,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(Vec::new()),
            script: Mutex::new(Script::default()),
            waiting_creates: AtomicUsize::new(0),
        })
    }

    /// Make every session created from now on fail at `point`
    pub fn fail_at(&self, point: FailPoint) {
        self.script.lock().fail = Some(point);
    }

    /// Make `create_answer` never complete
    pub fn stall_answers(&self) {
        self.script.lock().stall_answers = true;
    }

    /// Park every `create_session` until the returned gate is notified once per call
    pub fn hold_creates(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.script.lock().hold_creates = Some(Arc::clone(&gate));
        gate
    }

    /// Number of `create_session` calls parked by [`hold_creates`](Self::hold_creates)
    pub fn waiting_creates(&self) -> usize {
        self.waiting_creates.load(Ordering::SeqCst)
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().last().cloned()
    }

    /// Most recent session created for `key`
    pub fn session(&self, key: &SessionKey) -> Option<Arc<FakeSession>> {
        self.sessions.lock().iter().rev().find(|s| &s.key == key).cloned()
    }

    pub fn sessions_for(&self, key: &SessionKey) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().iter().filter(|s| &s.key == key).cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[async_trait]
impl TransportEngine for FakeEngine {
    async fn create_session(
        &self,
        key: &SessionKey,
        events: SessionEvents,
    ) -> Result<Arc<dyn TransportSession>, EngineError> {
        let hold = self.script.lock().hold_creates.clone();
        if let Some(gate) = hold {
            self.waiting_creates.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            self.waiting_creates.fetch_sub(1, Ordering::SeqCst);
        }

        let (fail, stall) = {
            let script = self.script.lock();
            (script.fail, script.stall_answers)
        };
        if fail == Some(FailPoint::CreateSession) {
            return Err(EngineError::Description("engine refused to create a session".to_string()));
        }

        let session = Arc::new(FakeSession {
            key: key.clone(),
            events,
            fail,
            stall,
            remote: Mutex::new(None),
            local: Mutex::new(None),
            constraints: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session as Arc<dyn TransportSession>)
    }
}

pub struct FakeSession {
    key: SessionKey,
    events: SessionEvents,
    fail: Option<FailPoint>,
    stall: bool,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    constraints: Mutex<Option<MediaConstraints>>,
    candidates: Mutex<Vec<IceCandidate>>,
    tracks: Mutex<Vec<TrackId>>,
    closes: AtomicUsize,
}

impl FakeSession {
    pub const fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn local(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub fn constraints(&self) -> Option<MediaConstraints> {
        *self.constraints.lock()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub fn attached_tracks(&self) -> Vec<TrackId> {
        self.tracks.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Fire the engine's inbound-media callback
    pub fn emit_track(&self, track: MediaTrack) {
        (self.events.on_track)(track);
    }

    /// Fire the engine's local-candidate callback
    pub fn emit_candidate(&self, candidate: Option<IceCandidate>) {
        (self.events.on_candidate)(candidate);
    }

    fn check(&self, point: FailPoint) -> Result<(), EngineError> {
        if self.fail == Some(point) {
            return Err(EngineError::Description(format!("scripted failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.check(FailPoint::SetRemote)?;
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn create_answer(&self, constraints: MediaConstraints) -> Result<SessionDescription, EngineError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        self.check(FailPoint::CreateAnswer)?;
        *self.constraints.lock() = Some(constraints);
        Ok(SessionDescription::answer(format!("answer-for:{}", self.key)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        self.check(FailPoint::SetLocal)?;
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        if candidate.candidate == MALFORMED_CANDIDATE {
            return Err(EngineError::Candidate(format!("cannot parse '{}'", candidate.candidate)));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError> {
        self.check(FailPoint::AddTrack)?;
        self.tracks.lock().push(track.id().clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fake_track(id: &str, stream_id: &str, kind: TrackKind) -> MediaTrack {
    MediaTrack::new(TrackId::from(id), stream_id, kind, Arc::new(()))
}

pub fn candidate(host: &str) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:1 1 UDP 2130706431 {host} 5000 typ host"),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}
