//! Session Registry: the single owner of publisher and subscribe records
//!
//! Every operation is a short, synchronous critical section. The lock is
//! never held across an `.await`, so callers that suspend must look records
//! up again afterwards (see [`SessionRegistry::is_current`]).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::engine::MediaTrack;
use crate::error::RegistryError;
use crate::session::SessionHandle;
use crate::types::{EndpointId, SessionId, SessionKey};

/// An endpoint that announced it pushes media into the relay
#[derive(Clone)]
pub struct PublisherRecord {
    id: EndpointId,
    tracks: Vec<MediaTrack>,
    session: Option<Arc<SessionHandle>>,
    registered_at: DateTime<Utc>,
}

impl PublisherRecord {
    fn new(id: EndpointId) -> Self {
        Self {
            id,
            tracks: Vec::new(),
            session: None,
            registered_at: Utc::now(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &EndpointId {
        &self.id
    }

    #[must_use]
    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn session(&self) -> Option<&Arc<SessionHandle>> {
        self.session.as_ref()
    }

    #[must_use]
    pub const fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    /// Tracks of the first media stream the publisher sent, in arrival order
    fn first_stream(&self) -> Vec<MediaTrack> {
        let Some(first) = self.tracks.first().map(MediaTrack::stream_id) else {
            return Vec::new();
        };
        self.tracks
            .iter()
            .filter(|track| track.stream_id() == first)
            .cloned()
            .collect()
    }
}

/// Outcome of installing a subscribe session
pub struct SubscribeRegistration {
    /// Session previously registered for the same pair; the caller closes it
    pub replaced: Option<Arc<SessionHandle>>,
    /// The target's first-stream tracks at the moment of registration
    pub tracks: Vec<MediaTrack>,
}

/// One viewer pulling one publisher's media
#[derive(Clone)]
pub struct SubscribeRecord {
    pub viewer: EndpointId,
    pub target: EndpointId,
    pub session: Arc<SessionHandle>,
    pub created_at: DateTime<Utc>,
}

/// Everything removed for a disconnecting endpoint, in one step
#[derive(Default)]
pub struct Eviction {
    pub publisher: Option<PublisherRecord>,
    /// Subscriptions the endpoint held as a viewer
    pub viewing: Vec<SubscribeRecord>,
    /// Other viewers' subscriptions that pulled from the endpoint
    pub targeted: Vec<SubscribeRecord>,
}

impl Eviction {
    /// Every session that must be closed, each listed once
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.publisher
            .iter()
            .filter_map(|record| record.session.clone())
            .chain(self.viewing.iter().map(|record| Arc::clone(&record.session)))
            .chain(self.targeted.iter().map(|record| Arc::clone(&record.session)))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publisher.is_none() && self.viewing.is_empty() && self.targeted.is_empty()
    }
}

type PairKey = (EndpointId, EndpointId);

#[derive(Default)]
struct RegistryState {
    publishers: HashMap<EndpointId, PublisherRecord>,
    /// Keyed by (viewer, target)
    subscriptions: HashMap<PairKey, SubscribeRecord>,
}

impl RegistryState {
    fn session(&self, key: &SessionKey) -> Option<&Arc<SessionHandle>> {
        match key {
            SessionKey::Publish(id) => self.publishers.get(id).and_then(|record| record.session.as_ref()),
            SessionKey::Subscribe { viewer, target } => self
                .subscriptions
                .get(&(viewer.clone(), target.clone()))
                .map(|record| &record.session),
        }
    }

    fn drain_subscriptions(&mut self, keep: impl Fn(&PairKey) -> bool) -> Vec<SubscribeRecord> {
        let doomed: Vec<PairKey> = self.subscriptions.keys().filter(|pair| !keep(pair)).cloned().collect();
        doomed
            .into_iter()
            .filter_map(|pair| self.subscriptions.remove(&pair))
            .collect()
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the publisher record if it does not exist yet.
    ///
    /// Returns `true` when a record was created. An existing record keeps its
    /// session; a fresh publish session replaces it through
    /// [`attach_publisher_session`](Self::attach_publisher_session).
    pub fn register_publisher(&self, id: &EndpointId) -> bool {
        let mut state = self.state.lock();
        if state.publishers.contains_key(id) {
            return false;
        }
        state.publishers.insert(id.clone(), PublisherRecord::new(id.clone()));
        info!(endpoint_id = %id, publishers = state.publishers.len(), "Publisher registered");
        true
    }

    pub fn remove_publisher(&self, id: &EndpointId) -> Option<PublisherRecord> {
        let removed = self.state.lock().publishers.remove(id);
        if removed.is_some() {
            debug!(endpoint_id = %id, "Publisher removed");
        }
        removed
    }

    /// Install the publish session, handing back the one it supersedes.
    ///
    /// Tracks recorded for the superseded session are dropped with it.
    pub fn attach_publisher_session(
        &self,
        id: &EndpointId,
        session: Arc<SessionHandle>,
    ) -> Result<Option<Arc<SessionHandle>>, RegistryError> {
        let mut state = self.state.lock();
        let record = state
            .publishers
            .get_mut(id)
            .ok_or_else(|| RegistryError::PublisherNotFound(id.clone()))?;

        record.tracks.clear();
        Ok(record.session.replace(session))
    }

    /// Store a track reported by the engine for the publisher's current session.
    ///
    /// Fails when the record is gone or `session_id` has been superseded, so
    /// media from an abandoned session never lands in the record. A track id
    /// already present is not stored twice.
    pub fn record_inbound_track(
        &self,
        id: &EndpointId,
        session_id: &SessionId,
        track: MediaTrack,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let record = state
            .publishers
            .get_mut(id)
            .ok_or_else(|| RegistryError::PublisherNotFound(id.clone()))?;

        let current = record.session.as_ref().is_some_and(|s| s.id() == session_id);
        if !current {
            return Err(RegistryError::SessionNotFound(SessionKey::Publish(id.clone())));
        }

        if record.tracks.iter().any(|existing| existing.id() == track.id()) {
            return Ok(());
        }

        debug!(
            endpoint_id = %id,
            track_id = %track.id(),
            kind = ?track.kind(),
            "Recorded inbound track"
        );
        record.tracks.push(track);
        Ok(())
    }

    pub fn publisher_tracks(&self, id: &EndpointId) -> Result<Vec<MediaTrack>, RegistryError> {
        self.state
            .lock()
            .publishers
            .get(id)
            .map(|record| record.tracks.clone())
            .ok_or_else(|| RegistryError::PublisherNotFound(id.clone()))
    }

    /// Tracks of the first media stream the publisher sent, in arrival order
    pub fn first_stream_tracks(&self, id: &EndpointId) -> Result<Vec<MediaTrack>, RegistryError> {
        self.state
            .lock()
            .publishers
            .get(id)
            .map(PublisherRecord::first_stream)
            .ok_or_else(|| RegistryError::PublisherNotFound(id.clone()))
    }

    #[must_use]
    pub fn contains_publisher(&self, id: &EndpointId) -> bool {
        self.state.lock().publishers.contains_key(id)
    }

    /// Identities of every registered publisher, sorted
    #[must_use]
    pub fn publisher_ids(&self) -> Vec<EndpointId> {
        let mut ids: Vec<EndpointId> = self.state.lock().publishers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Install the session for (viewer, target), handing back the one it
    /// replaces and the target's first-stream tracks.
    ///
    /// Both come from the same critical section, so the tracks always belong
    /// to the publisher the record was registered against. Refused when
    /// `target` has no publisher record.
    pub fn register_subscribe(
        &self,
        viewer: &EndpointId,
        target: &EndpointId,
        session: Arc<SessionHandle>,
    ) -> Result<SubscribeRegistration, RegistryError> {
        let mut state = self.state.lock();
        let tracks = state
            .publishers
            .get(target)
            .map(PublisherRecord::first_stream)
            .ok_or_else(|| RegistryError::PublisherNotFound(target.clone()))?;

        let record = SubscribeRecord {
            viewer: viewer.clone(),
            target: target.clone(),
            session,
            created_at: Utc::now(),
        };
        let replaced = state
            .subscriptions
            .insert((viewer.clone(), target.clone()), record)
            .map(|old| old.session);

        debug!(
            viewer_id = %viewer,
            target_id = %target,
            replaced = replaced.is_some(),
            tracks = tracks.len(),
            "Subscribe session registered"
        );
        Ok(SubscribeRegistration { replaced, tracks })
    }

    pub fn remove_subscribe(&self, viewer: &EndpointId, target: &EndpointId) -> Option<SubscribeRecord> {
        self.state
            .lock()
            .subscriptions
            .remove(&(viewer.clone(), target.clone()))
    }

    /// Remove every subscription `viewer` holds
    pub fn remove_all_subscribes_for(&self, viewer: &EndpointId) -> Vec<SubscribeRecord> {
        self.state.lock().drain_subscriptions(|(v, _)| v != viewer)
    }

    /// Remove every subscription that pulls from `target`
    pub fn remove_subscribes_targeting(&self, target: &EndpointId) -> Vec<SubscribeRecord> {
        self.state.lock().drain_subscriptions(|(_, t)| t != target)
    }

    /// Targets `viewer` currently subscribes to, sorted
    #[must_use]
    pub fn subscriptions_of(&self, viewer: &EndpointId) -> Vec<EndpointId> {
        let mut targets: Vec<EndpointId> = self
            .state
            .lock()
            .subscriptions
            .keys()
            .filter(|(v, _)| v == viewer)
            .map(|(_, t)| t.clone())
            .collect();
        targets.sort();
        targets
    }

    pub fn get_session(&self, key: &SessionKey) -> Result<Arc<SessionHandle>, RegistryError> {
        self.state
            .lock()
            .session(key)
            .cloned()
            .ok_or_else(|| RegistryError::SessionNotFound(key.clone()))
    }

    /// Whether `session_id` is still the live session registered under `key`
    #[must_use]
    pub fn is_current(&self, key: &SessionKey, session_id: &SessionId) -> bool {
        self.state
            .lock()
            .session(key)
            .is_some_and(|session| session.id() == session_id)
    }

    /// Forget an abandoned session if it is still the registered one.
    ///
    /// A publish record survives without its session; a subscribe record
    /// goes away with it.
    pub fn release_session(&self, key: &SessionKey, session_id: &SessionId) -> bool {
        let mut state = self.state.lock();
        if !state.session(key).is_some_and(|session| session.id() == session_id) {
            return false;
        }
        match key {
            SessionKey::Publish(id) => {
                if let Some(record) = state.publishers.get_mut(id) {
                    record.session = None;
                    record.tracks.clear();
                }
            }
            SessionKey::Subscribe { viewer, target } => {
                state.subscriptions.remove(&(viewer.clone(), target.clone()));
            }
        }
        true
    }

    /// Remove everything `id` takes part in, as publisher, viewer or target
    pub fn evict(&self, id: &EndpointId) -> Eviction {
        let mut state = self.state.lock();
        let publisher = state.publishers.remove(id);
        let viewing = state.drain_subscriptions(|(v, _)| v != id);
        let targeted = state.drain_subscriptions(|(_, t)| t != id);
        Eviction {
            publisher,
            viewing,
            targeted,
        }
    }

    /// Empty the registry, returning every session it held
    pub fn drain(&self) -> Vec<Arc<SessionHandle>> {
        let mut state = self.state.lock();
        let publishers = std::mem::take(&mut state.publishers);
        let subscriptions = std::mem::take(&mut state.subscriptions);
        publishers
            .into_values()
            .filter_map(|record| record.session)
            .chain(subscriptions.into_values().map(|record| record.session))
            .collect()
    }

    #[must_use]
    pub fn publisher_count(&self) -> usize {
        self.state.lock().publishers.len()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }
}
