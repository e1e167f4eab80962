//! Subscribe Negotiator: egress sessions from one publisher to one viewer

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::engine::{MediaConstraints, SessionEvents, TransportEngine};
use crate::error::{Phase, PhaseExt, SignalError};
use crate::hub::Outbox;
use crate::protocol::{ServerMessage, SessionDescription};
use crate::registry::SessionRegistry;
use crate::session::{settle, within, SessionHandle};
use crate::types::{EndpointId, SessionId, SessionKey};

pub struct SubscribeNegotiator {
    registry: Arc<SessionRegistry>,
    outbox: Arc<dyn Outbox>,
    engine: Arc<dyn TransportEngine>,
    timeout: Option<Duration>,
}

impl SubscribeNegotiator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        outbox: Arc<dyn Outbox>,
        engine: Arc<dyn TransportEngine>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            outbox,
            engine,
            timeout,
        }
    }

    /// Answer `viewer`'s offer for `target`'s media with a send-only session.
    ///
    /// The session carries the tracks of the publisher's first stream as they
    /// stand when the session is registered. Tracks that arrive later are not
    /// added; the viewer re-offers to pick them up.
    pub async fn negotiate(
        &self,
        viewer: &EndpointId,
        target: &EndpointId,
        offer: SessionDescription,
    ) -> Result<(), SignalError> {
        offer.expect_offer()?;
        if !self.registry.contains_publisher(target) {
            return Err(SignalError::MissingTarget(target.clone()));
        }

        let key = SessionKey::Subscribe {
            viewer: viewer.clone(),
            target: target.clone(),
        };
        let transport = self
            .engine
            .create_session(&key, self.events(viewer, target))
            .await
            .phase(Phase::CreateSession)?;
        let session = SessionHandle::new(SessionId::generate(), key, transport);

        let registration = match self.registry.register_subscribe(viewer, target, Arc::clone(&session)) {
            Ok(registration) => registration,
            Err(e) => {
                debug!(viewer_id = %viewer, target_id = %target, error = %e, "Publisher left before the subscription was ready");
                session.close().await;
                return Ok(());
            }
        };
        let tracks = registration.tracks;
        if let Some(replaced) = registration.replaced {
            debug!(viewer_id = %viewer, target_id = %target, "Replacing earlier subscribe session");
            replaced.close().await;
        }

        let outcome = within(self.timeout, async {
            for track in &tracks {
                session.attach(track).await.phase(Phase::AttachTracks)?;
            }
            session.answer(offer, MediaConstraints::send_only()).await
        })
        .await;

        let Some(answer) = settle(&self.registry, &session, outcome).await? else {
            return Ok(());
        };

        self.outbox.deliver(
            viewer,
            ServerMessage::SubscribeAnswer {
                target_id: target.clone(),
                description: answer,
            },
        );
        info!(
            viewer_id = %viewer,
            target_id = %target,
            tracks = tracks.len(),
            "Subscribe session negotiated"
        );
        Ok(())
    }

    fn events(&self, viewer: &EndpointId, target: &EndpointId) -> SessionEvents {
        let outbox = Arc::downgrade(&self.outbox);
        let viewer = viewer.clone();
        let target = target.clone();
        let label = format!("{viewer}->{target}");

        SessionEvents::new(
            move |candidate| {
                if let Some(outbox) = outbox.upgrade() {
                    outbox.deliver(
                        &viewer,
                        ServerMessage::SubscribeCandidateRelay {
                            target_id: target.clone(),
                            candidate,
                        },
                    );
                }
            },
            move |track| {
                trace!(session = %label, track_id = %track.id(), "Ignoring inbound media on egress session");
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TrackKind;
    use crate::hub::ConnectionHub;
    use crate::testing::{candidate, fake_track, FailPoint, FakeEngine};
    use crate::types::TrackId;
    use tokio::sync::mpsc;

    struct Fixture {
        engine: Arc<FakeEngine>,
        registry: Arc<SessionRegistry>,
        hub: Arc<ConnectionHub>,
        negotiator: SubscribeNegotiator,
    }

    fn fixture() -> Fixture {
        let engine = FakeEngine::new();
        let registry = Arc::new(SessionRegistry::new());
        let hub = Arc::new(ConnectionHub::new(32));
        let negotiator = SubscribeNegotiator::new(Arc::clone(&registry), hub.clone(), engine.clone(), None);
        Fixture {
            engine,
            registry,
            hub,
            negotiator,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    fn id(s: &str) -> EndpointId {
        EndpointId::from(s)
    }

    /// Register `publisher` with a live session carrying `tracks`
    async fn publishing(f: &Fixture, publisher: &str, tracks: &[(&str, &str, TrackKind)]) {
        let key = SessionKey::Publish(id(publisher));
        f.registry.register_publisher(&id(publisher));
        let transport = f
            .engine
            .create_session(&key, SessionEvents::new(|_| {}, |_| {}))
            .await
            .unwrap();
        let session = SessionHandle::new(SessionId::generate(), key, transport);
        f.registry
            .attach_publisher_session(&id(publisher), Arc::clone(&session))
            .unwrap();
        for (track, stream, kind) in tracks {
            f.registry
                .record_inbound_track(&id(publisher), session.id(), fake_track(track, stream, *kind))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_subscribe_attaches_first_stream_and_answers_send_only() {
        let f = fixture();
        publishing(
            &f,
            "c1",
            &[
                ("a", "s1", TrackKind::Audio),
                ("v", "s1", TrackKind::Video),
                ("screen", "s2", TrackKind::Video),
            ],
        )
        .await;
        let mut rx = f.hub.connect(id("a1"));

        f.negotiator
            .negotiate(&id("a1"), &id("c1"), SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let fake = f.engine.session(&SessionKey::subscribe("a1", "c1")).unwrap();
        assert_eq!(fake.attached_tracks(), vec![TrackId::from("a"), TrackId::from("v")]);
        assert_eq!(fake.constraints(), Some(MediaConstraints::send_only()));
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::SubscribeAnswer {
                target_id: id("c1"),
                description: SessionDescription::answer("answer-for:subscribe:a1->c1"),
            }]
        );
    }

    #[tokio::test]
    async fn test_subscribe_without_tracks_still_answers() {
        let f = fixture();
        f.registry.register_publisher(&id("c1"));
        let mut rx = f.hub.connect(id("a1"));

        f.negotiator
            .negotiate(&id("a1"), &id("c1"), SessionDescription::offer("v=0"))
            .await
            .unwrap();

        let fake = f.engine.session(&SessionKey::subscribe("a1", "c1")).unwrap();
        assert!(fake.attached_tracks().is_empty());
        assert!(matches!(drain(&mut rx).as_slice(), [ServerMessage::SubscribeAnswer { .. }]));
    }

    #[tokio::test]
    async fn test_subscribe_to_unknown_publisher() {
        let f = fixture();
        let err = f
            .negotiator
            .negotiate(&id("a1"), &id("c9"), SessionDescription::offer("v=0"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "publisher c9 not found");
        assert_eq!(f.engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_session() {
        let f = fixture();
        f.registry.register_publisher(&id("c1"));
        let _rx = f.hub.connect(id("a1"));

        for _ in 0..2 {
            f.negotiator
                .negotiate(&id("a1"), &id("c1"), SessionDescription::offer("v=0"))
                .await
                .unwrap();
        }

        let sessions = f.engine.sessions_for(&SessionKey::subscribe("a1", "c1"));
        assert_eq!(sessions[0].close_count(), 1);
        assert_eq!(sessions[1].close_count(), 0);
        assert_eq!(f.registry.subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_attach_failure_removes_subscription() {
        let f = fixture();
        publishing(&f, "c1", &[("v", "s1", TrackKind::Video)]).await;
        f.engine.fail_at(FailPoint::AddTrack);

        let err = f
            .negotiator
            .negotiate(&id("a1"), &id("c1"), SessionDescription::offer("v=0"))
            .await
            .unwrap_err();

        assert!(matches!(err, SignalError::Engine { phase: Phase::AttachTracks, .. }));
        assert_eq!(f.registry.subscription_count(), 0);
        assert_eq!(f.engine.last_session().unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_target_gone_before_registration_is_a_benign_abort() {
        let f = Arc::new(fixture());
        publishing(&f, "c1", &[("v", "s1", TrackKind::Video)]).await;
        let mut rx = f.hub.connect(id("a1"));
        let gate = f.engine.hold_creates();

        let pending = {
            let f = Arc::clone(&f);
            tokio::spawn(async move {
                f.negotiator
                    .negotiate(&id("a1"), &id("c1"), SessionDescription::offer("v=0"))
                    .await
            })
        };
        while f.engine.waiting_creates() == 0 {
            tokio::task::yield_now().await;
        }

        f.registry.evict(&id("c1"));
        gate.notify_one();
        pending.await.unwrap().unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(f.registry.subscription_count(), 0);
        let fake = f.engine.session(&SessionKey::subscribe("a1", "c1")).unwrap();
        assert_eq!(fake.close_count(), 1);
        assert!(fake.attached_tracks().is_empty());
    }

    #[tokio::test]
    async fn test_candidates_are_tagged_with_target() {
        let f = fixture();
        f.registry.register_publisher(&id("c1"));
        let mut rx = f.hub.connect(id("a1"));
        f.negotiator
            .negotiate(&id("a1"), &id("c1"), SessionDescription::offer("v=0"))
            .await
            .unwrap();
        drain(&mut rx);

        f.engine.last_session().unwrap().emit_candidate(Some(candidate("10.0.0.2")));
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::SubscribeCandidateRelay {
                target_id: id("c1"),
                candidate: Some(candidate("10.0.0.2")),
            }]
        );
    }
}
