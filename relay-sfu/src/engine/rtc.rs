//! WebRTC transport engine
//!
//! Each inbound remote track is re-published as a `TrackLocalStaticRTP`
//! relay fed by its own RTP read loop. The relay track binds to any number
//! of subscribe sessions, so one publisher track fans out to every viewer
//! without per-viewer copies in the signaling core.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use super::{MediaConstraints, MediaTrack, SessionEvents, TrackKind, TransportEngine, TransportSession};
use crate::config::SfuConfig;
use crate::error::EngineError;
use crate::protocol::{IceCandidate, SdpType, SessionDescription};
use crate::types::{SessionKey, TrackId};

/// RTCP read buffer, one MTU
const RTCP_BUFFER_SIZE: usize = 1500;

impl From<RTPCodecType> for TrackKind {
    fn from(codec_type: RTPCodecType) -> Self {
        match codec_type {
            RTPCodecType::Audio => Self::Audio,
            _ => Self::Video,
        }
    }
}

impl From<RTCIceCandidateInit> for IceCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
            username_fragment: init.username_fragment,
        }
    }
}

impl From<IceCandidate> for RTCIceCandidateInit {
    fn from(candidate: IceCandidate) -> Self {
        Self {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        }
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let parsed = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp),
        SdpType::Answer => RTCSessionDescription::answer(description.sdp),
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpType::Rollback => {
            return Err(EngineError::Description("rollback is not supported".to_string()));
        }
    };
    parsed.map_err(|e| EngineError::Description(e.to_string()))
}

/// Production engine backed by the `webrtc` crate
pub struct WebRtcEngine {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcEngine {
    pub fn new(config: &SfuConfig) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = config
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        info!(ice_servers = ice_servers.len(), "WebRTC engine initialized");

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn create_session(
        &self,
        key: &SessionKey,
        events: SessionEvents,
    ) -> Result<Arc<dyn TransportSession>, EngineError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(self.api.new_peer_connection(config).await?);
        let label = key.to_string();

        let on_candidate = Arc::clone(&events.on_candidate);
        let candidate_label = label.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let on_candidate = Arc::clone(&on_candidate);
            let label = candidate_label.clone();
            Box::pin(async move {
                let relayed = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => Some(IceCandidate::from(init)),
                        Err(e) => {
                            warn!(session = %label, error = %e, "Failed to serialize local candidate");
                            return;
                        }
                    },
                    None => None,
                };
                on_candidate(relayed);
            })
        }));

        let state_label = label.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            debug!(session = %state_label, state = %state, "Peer connection state changed");
            Box::pin(async {})
        }));

        let on_track = Arc::clone(&events.on_track);
        let track_label = label.clone();
        pc.on_track(Box::new(move |remote, _receiver, _transceiver| {
            let on_track = Arc::clone(&on_track);
            let label = track_label.clone();
            Box::pin(async move {
                let track = relay_remote_track(&label, remote);
                on_track(track);
            })
        }));

        debug!(session = %label, "Created peer connection");
        Ok(Arc::new(WebRtcSession { pc, label }))
    }
}

/// Mirror a remote track into a local relay track and keep it fed
fn relay_remote_track(label: &str, remote: Arc<TrackRemote>) -> MediaTrack {
    let kind = TrackKind::from(remote.kind());
    let track_id = remote.id();
    let stream_id = remote.stream_id();

    info!(
        session = %label,
        track_id = %track_id,
        kind = ?kind,
        codec = %remote.codec().capability.mime_type,
        "Inbound track arrived"
    );

    let local = Arc::new(TrackLocalStaticRTP::new(
        remote.codec().capability,
        track_id.clone(),
        stream_id.clone(),
    ));

    let writer = Arc::clone(&local);
    let reader_label = label.to_string();
    let reader_track = track_id.clone();
    tokio::spawn(async move {
        while let Ok((packet, _attributes)) = remote.read_rtp().await {
            if let Err(e) = writer.write_rtp(&packet).await {
                trace!(track_id = %reader_track, error = %e, "Relay write failed");
            }
        }
        debug!(session = %reader_label, track_id = %reader_track, "RTP reader stopped");
    });

    MediaTrack::new(TrackId::from(track_id), stream_id, kind, local)
}

struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    label: String,
}

#[async_trait]
impl TransportSession for WebRtcSession {
    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))
    }

    async fn create_answer(&self, constraints: MediaConstraints) -> Result<SessionDescription, EngineError> {
        // The answer mirrors the offer's m-lines; a kind the relay must not
        // receive is rejected by stopping its receive-only transceiver.
        for transceiver in self.pc.get_transceivers().await {
            let kind = TrackKind::from(transceiver.kind());
            if transceiver.direction() == RTCRtpTransceiverDirection::Recvonly && !constraints.receives(kind) {
                debug!(session = %self.label, kind = ?kind, "Rejecting receive-only media line");
                transceiver.stop().await?;
            }
        }

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), EngineError> {
        let description = to_rtc_description(description)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit::from(candidate))
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError> {
        let local = track
            .payload::<TrackLocalStaticRTP>()
            .ok_or_else(|| EngineError::Track(format!("track {} was not produced by this engine", track.id())))?;

        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EngineError::Track(e.to_string()))?;

        // Drain RTCP so the interceptors keep running
        tokio::spawn(async move {
            let mut buf = vec![0u8; RTCP_BUFFER_SIZE];
            while sender.read(&mut buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await?;
        debug!(session = %self.label, "Closed peer connection");
        Ok(())
    }
}
