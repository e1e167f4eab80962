//! Wire protocol spoken over the message channel
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.
//! Descriptions and candidates use the same shape browsers produce for
//! `RTCSessionDescriptionInit` and `RTCIceCandidateInit`, so clients can
//! forward them without conversion.

use serde::{Deserialize, Serialize};

use crate::error::SignalError;
use crate::types::EndpointId;

/// SDP type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Pranswer => "pranswer",
            Self::Rollback => "rollback",
        }
    }
}

/// Session description (SDP)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Reject anything that is not an offer with a body
    pub(crate) fn expect_offer(&self) -> Result<(), SignalError> {
        if self.sdp_type != SdpType::Offer {
            return Err(SignalError::Malformed(format!(
                "expected an offer description, got {}",
                self.sdp_type.as_str()
            )));
        }
        if self.sdp.trim().is_empty() {
            return Err(SignalError::Malformed("offer description has no sdp".to_string()));
        }
        Ok(())
    }
}

/// ICE candidate for connection establishment
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Full candidate string
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishIntent {
    pub endpoint_id: EndpointId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOffer {
    pub sender_id: EndpointId,
    pub description: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishCandidate {
    pub sender_id: EndpointId,
    pub candidate: IceCandidate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewJoin {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeOffer {
    pub viewer_id: EndpointId,
    pub target_id: EndpointId,
    pub description: SessionDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeCandidate {
    pub viewer_id: EndpointId,
    pub target_id: EndpointId,
    pub candidate: IceCandidate,
}

/// Messages an endpoint sends to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    PublishIntent(PublishIntent),
    PublishOffer(PublishOffer),
    PublishCandidate(PublishCandidate),
    ViewJoin(ViewJoin),
    SubscribeOffer(SubscribeOffer),
    SubscribeCandidate(SubscribeCandidate),
}

impl ClientMessage {
    pub fn decode(text: &str) -> Result<Self, SignalError> {
        serde_json::from_str(text).map_err(|e| SignalError::Malformed(e.to_string()))
    }

    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::PublishIntent(_) => "publish-intent",
            Self::PublishOffer(_) => "publish-offer",
            Self::PublishCandidate(_) => "publish-candidate",
            Self::ViewJoin(_) => "view-join",
            Self::SubscribeOffer(_) => "subscribe-offer",
            Self::SubscribeCandidate(_) => "subscribe-candidate",
        }
    }
}

/// Messages the relay sends to an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First frame on every connection: the identity the channel assigned
    Connected { id: EndpointId },
    /// Relay-side candidate for the endpoint's publish session; `None` ends gathering
    PublishCandidateRelay { candidate: Option<IceCandidate> },
    PublishAnswer { description: SessionDescription },
    PublisherJoined { id: EndpointId },
    PublisherLeft { id: EndpointId },
    #[serde(rename_all = "camelCase")]
    SubscribeCandidateRelay {
        target_id: EndpointId,
        candidate: Option<IceCandidate>,
    },
    #[serde(rename_all = "camelCase")]
    SubscribeAnswer {
        target_id: EndpointId,
        description: SessionDescription,
    },
    PublisherList { ids: Vec<EndpointId> },
    Error { message: String },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    #[must_use]
    pub const fn event(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::PublishCandidateRelay { .. } => "publish-candidate-relay",
            Self::PublishAnswer { .. } => "publish-answer",
            Self::PublisherJoined { .. } => "publisher-joined",
            Self::PublisherLeft { .. } => "publisher-left",
            Self::SubscribeCandidateRelay { .. } => "subscribe-candidate-relay",
            Self::SubscribeAnswer { .. } => "subscribe-answer",
            Self::PublisherList { .. } => "publisher-list",
            Self::Error { .. } => "error",
        }
    }
}
