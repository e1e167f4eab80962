//! Relay SFU (Selective Forwarding Unit) signaling core
//!
//! Publishers push one live stream each into the relay; viewers pick any
//! published stream and pull it out. Publishers and viewers never exchange
//! network information with each other: the relay terminates one transport
//! session per publisher and one per (viewer, publisher) pair, and forwards
//! media between them.
//!
//! ## Architecture
//!
//! - **`SessionRegistry`**: single owner of publisher and subscribe records
//! - **`PublishNegotiator`**: offer/answer for media coming into the relay
//! - **`SubscribeNegotiator`**: offer/answer for media leaving towards a viewer
//! - **`CandidateRelay`**: routes connectivity candidates to sessions
//! - **`RoomDirectory`**: viewing group membership and publisher broadcasts
//! - **`SignalingGateway`**: entry point for every inbound message and disconnect
//!
//! The media path itself lives behind [`TransportEngine`]; [`WebRtcEngine`]
//! is the production implementation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_sfu::{SfuConfig, SignalingGateway, WebRtcEngine};
//!
//! let config = SfuConfig::default();
//! let engine = Arc::new(WebRtcEngine::new(&config)?);
//! let gateway = SignalingGateway::new(config, engine);
//!
//! let (endpoint_id, outbox) = gateway.connect();
//! gateway.handle_frame(&endpoint_id, r#"{"event":"view-join","data":{}}"#).await;
//! gateway.disconnect(&endpoint_id).await;
//! ```

mod candidate;
mod config;
mod directory;
pub mod engine;
mod error;
mod gateway;
mod hub;
pub mod protocol;
mod publish;
mod registry;
mod session;
mod subscribe;
mod types;

#[cfg(test)]
mod testing;

pub use candidate::CandidateRelay;
pub use config::{IceServer, SfuConfig};
pub use directory::RoomDirectory;
pub use engine::rtc::WebRtcEngine;
pub use engine::{MediaConstraints, MediaTrack, SessionEvents, TrackKind, TransportEngine, TransportSession};
pub use error::{DeliveryError, EngineError, Phase, RegistryError, SignalError};
pub use gateway::{RelayStats, SignalingGateway};
pub use hub::{ConnectionHub, Outbox};
pub use protocol::{ClientMessage, IceCandidate, SdpType, ServerMessage, SessionDescription};
pub use publish::PublishNegotiator;
pub use registry::{Eviction, PublisherRecord, SessionRegistry, SubscribeRecord, SubscribeRegistration};
pub use session::SessionHandle;
pub use subscribe::SubscribeNegotiator;
pub use types::{EndpointId, SessionId, SessionKey, SessionKind, TrackId};
