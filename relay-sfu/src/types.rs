//! Identities shared by every relay component

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Channel-assigned identity of a connected endpoint.
    ///
    /// Unique for the lifetime of a connection and only reused after the
    /// disconnect has been observed and cleaned up.
    EndpointId
);

string_id!(
    /// Identity of one transport session created by the engine
    SessionId
);

string_id!(
    /// Identity of a media track reported by the engine
    TrackId
);

impl EndpointId {
    /// Allocate an identity for a freshly accepted connection
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }
}

impl SessionId {
    #[must_use]
    pub fn generate() -> Self {
        Self(nanoid::nanoid!(12))
    }
}

/// Which side of the relay a transport session serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// Media flowing from a publisher into the relay
    Publish,
    /// Media flowing from the relay to one viewer
    Subscribe,
}

/// Address of a transport session inside the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SessionKey {
    Publish(EndpointId),
    Subscribe { viewer: EndpointId, target: EndpointId },
}

impl SessionKey {
    pub fn subscribe(viewer: impl Into<EndpointId>, target: impl Into<EndpointId>) -> Self {
        Self::Subscribe {
            viewer: viewer.into(),
            target: target.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> SessionKind {
        match self {
            Self::Publish(_) => SessionKind::Publish,
            Self::Subscribe { .. } => SessionKind::Subscribe,
        }
    }

    /// Whether `endpoint` takes part in this session on either side
    #[must_use]
    pub fn involves(&self, endpoint: &EndpointId) -> bool {
        match self {
            Self::Publish(id) => id == endpoint,
            Self::Subscribe { viewer, target } => viewer == endpoint || target == endpoint,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish(id) => write!(f, "publish:{id}"),
            Self::Subscribe { viewer, target } => write!(f, "subscribe:{viewer}->{target}"),
        }
    }
}
