//! Remote-or-local entity references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to an advertising entity that may or may not have been
/// pushed to the remote platform yet.
///
/// Every dependency slot in the model (a campaign's advertiser, a
/// placement's campaign and zone) is an `EntityRef`. The enum carries
/// exactly one of a remote numeric id or a local store key, never both
/// and never neither, so the invariant holds by construction rather
/// than by a pre-save check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef {
    /// The entity already exists on the remote platform.
    Remote(u64),
    /// The entity only exists in the local mirror, identified by its
    /// opaque store key.
    Local(String),
}

impl EntityRef {
    /// Creates a reference to a remote entity.
    pub fn remote(id: u64) -> Self {
        EntityRef::Remote(id)
    }

    /// Creates a reference to a local entity.
    pub fn local(key: impl Into<String>) -> Self {
        EntityRef::Local(key.into())
    }

    /// Returns the remote id if this is a remote reference.
    pub fn as_remote(&self) -> Option<u64> {
        match self {
            EntityRef::Remote(id) => Some(*id),
            EntityRef::Local(_) => None,
        }
    }

    /// Returns the local key if this is a local reference.
    pub fn as_local(&self) -> Option<&str> {
        match self {
            EntityRef::Remote(_) => None,
            EntityRef::Local(key) => Some(key),
        }
    }

    /// Returns true if this reference points at a remote entity.
    pub fn is_remote(&self) -> bool {
        matches!(self, EntityRef::Remote(_))
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Remote(id) => write!(f, "remote:{id}"),
            EntityRef::Local(key) => write!(f, "local:{key}"),
        }
    }
}
