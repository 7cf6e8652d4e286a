//! Room and participant identity.
//!
//! Identity is established before a session starts; nothing here
//! authenticates anyone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a shared room. Strokes and presence are partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for RoomId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// The local participant: who draws, and how their cursor is labelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub user_name: String,
    /// CSS color used for the participant's cursor on other screens.
    pub user_color: String,
}

impl Participant {
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        user_color: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            user_color: user_color.into(),
        }
    }
}
