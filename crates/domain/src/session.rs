//! Session identity.
//!
//! A session is the unit of conversation ordering: one turn at a time per
//! session, durable queue keyed by session id, memory records tagged with it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Dm,
    Group,
    Web,
    Mobile,
}

/// Created on first turn, persisted, never destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionContext {
    pub fn new(
        session_id: impl Into<String>,
        channel_id: impl Into<String>,
        channel_kind: ChannelKind,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            channel_id: channel_id.into(),
            channel_kind,
            user_id: None,
        }
    }
}

/// Make a session id safe for use as a file name.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`. An empty id maps
/// to `_empty`; an id made of nothing but dots maps to `__` (dot-only
/// names would otherwise collide with `.`/`..`).
pub fn sanitize_session_id(session_id: &str) -> String {
    if session_id.is_empty() {
        return "_empty".into();
    }
    if session_id.chars().all(|c| c == '.') {
        return "__".into();
    }
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
