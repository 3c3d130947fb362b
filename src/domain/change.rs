//! Change records and the progress reported while starting or ending them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a change record on the remote service.
///
/// Assigned once per run by the start-change worker and copied by value
/// into the end-change worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeId(Uuid);

impl ChangeId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One message of a start/end change stream.
///
/// Counts are cumulative for the phase; the service is expected to never
/// decrease them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeProgress {
    /// Remote-reported phase label (e.g. "STATE_TAKING_SNAPSHOT")
    pub state: String,

    #[serde(default)]
    pub num_items: u32,

    #[serde(default)]
    pub num_edges: u32,
}

impl ChangeProgress {
    pub fn new(state: impl Into<String>, num_items: u32, num_edges: u32) -> Self {
        Self {
            state: state.into(),
            num_items,
            num_edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_defaults_missing_counts() {
        let progress: ChangeProgress = serde_json::from_str(r#"{"state":"STATE_DONE"}"#).unwrap();
        assert_eq!(progress, ChangeProgress::new("STATE_DONE", 0, 0));
    }

    #[test]
    fn test_change_id_is_transparent() {
        let id = ChangeId::new(Uuid::new_v4());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
