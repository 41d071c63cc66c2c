use super::debug::AttachState;
use super::log::LogStream;
use super::project::{BuildStatus, Capabilities, RunStatus};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source-side ordering key of a remote event, in milliseconds.
pub type Timestamp = u64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum FieldChange {
    BuildStatus(BuildStatus),
    RunStatus(RunStatus),
    Host(String),
    AppPort(Option<u16>),
    DebugPort(Option<u16>),
    Enabled(bool),
    AutoBuild(bool),
    Capabilities(Capabilities),
    Logs(Vec<LogStream>),
}

/// One inbound `(project, field, value, timestamp)` update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub project_id: String,
    pub change: FieldChange,
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn new(project_id: impl Into<String>, change: FieldChange, timestamp: Timestamp) -> Self {
        Self {
            project_id: project_id.into(),
            change,
            timestamp,
        }
    }
}

/// Emitted by a tracker whenever accepted state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Changed {
        project_id: String,
        change: FieldChange,
    },
    AttachStateChanged {
        project_id: String,
        state: AttachState,
    },
    Disposed {
        project_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Added { project_id: String },
    Removed { project_id: String },
}
