use super::notification::Timestamp;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Build,
    App,
    Custom,
}

/// Names one remote log channel. Two streams are the same log iff kind and
/// name match.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogStream {
    pub kind: LogKind,
    pub name: String,
}

impl LogStream {
    pub fn new(kind: LogKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn build(name: impl Into<String>) -> Self {
        Self::new(LogKind::Build, name)
    }

    pub fn app(name: impl Into<String>) -> Self {
        Self::new(LogKind::App, name)
    }
}

/// One log file as listed by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireLogInfo {
    pub log_name: String,
    #[serde(default)]
    pub workspace_log_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLogs {
    #[serde(default)]
    pub build: Vec<WireLogInfo>,
    #[serde(default)]
    pub app: Vec<WireLogInfo>,
}

impl WireLogs {
    /// The listed logs as stream identities, sorted and without duplicates.
    pub fn streams(&self) -> Vec<LogStream> {
        let build = self.build.iter().map(|l| LogStream::build(l.log_name.clone()));
        let app = self.app.iter().map(|l| LogStream::app(l.log_name.clone()));
        let mut streams: Vec<LogStream> = build.chain(app).collect();
        streams.sort();
        streams.dedup();
        streams
    }
}

/// An open log stream. Whoever renders the log watches `closed()`; the
/// owning tracker closes it on removal or disposal.
#[derive(Debug, Clone)]
pub struct LogStreamHandle {
    stream: LogStream,
    opened_at: Timestamp,
    cancel: CancellationToken,
}

impl LogStreamHandle {
    pub(crate) fn open(stream: LogStream, opened_at: Timestamp) -> Self {
        Self {
            stream,
            opened_at,
            cancel: CancellationToken::new(),
        }
    }

    pub fn stream(&self) -> &LogStream {
        &self.stream
    }

    pub fn opened_at(&self) -> Timestamp {
        self.opened_at
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_kind_and_name() {
        assert_eq!(LogStream::build("build.log"), LogStream::build("build.log"));
        assert_ne!(LogStream::build("build.log"), LogStream::app("build.log"));
        assert_ne!(LogStream::app("app.log"), LogStream::app("messages.log"));
    }

    #[test]
    fn test_closing_a_clone_closes_the_handle() {
        let handle = LogStreamHandle::open(LogStream::app("app.log"), 7);
        let view = handle.clone();
        assert!(!view.is_closed());
        handle.close();
        assert!(view.is_closed());
        assert_eq!(view.opened_at(), 7);
    }
}
