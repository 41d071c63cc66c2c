use serde::Serialize;
use std::fmt;

/// How a debugger reaches a language runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugProtocol {
    /// Java: the debugger speaks JDWP directly to the debug port.
    Jdwp,
    /// Node.js: the attach address is discovered through the inspector's
    /// introspection endpoint.
    DevTools,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub project_id: String,
    pub name: String,
    pub host: String,
    pub debug_port: u16,
    pub protocol: DebugProtocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    Socket {
        host: String,
        port: u16,
    },
    DevTools {
        url: String,
        target_id: Option<String>,
        host: String,
        port: u16,
    },
}

impl Endpoint {
    pub fn host(&self) -> &str {
        match self {
            Self::Socket { host, .. } | Self::DevTools { host, .. } => host,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Socket { port, .. } | Self::DevTools { port, .. } => *port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket { host, port } => write!(f, "{host}:{port}"),
            Self::DevTools { url, .. } => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachState {
    #[default]
    Idle,
    Connecting,
    Attached,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached(Endpoint),
    AlreadyAttached(Endpoint),
}

impl AttachOutcome {
    pub fn endpoint(&self) -> &Endpoint {
        match self {
            Self::Attached(endpoint) | Self::AlreadyAttached(endpoint) => endpoint,
        }
    }
}
