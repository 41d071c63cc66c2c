use super::debug::{AttachState, DebugProtocol};
use super::log::{LogStream, WireLogs};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuildStatus {
    #[serde(alias = "queued")]
    InProgress,
    Success,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Starting,
    Started,
    Stopping,
    Stopped,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectKind {
    Liberty,
    Spring,
    Nodejs,
    Swift,
    Docker,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Nodejs,
    Swift,
    Python,
    Go,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ProjectType {
    pub kind: ProjectKind,
    pub language: Language,
}

impl ProjectType {
    pub fn new(kind: ProjectKind, language: Language) -> Self {
        Self { kind, language }
    }

    pub fn debug_protocol(&self) -> Option<DebugProtocol> {
        match self.language {
            Language::Java => Some(DebugProtocol::Jdwp),
            Language::Nodejs => Some(DebugProtocol::DevTools),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub supports_debug: bool,
    pub supports_debug_no_init: bool,
    pub can_restart: bool,
}

impl Capabilities {
    pub fn from_wire(wire: &WireCapabilities) -> Self {
        let has_mode = |mode: &str| wire.start_modes.iter().any(|m| m == mode);
        Self {
            supports_debug: has_mode("debug"),
            supports_debug_no_init: has_mode("debugNoInit"),
            can_restart: wire.control_commands.iter().any(|c| c == "restart"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCapabilities {
    #[serde(default)]
    pub start_modes: Vec<String>,
    #[serde(default)]
    pub control_commands: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePorts {
    #[serde(default, deserialize_with = "deserialize_port")]
    pub exposed_port: Option<u16>,
    #[serde(default, deserialize_with = "deserialize_port")]
    pub exposed_debug_port: Option<u16>,
}

/// One entry of the server's project list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(rename = "projectID")]
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub loc_on_disk: Option<String>,
    #[serde(default)]
    pub project_type: ProjectKind,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub build_status: BuildStatus,
    #[serde(default)]
    pub app_status: RunStatus,
    #[serde(default)]
    pub auto_build: Option<bool>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ports: WirePorts,
    #[serde(default)]
    pub capabilities: WireCapabilities,
    /// Logs the server reports for the project. Absent on older servers.
    #[serde(default)]
    pub logs: Option<WireLogs>,
}

impl ProjectInfo {
    pub fn project_type(&self) -> ProjectType {
        ProjectType::new(self.project_type, self.language)
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_wire(&self.capabilities)
    }

    /// Closed projects are disabled; anything else counts as open.
    pub fn enabled(&self) -> bool {
        self.state.as_deref() != Some("closed")
    }

    pub fn log_streams(&self) -> Vec<LogStream> {
        self.logs.as_ref().map(WireLogs::streams).unwrap_or_default()
    }
}

/// Point-in-time copy of one tracked application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppSnapshot {
    pub project_id: String,
    pub name: String,
    pub path: String,
    pub project_type: ProjectType,
    pub capabilities: Capabilities,
    pub build_status: BuildStatus,
    pub run_status: RunStatus,
    pub host: String,
    pub app_port: Option<u16>,
    pub debug_port: Option<u16>,
    pub enabled: bool,
    pub auto_build: bool,
    pub available_logs: Vec<LogStream>,
    pub attach_state: AttachState,
}

impl AppSnapshot {
    pub fn supports_debug(&self) -> bool {
        let kind_supported = matches!(
            self.project_type.kind,
            ProjectKind::Liberty | ProjectKind::Spring | ProjectKind::Nodejs
        );
        kind_supported
            && (self.capabilities.supports_debug || self.capabilities.supports_debug_no_init)
            && self.capabilities.can_restart
    }
}

fn deserialize_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse::<u16>().ok(),
        _ => None,
    })
}
