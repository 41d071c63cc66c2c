mod poller;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use microclimate_core::{
    ops,
    types::{now_millis, AttachOutcome, BuildStatus, LogKind, LogStream, RunStatus},
    ApplicationStateTracker, ConnectionRegistry, McClient, McConfig, McError,
};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters, ServerHandler},
    model::*,
    tool, tool_handler, tool_router, transport, ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_WAIT_POLL_SECS: u64 = 1;

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ListAppsParams {}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct AppParams {
    /// Project id or project name
    app: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct WaitForStateParams {
    app: String,
    /// One of starting, started, stopping, stopped
    #[serde(default)]
    run_status: Option<String>,
    /// One of inProgress, success, failed
    #[serde(default)]
    build_status: Option<String>,
    #[serde(default = "default_wait_timeout")]
    timeout_secs: u64,
    #[serde(default = "default_wait_poll")]
    poll_interval_secs: u64,
}

fn default_wait_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_SECS
}

fn default_wait_poll() -> u64 {
    DEFAULT_WAIT_POLL_SECS
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct LogParams {
    app: String,
    /// One of build, app, custom
    kind: String,
    name: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct SetFlagParams {
    app: String,
    enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct RefreshParams {}

fn to_mcp_error(context: &str, error: McError) -> McpError {
    let message = format!("{context}: {error}");
    match error {
        McError::NotFound(_) | McError::AttachNotAllowed { .. } | McError::Disposed(_) => {
            McpError::invalid_params(message, None)
        }
        _ => McpError::internal_error(message, None),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, McpError> {
    serde_json::to_value(value)
        .map_err(|e| McpError::internal_error(format!("Serialization failed: {e}"), None))
}

/// Parses a wire-format enum value, rejecting anything that would fall back
/// to the `Default` catch-all.
fn parse_wire<T>(field: &str, value: &str) -> Result<T, McpError>
where
    T: DeserializeOwned + Default + PartialEq,
{
    match serde_json::from_value::<T>(Value::String(value.to_string())) {
        Ok(parsed) if parsed != T::default() || value == "unknown" => Ok(parsed),
        _ => Err(McpError::invalid_params(
            format!("Invalid {field}: {value}"),
            None,
        )),
    }
}

fn parse_log_kind(value: &str) -> Result<LogKind, McpError> {
    serde_json::from_value(Value::String(value.to_string()))
        .map_err(|_| McpError::invalid_params(format!("Invalid log kind: {value}"), None))
}

fn outcome_json(outcome: &AttachOutcome) -> Value {
    let status = match outcome {
        AttachOutcome::Attached(_) => "attached",
        AttachOutcome::AlreadyAttached(_) => "already_attached",
    };
    json!({
        "status": status,
        "endpoint": outcome.endpoint(),
        "address": outcome.endpoint().to_string(),
    })
}

#[derive(Clone)]
struct MicroclimateMcpServer {
    tool_router: ToolRouter<Self>,
    client: McClient,
    registry: Arc<ConnectionRegistry>,
}

#[tool_router]
impl MicroclimateMcpServer {
    fn new(client: McClient, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            client,
            registry,
        }
    }

    async fn tracker(&self, app: &str) -> Result<ApplicationStateTracker, McpError> {
        self.registry
            .find(app)
            .await
            .map_err(|e| to_mcp_error("Lookup failed", e))
    }

    #[tool(description = "List every Microclimate project with its build, run and debug state")]
    async fn mc_list_apps(&self, _params: Parameters<ListAppsParams>) -> Result<CallToolResult, McpError> {
        let apps = self.registry.snapshots().await;
        Ok(CallToolResult::structured(json!({
            "count": apps.len(),
            "apps": to_json(&apps)?,
        })))
    }

    #[tool(description = "Show one project's state, debug session and open logs")]
    async fn mc_app_status(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let snapshot = tracker.snapshot();
        Ok(CallToolResult::structured(json!({
            "app": to_json(&snapshot)?,
            "supports_debug": snapshot.supports_debug(),
            "debug": to_json(&tracker.debug_session().status())?,
            "logs": to_json(&tracker.log_streams())?,
        })))
    }

    #[tool(description = "Attach a debugger to a started project (no-op if one is already attached)")]
    async fn mc_attach_debugger(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let outcome = tracker
            .attach_debugger()
            .await
            .map_err(|e| to_mcp_error("Attach failed", e))?;
        Ok(CallToolResult::structured(outcome_json(&outcome)))
    }

    #[tool(description = "Detach the project's debugger and delete its launch")]
    async fn mc_detach_debugger(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let was = tracker.debug_session().state();
        tracker.detach_debugger().await;
        Ok(CallToolResult::structured(json!({
            "detached": true,
            "previous_state": was,
        })))
    }

    #[tool(description = "Check whether a debugger could attach to the project right now")]
    async fn mc_can_attach_debugger(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        Ok(CallToolResult::structured(json!({
            "can_attach": tracker.can_attach_debugger().await,
        })))
    }

    #[tool(description = "Wait until a project reaches the given run and/or build status")]
    async fn mc_wait_for_state(&self, params: Parameters<WaitForStateParams>) -> Result<CallToolResult, McpError> {
        let params = params.0;
        let run_status = params
            .run_status
            .as_deref()
            .map(|s| parse_wire::<RunStatus>("run_status", s))
            .transpose()?;
        let build_status = params
            .build_status
            .as_deref()
            .map(|s| parse_wire::<BuildStatus>("build_status", s))
            .transpose()?;
        if run_status.is_none() && build_status.is_none() {
            return Err(McpError::invalid_params(
                "Give run_status, build_status or both",
                None,
            ));
        }

        let tracker = self.tracker(&params.app).await?;
        let started = tokio::time::Instant::now();
        let matched = tracker
            .wait_for_state(
                |s| {
                    run_status.map_or(true, |r| s.run_status == r)
                        && build_status.map_or(true, |b| s.build_status == b)
                },
                Duration::from_secs(params.timeout_secs),
                Duration::from_secs(params.poll_interval_secs),
            )
            .await;

        Ok(CallToolResult::structured(json!({
            "matched": matched,
            "waited_ms": started.elapsed().as_millis() as u64,
            "app": to_json(&tracker.snapshot())?,
        })))
    }

    #[tool(description = "Open (or reuse) a project log stream")]
    async fn mc_open_log(&self, params: Parameters<LogParams>) -> Result<CallToolResult, McpError> {
        let kind = parse_log_kind(&params.0.kind)?;
        let tracker = self.tracker(&params.0.app).await?;
        let handle = tracker
            .add_log_stream(LogStream::new(kind, params.0.name.clone()))
            .map_err(|e| to_mcp_error("Open log failed", e))?;
        Ok(CallToolResult::structured(json!({
            "stream": to_json(handle.stream())?,
            "opened_at": handle.opened_at(),
        })))
    }

    #[tool(description = "Close a project log stream (no-op if it is not open)")]
    async fn mc_close_log(&self, params: Parameters<LogParams>) -> Result<CallToolResult, McpError> {
        let kind = parse_log_kind(&params.0.kind)?;
        let tracker = self.tracker(&params.0.app).await?;
        let closed = tracker.remove_log_stream(&LogStream::new(kind, params.0.name.clone()));
        Ok(CallToolResult::structured(json!({ "closed": closed })))
    }

    #[tool(description = "Open every log the server reports for the project")]
    async fn mc_open_all_logs(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let handles = tracker
            .open_all_log_streams()
            .map_err(|e| to_mcp_error("Open logs failed", e))?;
        let streams = handles.iter().map(|h| h.stream().clone()).collect::<Vec<_>>();
        Ok(CallToolResult::structured(json!({
            "opened": to_json(&streams)?,
        })))
    }

    #[tool(description = "Close every open log stream of the project")]
    async fn mc_close_all_logs(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let closed = tracker.close_all_log_streams();
        Ok(CallToolResult::structured(json!({ "closed": closed })))
    }

    #[tool(description = "Request a build of the project")]
    async fn mc_build(&self, params: Parameters<AppParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let response = ops::request_build(&self.client, tracker.project_id())
            .await
            .map_err(|e| to_mcp_error("Build request failed", e))?;
        tracker.mark_build_requested();
        Ok(CallToolResult::structured(json!({
            "requested": true,
            "status": response.status,
            "app": to_json(&tracker.snapshot())?,
        })))
    }

    #[tool(description = "Enable or disable auto build for the project")]
    async fn mc_set_auto_build(&self, params: Parameters<SetFlagParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let enabled = params.0.enabled;
        ops::set_auto_build(&self.client, tracker.project_id(), enabled)
            .await
            .map_err(|e| to_mcp_error("Auto build request failed", e))?;
        tracker.set_auto_build(enabled, now_millis());
        Ok(CallToolResult::structured(json!({
            "auto_build": enabled,
            "app": to_json(&tracker.snapshot())?,
        })))
    }

    #[tool(description = "Enable (open) or disable (close) the project")]
    async fn mc_set_enabled(&self, params: Parameters<SetFlagParams>) -> Result<CallToolResult, McpError> {
        let tracker = self.tracker(&params.0.app).await?;
        let enabled = params.0.enabled;
        ops::set_enabled(&self.client, tracker.project_id(), enabled)
            .await
            .map_err(|e| to_mcp_error("Enable/disable request failed", e))?;
        tracker.set_enabled(enabled, now_millis());
        if !enabled {
            // A closed project has no running application to debug.
            tracker.detach_debugger().await;
        }
        Ok(CallToolResult::structured(json!({
            "enabled": enabled,
            "app": to_json(&tracker.snapshot())?,
        })))
    }

    #[tool(description = "Fetch the project list from the server now and reconcile")]
    async fn mc_refresh(&self, _params: Parameters<RefreshParams>) -> Result<CallToolResult, McpError> {
        let report = poller::refresh(&self.client, &self.registry)
            .await
            .map_err(|e| to_mcp_error("Refresh failed", e))?;
        Ok(CallToolResult::structured(json!({
            "added": report.added,
            "removed": report.removed,
            "tracked": self.registry.len().await,
        })))
    }
}

#[tool_handler]
impl ServerHandler for MicroclimateMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Microclimate MCP Server: project state tracking and debugger attach".into(),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries MCP frames.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = McConfig::from_env();
    let client = McClient::new(config.clone()).context("Failed to build HTTP client")?;
    let registry = Arc::new(ConnectionRegistry::from_config(client.probe(), &config));

    let cancel = CancellationToken::new();
    let poller = poller::spawn(
        client.clone(),
        registry.clone(),
        config.poll_interval,
        cancel.clone(),
    );

    let server = MicroclimateMcpServer::new(client, registry.clone());
    let transport = transport::stdio();

    tracing::info!("Starting Microclimate MCP Server for {} on stdio...", config.server_url);

    server.serve(transport).await?.waiting().await?;

    cancel.cancel();
    let _ = poller.await;
    registry.dispose_all().await;

    Ok(())
}
