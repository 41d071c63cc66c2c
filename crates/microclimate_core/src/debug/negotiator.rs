use crate::types::{AttachTarget, DebugProtocol, Endpoint};
use crate::{McConfig, McError, RemoteProbe, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Path of the inspector's target list on the debug port.
pub const DEBUG_INFO_PATH: &str = "/json/list";

const WS_MARKER: &str = "ws=";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InspectorTarget {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    devtools_frontend_url: Option<String>,
}

/// Turns a debug port into a concrete attach endpoint, waiting for the
/// remote runtime to come up.
#[derive(Clone)]
pub struct DebugAttachNegotiator {
    probe: Arc<dyn RemoteProbe>,
    request_timeout: Duration,
    interval: Duration,
}

impl DebugAttachNegotiator {
    pub fn new(probe: Arc<dyn RemoteProbe>, config: &McConfig) -> Self {
        Self {
            probe,
            request_timeout: config.request_timeout,
            interval: config.negotiate_interval,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn probe(&self) -> &Arc<dyn RemoteProbe> {
        &self.probe
    }

    /// Picks the endpoint for the target's protocol. JDWP targets connect to
    /// the debug port as is; the JDWP connector owns their readiness retry.
    pub async fn resolve(
        &self,
        target: &AttachTarget,
        timeout_secs: i64,
        cancel: &CancellationToken,
    ) -> Result<Endpoint> {
        match target.protocol {
            DebugProtocol::Jdwp => {
                if cancel.is_cancelled() {
                    return Err(McError::Cancelled);
                }
                Ok(Endpoint::Socket {
                    host: target.host.clone(),
                    port: target.debug_port,
                })
            }
            DebugProtocol::DevTools => self.negotiate(target, timeout_secs, cancel).await,
        }
    }

    /// Polls the introspection endpoint up to `timeout_secs + 1` times. A
    /// timeout of zero or less makes exactly one attempt.
    pub async fn negotiate(
        &self,
        target: &AttachTarget,
        timeout_secs: i64,
        cancel: &CancellationToken,
    ) -> Result<Endpoint> {
        let uri = debug_info_uri(target);
        let attempts = timeout_secs.max(0) as u64 + 1;
        let mut last_error: Option<String> = None;

        tracing::debug!(
            "Negotiating debug endpoint for {} at {} ({} attempts)",
            target.name,
            uri,
            attempts
        );

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                tracing::debug!("Debug negotiation for {} cancelled", target.name);
                return Err(McError::Cancelled);
            }

            match self.attempt(target, &uri).await {
                Ok(endpoint) => {
                    tracing::info!(
                        "Debug endpoint for {} resolved on attempt {}: {}",
                        target.name,
                        attempt,
                        endpoint
                    );
                    return Ok(endpoint);
                }
                Err(e) => {
                    tracing::debug!(
                        "Debug endpoint attempt {}/{} for {} failed: {}",
                        attempt,
                        attempts,
                        target.name,
                        e
                    );
                    last_error = Some(e.to_string());
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Debug negotiation for {} cancelled", target.name);
                        return Err(McError::Cancelled);
                    }
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }

        tracing::error!(
            "Error getting debug information for the {} application: {}",
            target.name,
            last_error.as_deref().unwrap_or("no response")
        );
        Err(McError::DebugEndpointUnavailable {
            app: target.name.clone(),
            last_error,
        })
    }

    /// Single probe. False when no target is listed, or when the listed
    /// target has no front-end URL, which the inspector omits while another
    /// debugger is attached.
    pub async fn can_attach(&self, target: &AttachTarget) -> bool {
        let uri = debug_info_uri(target);
        let response = match self.probe.get(&uri, self.request_timeout).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                tracing::debug!(
                    "Debug information for {} returned status {}",
                    target.name,
                    response.status
                );
                return false;
            }
            Err(e) => {
                tracing::debug!(
                    "Failed to retrieve the debug information for {}: {}",
                    target.name,
                    e
                );
                return false;
            }
        };

        match first_target(&response.body) {
            Ok(info) => info
                .devtools_frontend_url
                .map(|url| !url.is_empty())
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    async fn attempt(&self, target: &AttachTarget, uri: &str) -> Result<Endpoint> {
        let response = self
            .probe
            .get(uri, self.request_timeout)
            .await?
            .into_success()?;
        let info = first_target(&response.body)?;
        let url = info.devtools_frontend_url.ok_or_else(|| {
            McError::InvalidResponse("Debug target has no devtoolsFrontendUrl".into())
        })?;
        let url = rewrite_ws_address(&url, &target.host, target.debug_port)?;

        Ok(Endpoint::DevTools {
            url,
            target_id: info.id,
            host: target.host.clone(),
            port: target.debug_port,
        })
    }
}

/// Identity of the inspector's current target: its id, or its front-end URL
/// when the runtime lists no id. A restarted runtime lists a new identity.
pub(crate) async fn current_target_identity(
    probe: &dyn RemoteProbe,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Option<String>> {
    let uri = format!("http://{host}:{port}{DEBUG_INFO_PATH}");
    let response = probe.get(&uri, timeout).await?.into_success()?;
    let target = first_target(&response.body)?;
    Ok(target.id.or(target.devtools_frontend_url))
}

fn debug_info_uri(target: &AttachTarget) -> String {
    format!(
        "http://{}:{}{}",
        target.host, target.debug_port, DEBUG_INFO_PATH
    )
}

fn first_target(body: &str) -> Result<InspectorTarget> {
    let mut targets: Vec<InspectorTarget> = serde_json::from_str(body)?;
    if targets.is_empty() {
        return Err(McError::InvalidResponse("No debug targets listed".into()));
    }
    Ok(targets.swap_remove(0))
}

/// Replaces the `host:port` after `ws=` with the externally reachable address.
/// The inspector reports its address on the server's internal network.
pub fn rewrite_ws_address(url: &str, host: &str, port: u16) -> Result<String> {
    let start = url
        .find(WS_MARKER)
        .map(|i| i + WS_MARKER.len())
        .ok_or_else(|| McError::InvalidResponse(format!("No ws= address in {url}")))?;
    let end = url[start..]
        .find('/')
        .map(|i| start + i)
        .ok_or_else(|| McError::InvalidResponse(format!("Malformed ws= address in {url}")))?;

    Ok(format!("{}{}:{}{}", &url[..start], host, port, &url[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedProbe};
    use crate::ProbeResponse;

    const FRONTEND_URL: &str = "chrome-devtools://devtools/bundled/js_app.html?experiments=true&v8only=true&ws=172.17.0.4:9229/5d1c-77aa";

    fn ready() -> Scripted {
        Ok(ProbeResponse::new(
            200,
            serde_json::json!([{ "id": "5d1c-77aa", "devtoolsFrontendUrl": FRONTEND_URL }]).to_string(),
        ))
    }

    fn refused() -> Scripted {
        Err("connection refused".into())
    }

    fn node_target() -> AttachTarget {
        AttachTarget {
            project_id: "p1".into(),
            name: "nodeapp".into(),
            host: "mc.example".into(),
            debug_port: 32771,
            protocol: DebugProtocol::DevTools,
        }
    }

    fn negotiator(probe: Arc<ScriptedProbe>) -> DebugAttachNegotiator {
        DebugAttachNegotiator::new(probe, &McConfig::default())
    }

    #[test]
    fn test_rewrite_ws_address() {
        let url = rewrite_ws_address(FRONTEND_URL, "mc.example", 32771).unwrap();
        assert_eq!(
            url,
            "chrome-devtools://devtools/bundled/js_app.html?experiments=true&v8only=true&ws=mc.example:32771/5d1c-77aa"
        );
    }

    #[test]
    fn test_rewrite_ws_address_rejects_malformed() {
        assert!(rewrite_ws_address("chrome-devtools://no-address", "h", 1).is_err());
        assert!(rewrite_ws_address("x?ws=10.0.0.1:9229", "h", 1).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_makes_one_attempt() {
        let probe = ScriptedProbe::new(vec![refused()]);
        let err = negotiator(probe.clone())
            .negotiate(&node_target(), 0, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(probe.calls(), 1);
        match err {
            McError::DebugEndpointUnavailable { app, last_error } => {
                assert_eq!(app, "nodeapp");
                assert!(last_error.unwrap().contains("connection refused"));
            }
            other => panic!("Expected DebugEndpointUnavailable, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_timeout_makes_one_attempt() {
        let probe = ScriptedProbe::new(vec![refused()]);
        let _ = negotiator(probe.clone())
            .negotiate(&node_target(), -3, &CancellationToken::new())
            .await;
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_timeout_plus_one_attempts() {
        let probe = ScriptedProbe::new(vec![Ok(ProbeResponse::new(404, "not yet"))]);
        let err = negotiator(probe.clone())
            .negotiate(&node_target(), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(probe.calls(), 4);
        match err {
            McError::DebugEndpointUnavailable { last_error, .. } => {
                assert_eq!(last_error.as_deref(), Some("HTTP error 404: not yet"));
            }
            other => panic!("Expected DebugEndpointUnavailable, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_failures_and_stops_probing() {
        let probe = ScriptedProbe::new(vec![
            refused(),
            Ok(ProbeResponse::new(200, "[]")),
            Ok(ProbeResponse::new(200, "not json")),
            ready(),
            refused(),
        ]);
        let endpoint = negotiator(probe.clone())
            .negotiate(&node_target(), 10, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(probe.calls(), 4);
        match endpoint {
            Endpoint::DevTools {
                url,
                target_id,
                host,
                port,
            } => {
                assert!(url.ends_with("ws=mc.example:32771/5d1c-77aa"));
                assert_eq!(target_id.as_deref(), Some("5d1c-77aa"));
                assert_eq!(host, "mc.example");
                assert_eq!(port, 32771);
            }
            other => panic!("Expected DevTools endpoint, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_frontend_url_is_retried() {
        let probe = ScriptedProbe::new(vec![
            Ok(ProbeResponse::new(200, r#"[{"id":"5d1c-77aa"}]"#)),
            ready(),
        ]);
        let endpoint = negotiator(probe.clone())
            .negotiate(&node_target(), 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(probe.calls(), 2);
        assert!(matches!(endpoint, Endpoint::DevTools { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_distinct_from_timeout() {
        let probe = ScriptedProbe::new(vec![refused()]);
        let cancel = CancellationToken::new();
        let negotiator = negotiator(probe.clone());
        let target = node_target();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { negotiator.negotiate(&target, 30, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_cancelled(), "unexpected error: {err}");
        assert!(probe.calls() < 31);
    }

    #[tokio::test]
    async fn test_jdwp_resolves_without_probing() {
        let probe = ScriptedProbe::new(vec![refused()]);
        let target = AttachTarget {
            protocol: DebugProtocol::Jdwp,
            debug_port: 7777,
            ..node_target()
        };
        let endpoint = negotiator(probe.clone())
            .resolve(&target, 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Socket {
                host: "mc.example".into(),
                port: 7777
            }
        );
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_can_attach() {
        let probe = ScriptedProbe::new(vec![ready()]);
        assert!(negotiator(probe).can_attach(&node_target()).await);

        // The inspector drops the front-end URL while a debugger is attached.
        let probe = ScriptedProbe::new(vec![Ok(ProbeResponse::new(
            200,
            r#"[{"id":"5d1c-77aa","devtoolsFrontendUrl":""}]"#,
        ))]);
        assert!(!negotiator(probe).can_attach(&node_target()).await);

        let probe = ScriptedProbe::new(vec![refused()]);
        let n = negotiator(probe.clone());
        assert!(!n.can_attach(&node_target()).await);
        assert_eq!(probe.calls(), 1);
    }
}
