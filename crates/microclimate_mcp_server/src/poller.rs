use microclimate_core::types::now_millis;
use microclimate_core::{ops, ConnectionRegistry, McClient, McError, ReconcileReport, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fetches the project list once, reconciles the registry against it and
/// applies every project as notifications stamped with the poll time.
pub async fn refresh(client: &McClient, registry: &ConnectionRegistry) -> Result<ReconcileReport> {
    let polled_at = now_millis();
    let projects = ops::list_projects(client).await?;
    let report = registry.reconcile(&projects).await;

    for project in &projects {
        match registry.apply_project_info(project, polled_at).await {
            Ok(_) => {}
            // Removed by a concurrent reconcile.
            Err(McError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    if !report.is_empty() {
        tracing::info!(
            "Projects changed: {} added, {} removed",
            report.added.len(),
            report.removed.len()
        );
    }
    Ok(report)
}

/// Polls until `cancel` fires. Failures are logged and retried on the next
/// tick.
pub fn spawn(
    client: McClient,
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(MIN_POLL_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = refresh(&client, &registry).await {
                tracing::warn!(
                    "Failed to poll projects from {}: {}",
                    client.config().server_url,
                    e
                );
            }
        }
        tracing::debug!("Project poller stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use microclimate_core::types::RunStatus;
    use microclimate_core::{McConfig, ProbeResponse, RemoteProbe};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves whatever project list the test last set.
    struct FakeServer {
        projects: Mutex<Value>,
        polls: AtomicUsize,
    }

    impl FakeServer {
        fn new(projects: Value) -> Arc<Self> {
            Arc::new(Self {
                projects: Mutex::new(projects),
                polls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteProbe for FakeServer {
        async fn get(&self, _uri: &str, _timeout: Duration) -> Result<ProbeResponse> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(ProbeResponse::new(200, self.projects.lock().unwrap().to_string()))
        }

        async fn post(&self, _uri: &str, _body: Option<Value>, _timeout: Duration) -> Result<ProbeResponse> {
            Ok(ProbeResponse::new(202, ""))
        }
    }

    fn project(id: &str, app_status: &str) -> Value {
        json!({
            "projectID": id,
            "name": format!("app-{id}"),
            "projectType": "spring",
            "language": "java",
            "appStatus": app_status,
            "buildStatus": "success"
        })
    }

    fn setup(projects: Value) -> (Arc<FakeServer>, McClient, Arc<ConnectionRegistry>) {
        let server = FakeServer::new(projects);
        let config = McConfig::default();
        let client = McClient::with_probe(config.clone(), server.clone());
        let registry = Arc::new(ConnectionRegistry::from_config(server.clone(), &config));
        (server, client, registry)
    }

    #[tokio::test]
    async fn test_refresh_reconciles_and_applies() {
        let (server, client, registry) = setup(json!([project("a", "starting")]));

        let report = refresh(&client, &registry).await.unwrap();
        assert_eq!(report.added, vec!["a"]);
        let tracker = registry.lookup("a").await.unwrap();
        assert_eq!(tracker.snapshot().run_status, RunStatus::Starting);

        *server.projects.lock().unwrap() = json!([project("a", "started"), project("b", "stopped")]);
        let report = refresh(&client, &registry).await.unwrap();
        assert_eq!(report.added, vec!["b"]);
        assert_eq!(tracker.snapshot().run_status, RunStatus::Started);

        *server.projects.lock().unwrap() = json!([project("b", "stopped")]);
        let report = refresh(&client, &registry).await.unwrap();
        assert_eq!(report.removed, vec!["a"]);
        assert!(tracker.is_disposed());
    }

    #[tokio::test]
    async fn test_refresh_surfaces_bad_payload() {
        let (_server, client, registry) = setup(json!({ "not": "a list" }));
        assert!(refresh(&client, &registry).await.is_err());
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_ticks_until_cancelled() {
        let (server, client, registry) = setup(json!([project("a", "started")]));
        let cancel = CancellationToken::new();
        let handle = spawn(client, registry.clone(), Duration::from_secs(2), cancel.clone());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(server.polls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.project_ids().await, vec!["a"]);

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(server.polls.load(Ordering::SeqCst), 3);
    }
}
