use crate::debug::DebugServices;
use crate::tracker::ApplicationStateTracker;
use crate::types::{
    AppSnapshot, FieldChange, Notification, ProjectInfo, RegistryEvent, Timestamp,
};
use crate::{McConfig, McError, RemoteProbe, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

const EVENT_CAPACITY: usize = 64;

/// Project ids added and removed by one reconcile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Trackers for every project of one remote connection, keyed by project id.
pub struct ConnectionRegistry {
    services: DebugServices,
    trackers: RwLock<HashMap<String, ApplicationStateTracker>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl ConnectionRegistry {
    pub fn new(services: DebugServices) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            services,
            trackers: RwLock::new(HashMap::new()),
            events,
        }
    }

    pub fn from_config(probe: Arc<dyn RemoteProbe>, config: &McConfig) -> Self {
        Self::new(DebugServices::new(probe, config))
    }

    pub fn services(&self) -> &DebugServices {
        &self.services
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Brings the tracked set in line with the server's project list. New
    /// ids get a fresh tracker, vanished ids are removed and disposed, and
    /// surviving ids keep their tracker instance.
    pub async fn reconcile(&self, projects: &[ProjectInfo]) -> ReconcileReport {
        let incoming: HashSet<&str> = projects.iter().map(|p| p.project_id.as_str()).collect();

        let (mut added, removed) = {
            let mut trackers = self.trackers.write().await;

            let gone: Vec<String> = trackers
                .keys()
                .filter(|id| !incoming.contains(id.as_str()))
                .cloned()
                .collect();
            let removed: Vec<ApplicationStateTracker> =
                gone.iter().filter_map(|id| trackers.remove(id)).collect();

            let mut added = Vec::new();
            for info in projects {
                if !trackers.contains_key(&info.project_id) {
                    tracing::info!("Tracking new project {} ({})", info.name, info.project_id);
                    trackers.insert(
                        info.project_id.clone(),
                        ApplicationStateTracker::new(info, &self.services),
                    );
                    added.push(info.project_id.clone());
                }
            }
            (added, removed)
        };

        // Lookups no longer see removed trackers. Dispose waits for any
        // in-flight mutation on the tracker's own lock.
        let mut removed_ids = Vec::with_capacity(removed.len());
        for tracker in removed {
            tracing::info!("Project {} is gone, disposing its tracker", tracker.project_id());
            tracker.dispose().await;
            let _ = self.events.send(RegistryEvent::Removed {
                project_id: tracker.project_id().to_string(),
            });
            removed_ids.push(tracker.project_id().to_string());
        }
        for project_id in &added {
            let _ = self.events.send(RegistryEvent::Added {
                project_id: project_id.clone(),
            });
        }

        added.sort();
        removed_ids.sort();
        ReconcileReport {
            added,
            removed: removed_ids,
        }
    }

    pub async fn lookup(&self, project_id: &str) -> Result<ApplicationStateTracker> {
        self.trackers
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| McError::NotFound(project_id.to_string()))
    }

    pub async fn lookup_by_name(&self, name: &str) -> Result<ApplicationStateTracker> {
        self.trackers
            .read()
            .await
            .values()
            .find(|t| t.name() == name)
            .cloned()
            .ok_or_else(|| McError::NotFound(name.to_string()))
    }

    /// Id first, then name.
    pub async fn find(&self, id_or_name: &str) -> Result<ApplicationStateTracker> {
        match self.lookup(id_or_name).await {
            Ok(tracker) => Ok(tracker),
            Err(_) => self.lookup_by_name(id_or_name).await,
        }
    }

    pub async fn project_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.trackers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.trackers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.trackers.read().await.is_empty()
    }

    /// Snapshots of every tracked application, sorted by name.
    pub async fn snapshots(&self) -> Vec<AppSnapshot> {
        let trackers: Vec<_> = self.trackers.read().await.values().cloned().collect();
        let mut snapshots: Vec<_> = trackers.iter().map(|t| t.snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.project_id.cmp(&b.project_id)));
        snapshots
    }

    /// Routes one notification to its tracker. Returns whether it was
    /// accepted.
    pub async fn apply(&self, notification: &Notification) -> Result<bool> {
        let tracker = self.lookup(&notification.project_id).await?;
        Ok(tracker.apply(notification))
    }

    /// Applies a polled project as one notification per field, all stamped
    /// with `timestamp`. Returns the number of accepted notifications.
    pub async fn apply_project_info(&self, info: &ProjectInfo, timestamp: Timestamp) -> Result<usize> {
        let tracker = self.lookup(&info.project_id).await?;
        let accepted = project_info_changes(info)
            .into_iter()
            .map(|change| Notification::new(info.project_id.clone(), change, timestamp))
            .filter(|notification| tracker.apply(notification))
            .count();
        Ok(accepted)
    }

    /// Disposes every tracker. Used when the connection goes away.
    pub async fn dispose_all(&self) {
        let trackers: Vec<_> = self.trackers.write().await.drain().map(|(_, t)| t).collect();
        for tracker in trackers {
            tracker.dispose().await;
            let _ = self.events.send(RegistryEvent::Removed {
                project_id: tracker.project_id().to_string(),
            });
        }
        tracing::info!("Disposed all trackers");
    }
}

fn project_info_changes(info: &ProjectInfo) -> Vec<FieldChange> {
    let mut changes = vec![
        FieldChange::BuildStatus(info.build_status),
        FieldChange::RunStatus(info.app_status),
        FieldChange::AppPort(info.ports.exposed_port),
        FieldChange::DebugPort(info.ports.exposed_debug_port),
        FieldChange::Enabled(info.enabled()),
        FieldChange::Capabilities(info.capabilities()),
    ];
    if let Some(host) = &info.host {
        changes.push(FieldChange::Host(host.clone()));
    }
    if let Some(auto_build) = info.auto_build {
        changes.push(FieldChange::AutoBuild(auto_build));
    }
    if let Some(logs) = &info.logs {
        changes.push(FieldChange::Logs(logs.streams()));
    }
    changes
}
