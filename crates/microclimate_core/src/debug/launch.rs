use crate::types::{now_millis, Endpoint, Timestamp};
use crate::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Transient launch configuration written for one debug attachment.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchConfig {
    pub name: String,
    pub project_id: String,
    pub project_name: String,
    pub endpoint: Endpoint,
    pub created_at: Timestamp,
}

impl LaunchConfig {
    /// Launch name as shown to the user: `<project> [<host>:<port>]`.
    pub fn new(project_id: &str, project_name: &str, endpoint: Endpoint) -> Self {
        Self {
            name: format!(
                "{} [{}:{}]",
                project_name,
                endpoint.host(),
                endpoint.port()
            ),
            project_id: project_id.to_string(),
            project_name: project_name.to_string(),
            endpoint,
            created_at: now_millis(),
        }
    }
}

/// Registration of one debug launch. Not `Clone`: exactly one session owns it
/// and hands it back to the manager to release it.
#[derive(Debug)]
pub struct LaunchHandle {
    id: u64,
    name: String,
    config_path: Option<PathBuf>,
}

impl LaunchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub id: u64,
    pub name: String,
    pub project_id: String,
}

/// Registry of live debug launches, optionally persisting each launch
/// configuration as a JSON file under `launch_dir`.
#[derive(Debug)]
pub struct LaunchManager {
    launch_dir: Option<PathBuf>,
    next_id: AtomicU64,
    launches: Mutex<HashMap<u64, LaunchRecord>>,
}

impl LaunchManager {
    pub fn new(launch_dir: Option<PathBuf>) -> Self {
        Self {
            launch_dir,
            next_id: AtomicU64::new(1),
            launches: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Synchronous, so a caller stores the handle with no await point after
    /// registration.
    pub fn register(&self, config: &LaunchConfig) -> Result<LaunchHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let config_path = match &self.launch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let path = dir.join(format!("{}-{}.launch.json", sanitize(&config.project_name), id));
                let json = serde_json::to_vec_pretty(config)?;
                std::fs::write(&path, json)?;
                Some(path)
            }
            None => None,
        };

        self.lock().insert(
            id,
            LaunchRecord {
                id,
                name: config.name.clone(),
                project_id: config.project_id.clone(),
            },
        );
        tracing::debug!("Registered launch {} ({})", id, config.name);

        Ok(LaunchHandle {
            id,
            name: config.name.clone(),
            config_path,
        })
    }

    /// Deregisters the launch. Returns false if it was not registered.
    pub fn remove(&self, handle: &LaunchHandle) -> bool {
        let removed = self.lock().remove(&handle.id).is_some();
        if removed {
            tracing::debug!("Removed launch {} ({})", handle.id, handle.name);
        }
        removed
    }

    /// Deletes the persisted launch configuration, if one was written.
    pub fn delete_config(&self, handle: &LaunchHandle) -> Result<()> {
        if let Some(path) = &handle.config_path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn is_registered(&self, handle: &LaunchHandle) -> bool {
        self.lock().contains_key(&handle.id)
    }

    pub fn live_launches(&self) -> Vec<LaunchRecord> {
        let mut launches: Vec<_> = self.lock().values().cloned().collect();
        launches.sort_by_key(|l| l.id);
        launches
    }

    pub fn live_launches_for(&self, project_id: &str) -> Vec<LaunchRecord> {
        self.live_launches()
            .into_iter()
            .filter(|l| l.project_id == project_id)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, LaunchRecord>> {
        self.launches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
