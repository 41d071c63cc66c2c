use crate::debug::{DebugAttachNegotiator, DebugServices, DebugSession, StateObserver};
use crate::types::{
    now_millis, AppEvent, AppSnapshot, AttachOutcome, AttachState, AttachTarget, BuildStatus,
    Capabilities, DebugProtocol, FieldChange, LogStream, LogStreamHandle, Notification,
    ProjectInfo, ProjectType, RunStatus, Timestamp,
};
use crate::{McError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

const EVENT_CAPACITY: usize = 64;

/// A value together with the source timestamp it was set at.
#[derive(Debug, Clone)]
struct Stamped<T> {
    value: T,
    at: Timestamp,
}

impl<T: PartialEq> Stamped<T> {
    /// Seeded values carry timestamp zero so the first stamped update lands.
    fn seed(value: T) -> Self {
        Self { value, at: 0 }
    }

    /// Last writer wins by source timestamp; ties are accepted. Returns
    /// `None` for a stale offer, otherwise whether the value changed.
    fn offer(&mut self, value: T, at: Timestamp) -> Option<bool> {
        if at < self.at {
            return None;
        }
        let changed = self.value != value;
        self.value = value;
        self.at = at;
        Some(changed)
    }
}

struct TrackerState {
    name: String,
    path: String,
    project_type: ProjectType,
    capabilities: Stamped<Capabilities>,
    build_status: Stamped<BuildStatus>,
    run_status: Stamped<RunStatus>,
    host: Stamped<String>,
    app_port: Stamped<Option<u16>>,
    debug_port: Stamped<Option<u16>>,
    enabled: Stamped<bool>,
    auto_build: Stamped<bool>,
    available_logs: Stamped<Vec<LogStream>>,
    log_streams: HashMap<LogStream, LogStreamHandle>,
    disposed: bool,
}

impl TrackerState {
    fn from_info(info: &ProjectInfo) -> Self {
        Self {
            name: info.name.clone(),
            path: info.loc_on_disk.clone().unwrap_or_else(|| info.name.clone()),
            project_type: info.project_type(),
            capabilities: Stamped::seed(info.capabilities()),
            build_status: Stamped::seed(info.build_status),
            run_status: Stamped::seed(info.app_status),
            host: Stamped::seed(info.host.clone().unwrap_or_default()),
            app_port: Stamped::seed(info.ports.exposed_port),
            debug_port: Stamped::seed(info.ports.exposed_debug_port),
            enabled: Stamped::seed(info.enabled()),
            auto_build: Stamped::seed(info.auto_build.unwrap_or(true)),
            available_logs: Stamped::seed(info.log_streams()),
            log_streams: HashMap::new(),
            disposed: false,
        }
    }

    fn offer(&mut self, change: &FieldChange, at: Timestamp) -> Option<bool> {
        match change.clone() {
            FieldChange::BuildStatus(v) => self.build_status.offer(v, at),
            FieldChange::RunStatus(v) => self.run_status.offer(v, at),
            FieldChange::Host(v) => self.host.offer(v, at),
            FieldChange::AppPort(v) => self.app_port.offer(v, at),
            FieldChange::DebugPort(v) => self.debug_port.offer(v, at),
            FieldChange::Enabled(v) => self.enabled.offer(v, at),
            FieldChange::AutoBuild(v) => self.auto_build.offer(v, at),
            FieldChange::Capabilities(v) => self.capabilities.offer(v, at),
            FieldChange::Logs(v) => self.available_logs.offer(v, at),
        }
    }
}

struct TrackerInner {
    project_id: String,
    state: Mutex<TrackerState>,
    session: DebugSession,
    negotiator: DebugAttachNegotiator,
    events: broadcast::Sender<AppEvent>,
    version: Arc<watch::Sender<u64>>,
}

/// Authoritative state of one remote application.
///
/// Remote notifications may arrive out of order; every field keeps the value
/// with the newest source timestamp. Reads hand out owned snapshots. The
/// state lock is never held across an await point.
#[derive(Clone)]
pub struct ApplicationStateTracker {
    inner: Arc<TrackerInner>,
}

impl ApplicationStateTracker {
    pub fn new(info: &ProjectInfo, services: &DebugServices) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let version = Arc::new(watch::channel(0u64).0);

        let observer: StateObserver = {
            let events = events.clone();
            let version = version.clone();
            let project_id = info.project_id.clone();
            Arc::new(move |state: AttachState| {
                version.send_modify(|v| *v += 1);
                let _ = events.send(AppEvent::AttachStateChanged {
                    project_id: project_id.clone(),
                    state,
                });
            })
        };

        Self {
            inner: Arc::new(TrackerInner {
                project_id: info.project_id.clone(),
                state: Mutex::new(TrackerState::from_info(info)),
                session: DebugSession::with_observer(info.name.clone(), services.clone(), Some(observer)),
                negotiator: services.negotiator.clone(),
                events,
                version,
            }),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lock().disposed
    }

    pub fn debug_session(&self) -> &DebugSession {
        &self.inner.session
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let state = self.lock();
        AppSnapshot {
            project_id: self.inner.project_id.clone(),
            name: state.name.clone(),
            path: state.path.clone(),
            project_type: state.project_type,
            capabilities: state.capabilities.value,
            build_status: state.build_status.value,
            run_status: state.run_status.value,
            host: state.host.value.clone(),
            app_port: state.app_port.value,
            debug_port: state.debug_port.value,
            enabled: state.enabled.value,
            auto_build: state.auto_build.value,
            available_logs: state.available_logs.value.clone(),
            attach_state: self.inner.session.state(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.inner.events.subscribe()
    }

    pub fn set_build_status(&self, status: BuildStatus, timestamp: Timestamp) -> bool {
        self.apply_change(FieldChange::BuildStatus(status), timestamp)
    }

    pub fn set_run_status(&self, status: RunStatus, timestamp: Timestamp) -> bool {
        self.apply_change(FieldChange::RunStatus(status), timestamp)
    }

    pub fn set_auto_build(&self, enabled: bool, timestamp: Timestamp) -> bool {
        self.apply_change(FieldChange::AutoBuild(enabled), timestamp)
    }

    pub fn set_enabled(&self, enabled: bool, timestamp: Timestamp) -> bool {
        self.apply_change(FieldChange::Enabled(enabled), timestamp)
    }

    /// Optimistic local mark after the user requests a build. The server's
    /// next newer report replaces it.
    pub fn mark_build_requested(&self) -> bool {
        self.set_build_status(BuildStatus::InProgress, now_millis())
    }

    /// Applies one notification addressed to this application.
    pub fn apply(&self, notification: &Notification) -> bool {
        if notification.project_id != self.inner.project_id {
            tracing::warn!(
                "Ignoring notification for {} sent to tracker {}",
                notification.project_id,
                self.inner.project_id
            );
            return false;
        }
        self.apply_change(notification.change.clone(), notification.timestamp)
    }

    /// Returns whether the change was accepted. Stale changes and changes
    /// after dispose are dropped.
    fn apply_change(&self, change: FieldChange, timestamp: Timestamp) -> bool {
        let (changed, became_started) = {
            let mut state = self.lock();
            if state.disposed {
                return false;
            }
            let was_started = state.run_status.value == RunStatus::Started;
            let Some(changed) = state.offer(&change, timestamp) else {
                tracing::debug!(
                    "Dropping stale {:?} for {} (ts {} < {})",
                    change,
                    self.inner.project_id,
                    timestamp,
                    stored_at(&state, &change)
                );
                return false;
            };
            let became_started = !was_started && state.run_status.value == RunStatus::Started;
            (changed, became_started)
        };

        if changed {
            tracing::info!("{} {:?}", self.inner.project_id, change);
            self.inner.version.send_modify(|v| *v += 1);
            let _ = self.inner.events.send(AppEvent::Changed {
                project_id: self.inner.project_id.clone(),
                change,
            });
        }

        if became_started && self.inner.session.state() == AttachState::Attached {
            self.spawn_reconnect();
        }
        true
    }

    /// A restarted application may have dropped the debugger without a
    /// clean detach.
    fn spawn_reconnect(&self) {
        let session = self.inner.session.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    session.reconnect_if_disconnected().await;
                });
            }
            Err(_) => tracing::warn!(
                "No runtime to reconnect the debugger for {}",
                self.inner.project_id
            ),
        }
    }

    /// Waits until `predicate` holds for the current snapshot. Wakes on every
    /// accepted change and at least every `poll_interval`. Returns false on
    /// timeout.
    pub async fn wait_for_state<F>(&self, predicate: F, timeout: Duration, poll_interval: Duration) -> bool
    where
        F: Fn(&AppSnapshot) -> bool,
    {
        self.wait_for_state_cancellable(predicate, timeout, poll_interval, &CancellationToken::new())
            .await
            .unwrap_or(false)
    }

    pub async fn wait_for_state_cancellable<F>(
        &self,
        predicate: F,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<bool>
    where
        F: Fn(&AppSnapshot) -> bool,
    {
        let mut version = self.inner.version.subscribe();
        // No deadline when the timeout is beyond what an Instant can hold.
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        let poll_interval = if poll_interval.is_zero() { timeout } else { poll_interval };

        loop {
            version.borrow_and_update();
            if predicate(&self.snapshot()) {
                return Ok(true);
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = tokio::time::Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    poll_interval.min(deadline - now)
                }
                None => poll_interval,
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(McError::Cancelled),
                _ = version.changed() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Attaches a debugger. Only allowed when the application is enabled,
    /// supports debug, is started and has a debug port.
    pub async fn attach_debugger(&self) -> Result<AttachOutcome> {
        let target = self.attach_target()?;
        let outcome = self.inner.session.attach(target).await?;

        // Disposed while attaching: release what the attach just acquired.
        if self.is_disposed() {
            self.inner.session.dispose().await;
            return Err(McError::Disposed(self.inner.project_id.clone()));
        }
        Ok(outcome)
    }

    pub async fn detach_debugger(&self) {
        self.inner.session.dispose().await;
    }

    /// Whether an attach could succeed right now. DevTools runtimes accept one
    /// debugger at a time, which their introspection endpoint reveals.
    pub async fn can_attach_debugger(&self) -> bool {
        let Ok(target) = self.attach_target() else {
            return false;
        };
        match target.protocol {
            DebugProtocol::DevTools => self.inner.negotiator.can_attach(&target).await,
            DebugProtocol::Jdwp => !matches!(
                self.inner.session.state(),
                AttachState::Attached | AttachState::Connecting
            ),
        }
    }

    fn attach_target(&self) -> Result<AttachTarget> {
        if self.is_disposed() {
            return Err(McError::Disposed(self.inner.project_id.clone()));
        }
        let snapshot = self.snapshot();
        let not_allowed = |reason: &str| McError::attach_not_allowed(&snapshot.name, reason);

        if !snapshot.enabled {
            return Err(not_allowed("the project is disabled"));
        }
        if !snapshot.supports_debug() {
            return Err(not_allowed("the project does not support debug mode"));
        }
        if snapshot.run_status != RunStatus::Started {
            return Err(not_allowed("the application is not started"));
        }
        let Some(debug_port) = snapshot.debug_port else {
            return Err(not_allowed("no debug port is exposed"));
        };
        let Some(protocol) = snapshot.project_type.debug_protocol() else {
            return Err(not_allowed("no debugger is available for this language"));
        };

        Ok(AttachTarget {
            project_id: snapshot.project_id.clone(),
            name: snapshot.name.clone(),
            host: snapshot.host.clone(),
            debug_port,
            protocol,
        })
    }

    /// Opens a log stream, or returns the open handle with the same identity.
    pub fn add_log_stream(&self, stream: LogStream) -> Result<LogStreamHandle> {
        let mut state = self.lock();
        if state.disposed {
            return Err(McError::Disposed(self.inner.project_id.clone()));
        }
        let handle = state
            .log_streams
            .entry(stream.clone())
            .or_insert_with(|| {
                tracing::debug!("Opened log {:?} for {}", stream, self.inner.project_id);
                LogStreamHandle::open(stream, now_millis())
            })
            .clone();
        Ok(handle)
    }

    /// Closes and forgets a log stream. Absent streams are ignored.
    pub fn remove_log_stream(&self, stream: &LogStream) -> bool {
        let removed = self.lock().log_streams.remove(stream);
        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn get_log_stream(&self, stream: &LogStream) -> Option<LogStreamHandle> {
        self.lock().log_streams.get(stream).cloned()
    }

    /// Logs the server reports for this application.
    pub fn available_logs(&self) -> Vec<LogStream> {
        self.lock().available_logs.value.clone()
    }

    /// Opens every log the server reports, reusing streams already open.
    pub fn open_all_log_streams(&self) -> Result<Vec<LogStreamHandle>> {
        let mut state = self.lock();
        if state.disposed {
            return Err(McError::Disposed(self.inner.project_id.clone()));
        }
        let available = state.available_logs.value.clone();
        let opened_at = now_millis();
        let handles = available
            .into_iter()
            .map(|stream| {
                state
                    .log_streams
                    .entry(stream.clone())
                    .or_insert_with(|| LogStreamHandle::open(stream, opened_at))
                    .clone()
            })
            .collect::<Vec<_>>();
        tracing::debug!("Opened {} logs for {}", handles.len(), self.inner.project_id);
        Ok(handles)
    }

    /// Closes every open log stream. Returns how many were closed.
    pub fn close_all_log_streams(&self) -> usize {
        let handles: Vec<LogStreamHandle> = self.lock().log_streams.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.close();
        }
        handles.len()
    }

    pub fn log_streams(&self) -> Vec<LogStream> {
        let mut streams: Vec<_> = self.lock().log_streams.keys().cloned().collect();
        streams.sort();
        streams
    }

    /// Closes every log stream and releases the debug session. Afterwards all
    /// mutators are no-ops. Idempotent.
    pub async fn dispose(&self) {
        let handles: Vec<LogStreamHandle> = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.log_streams.drain().map(|(_, handle)| handle).collect()
        };

        for handle in &handles {
            handle.close();
        }
        self.inner.session.dispose().await;

        self.inner.version.send_modify(|v| *v += 1);
        let _ = self.inner.events.send(AppEvent::Disposed {
            project_id: self.inner.project_id.clone(),
        });
        tracing::info!("Disposed tracker for {}", self.inner.project_id);
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn stored_at(state: &TrackerState, change: &FieldChange) -> Timestamp {
    match change {
        FieldChange::BuildStatus(_) => state.build_status.at,
        FieldChange::RunStatus(_) => state.run_status.at,
        FieldChange::Host(_) => state.host.at,
        FieldChange::AppPort(_) => state.app_port.at,
        FieldChange::DebugPort(_) => state.debug_port.at,
        FieldChange::Enabled(_) => state.enabled.at,
        FieldChange::AutoBuild(_) => state.auto_build.at,
        FieldChange::Capabilities(_) => state.capabilities.at,
        FieldChange::Logs(_) => state.available_logs.at,
    }
}
