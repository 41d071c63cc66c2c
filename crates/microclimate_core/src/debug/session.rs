use super::launch::{LaunchConfig, LaunchHandle};
use super::transport::DebugTransport;
use super::DebugServices;
use crate::types::{AttachOutcome, AttachState, AttachTarget, Endpoint};
use crate::{McError, Result};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATE_EVENT_CAPACITY: usize = 32;

/// Called with every attach state the session publishes.
pub type StateObserver = Arc<dyn Fn(AttachState) + Send + Sync>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: AttachState,
    pub endpoint: Option<Endpoint>,
    pub launch_name: Option<String>,
}

/// Everything one attachment owns. Guarded by the session's async lock, so
/// attach, reconnect and dispose never interleave.
#[derive(Default)]
struct SessionSlot {
    target: Option<AttachTarget>,
    launch: Option<LaunchHandle>,
    transport: Option<Box<dyn DebugTransport>>,
}

struct SessionInner {
    app_name: String,
    services: DebugServices,
    slot: tokio::sync::Mutex<SessionSlot>,
    status: Mutex<SessionStatus>,
    events: broadcast::Sender<AttachState>,
    observer: Option<StateObserver>,
    in_flight: Mutex<Option<CancellationToken>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// At most one debugger attachment for one application.
///
/// States cycle `Idle -> Connecting -> Attached -> Disconnected -> Connecting`,
/// with `Connecting -> Failed -> Idle` when no attachment can be made. While
/// attached, a background health check notices silent loss of the remote
/// target and reconnects on its own.
#[derive(Clone)]
pub struct DebugSession {
    inner: Arc<SessionInner>,
}

impl DebugSession {
    pub fn new(app_name: impl Into<String>, services: DebugServices) -> Self {
        Self::with_observer(app_name, services, None)
    }

    pub fn with_observer(
        app_name: impl Into<String>,
        services: DebugServices,
        observer: Option<StateObserver>,
    ) -> Self {
        let (events, _) = broadcast::channel(STATE_EVENT_CAPACITY);
        Self {
            inner: Arc::new(SessionInner {
                app_name: app_name.into(),
                services,
                slot: tokio::sync::Mutex::new(SessionSlot::default()),
                status: Mutex::new(SessionStatus::default()),
                events,
                observer,
                in_flight: Mutex::new(None),
                monitor: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> AttachState {
        self.inner.status().state
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status().clone()
    }

    pub fn endpoint(&self) -> Option<Endpoint> {
        self.inner.status().endpoint.clone()
    }

    /// Every state transition, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<AttachState> {
        self.inner.events.subscribe()
    }

    /// Attaches unless a live attachment already exists. A stale attachment
    /// is torn down first, so two launches never coexist.
    pub async fn attach(&self, target: AttachTarget) -> Result<AttachOutcome> {
        let mut slot = self.inner.slot.lock().await;

        if let Some(transport) = slot.transport.as_ref() {
            if !transport.is_disconnected().await {
                if let Some(endpoint) = self.endpoint() {
                    tracing::debug!("Debugger already attached to {}", self.inner.app_name);
                    return Ok(AttachOutcome::AlreadyAttached(endpoint));
                }
            }
        }

        self.inner.stop_monitor(true);
        self.inner.clear(&mut slot).await;
        slot.target = Some(target.clone());
        self.inner.connect(&mut slot, target).await
    }

    /// On-demand health check. If the attached target was lost, tears the
    /// stale launch down and reconnects. Returns whether a reconnect ran.
    pub async fn check_health(&self) -> bool {
        self.inner.check_health(false).await
    }

    /// Restart hook: reconnects only if a launch exists and its transport is
    /// gone. Returns whether a reconnect ran.
    pub async fn reconnect_if_disconnected(&self) -> bool {
        if self.state() != AttachState::Attached {
            return false;
        }
        self.inner.check_health(false).await
    }

    /// Cancels an in-flight negotiation or connect.
    pub fn cancel(&self) {
        self.inner.cancel_in_flight();
    }

    /// Releases everything the session holds and returns it to `Idle`.
    /// Never fails: teardown problems are logged.
    pub async fn dispose(&self) {
        self.inner.cancel_in_flight();
        self.inner.stop_monitor(true);

        let mut slot = self.inner.slot.lock().await;
        self.inner.clear(&mut slot).await;
        slot.target = None;
        if self.state() != AttachState::Idle {
            self.inner.publish(AttachState::Idle, None, None);
        }
        tracing::debug!("Debug session for {} disposed", self.inner.app_name);
    }
}

impl SessionInner {
    fn status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: AttachState, endpoint: Option<Endpoint>, launch_name: Option<String>) {
        {
            let mut status = self.status();
            *status = SessionStatus {
                state,
                endpoint,
                launch_name,
            };
        }
        tracing::debug!("Debug session for {} is now {:?}", self.app_name, state);
        let _ = self.events.send(state);
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    fn cancel_in_flight(&self) {
        if let Some(token) = self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            token.cancel();
        }
    }

    /// Stops the health monitor. The monitor itself passes `abort = false` so
    /// it does not cancel the task it is running on.
    fn stop_monitor(&self, abort: bool) {
        let handle = self.monitor.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            if abort {
                handle.abort();
            }
        }
    }

    fn start_monitor(self: &Arc<Self>) {
        let interval = self.services.health_check_interval;
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.status().state != AttachState::Attached {
                    break;
                }
                if inner.check_health(true).await {
                    // The reconnect started a fresh monitor.
                    break;
                }
            }
        });

        let previous = self
            .monitor
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn check_health(self: &Arc<Self>, from_monitor: bool) -> bool {
        let mut slot = self.slot.lock().await;

        let Some(transport) = slot.transport.as_ref() else {
            return false;
        };
        if !transport.is_disconnected().await {
            return false;
        }
        let Some(target) = slot.target.clone() else {
            return false;
        };

        tracing::info!(
            "Debugger for {} lost its target ({}), reconnecting",
            self.app_name,
            transport.describe()
        );
        self.publish(AttachState::Disconnected, None, None);
        self.stop_monitor(!from_monitor);
        self.clear(&mut slot).await;

        if let Err(e) = self.connect(&mut slot, target).await {
            tracing::warn!("Reconnecting the debugger for {} failed: {}", self.app_name, e);
        }
        true
    }

    async fn connect(self: &Arc<Self>, slot: &mut SessionSlot, target: AttachTarget) -> Result<AttachOutcome> {
        let cancel = CancellationToken::new();
        *self.in_flight.lock().unwrap_or_else(|e| e.into_inner()) = Some(cancel.clone());
        self.publish(AttachState::Connecting, None, None);

        let result = self.establish(&target, &cancel).await;
        *self.in_flight.lock().unwrap_or_else(|e| e.into_inner()) = None;

        match result {
            Ok((endpoint, transport, launch)) => {
                let launch_name = launch.name().to_string();
                slot.transport = Some(transport);
                slot.launch = Some(launch);
                self.publish(AttachState::Attached, Some(endpoint.clone()), Some(launch_name));
                self.start_monitor();
                tracing::info!("Debugger attached to {} at {}", self.app_name, endpoint);
                Ok(AttachOutcome::Attached(endpoint))
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::debug!("Debugger attach for {} cancelled", self.app_name);
                } else {
                    tracing::error!(
                        "An error occurred while trying to launch the debugger for project {}: {}",
                        self.app_name,
                        e
                    );
                }
                self.publish(AttachState::Failed, None, None);
                self.publish(AttachState::Idle, None, None);
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        target: &AttachTarget,
        cancel: &CancellationToken,
    ) -> Result<(Endpoint, Box<dyn DebugTransport>, LaunchHandle)> {
        let endpoint = self
            .services
            .negotiator
            .resolve(target, self.services.connect_timeout_secs, cancel)
            .await?;

        let transport = self
            .services
            .connector
            .connect(target, &endpoint, cancel)
            .await
            .map_err(|e| match e {
                McError::Cancelled | McError::AttachFailure { .. } => e,
                other => McError::attach_failure(&target.name, other.to_string()),
            })?;

        let config = LaunchConfig::new(&target.project_id, &target.name, endpoint.clone());
        match self.services.launches.register(&config) {
            Ok(launch) => Ok((endpoint, transport, launch)),
            Err(e) => {
                if let Err(teardown) = transport.disconnect().await {
                    tracing::error!(
                        "{}",
                        McError::teardown(&self.app_name, teardown.to_string())
                    );
                }
                Err(McError::attach_failure(&target.name, e.to_string()))
            }
        }
    }

    /// Disconnects the transport if it is still live, then deregisters the
    /// launch and deletes its configuration.
    async fn clear(&self, slot: &mut SessionSlot) {
        if let Some(transport) = slot.transport.take() {
            if !transport.is_disconnected().await {
                if let Err(e) = transport.disconnect().await {
                    tracing::error!(
                        "An error occurred while disconnecting the debugger: {}",
                        McError::teardown(&self.app_name, e.to_string())
                    );
                }
            }
        }

        if let Some(launch) = slot.launch.take() {
            self.services.launches.remove(&launch);
            if let Err(e) = self.services.launches.delete_config(&launch) {
                tracing::error!(
                    "An error occurred while deleting the launch configuration: {}",
                    McError::teardown(&self.app_name, e.to_string())
                );
            }
        }
    }
}
