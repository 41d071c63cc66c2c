//! Fakes shared by the unit tests.

use crate::debug::{DebugConnector, DebugTransport};
use crate::types::{AttachTarget, Endpoint};
use crate::{McError, ProbeResponse, RemoteProbe, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One scripted probe reply. Errors are kept as text so they can be replayed.
pub(crate) type Scripted = std::result::Result<ProbeResponse, String>;

/// Replays a script of replies in order; the last reply repeats forever.
pub(crate) struct ScriptedProbe {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<Option<Value>>>,
}

impl ScriptedProbe {
    pub(crate) fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            posted: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn requests(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn posted_bodies(&self) -> Vec<Option<Value>> {
        self.posted.lock().unwrap().clone()
    }

    fn next(&self) -> Option<Scripted> {
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl RemoteProbe for ScriptedProbe {
    async fn get(&self, uri: &str, _timeout: Duration) -> Result<ProbeResponse> {
        self.calls.lock().unwrap().push(format!("GET {uri}"));
        match self.next() {
            Some(reply) => reply.map_err(McError::InvalidResponse),
            None => Err(McError::InvalidResponse("no script".into())),
        }
    }

    async fn post(&self, uri: &str, body: Option<Value>, _timeout: Duration) -> Result<ProbeResponse> {
        self.calls.lock().unwrap().push(format!("POST {uri}"));
        self.posted.lock().unwrap().push(body);
        match self.next() {
            Some(reply) => reply.map_err(McError::InvalidResponse),
            None => Ok(ProbeResponse::new(202, "")),
        }
    }
}

/// Remote end of one fake debug link, observable and steerable from tests.
#[derive(Default)]
pub(crate) struct FakeLink {
    disconnected: AtomicBool,
    fail_disconnect: AtomicBool,
    disconnect_calls: AtomicUsize,
}

impl FakeLink {
    pub(crate) fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub(crate) fn fail_disconnect(&self) {
        self.fail_disconnect.store(true, Ordering::SeqCst);
    }

    pub(crate) fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

struct FakeTransport {
    link: Arc<FakeLink>,
}

#[async_trait]
impl DebugTransport for FakeTransport {
    async fn is_disconnected(&self) -> bool {
        self.link.disconnected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<()> {
        self.link.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.link.fail_disconnect.load(Ordering::SeqCst) {
            return Err(McError::InvalidResponse("dispose rejected".into()));
        }
        self.link.set_disconnected(true);
        Ok(())
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}

pub(crate) struct FakeConnector {
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
    links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeConnector {
    fn build(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail,
            calls: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn new() -> Arc<Self> {
        Self::build(Duration::ZERO, false)
    }

    pub(crate) fn with_delay(delay: Duration) -> Arc<Self> {
        Self::build(delay, false)
    }

    pub(crate) fn failing() -> Arc<Self> {
        Self::build(Duration::ZERO, true)
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The link made by the `index`th successful connect.
    pub(crate) fn link(&self, index: usize) -> Arc<FakeLink> {
        self.links.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl DebugConnector for FakeConnector {
    async fn connect(
        &self,
        target: &AttachTarget,
        _endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DebugTransport>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return Err(McError::Cancelled),
                _ = tokio::time::sleep(self.delay) => {}
            }
        }
        if self.fail {
            return Err(McError::attach_failure(&target.name, "connection refused"));
        }
        let link = Arc::new(FakeLink::default());
        self.links.lock().unwrap().push(link.clone());
        Ok(Box::new(FakeTransport { link }))
    }
}
