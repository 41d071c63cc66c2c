use super::negotiator::current_target_identity;
use crate::types::{AttachTarget, Endpoint};
use crate::{McConfig, McError, RemoteProbe, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const JDWP_HANDSHAKE: &[u8] = b"JDWP-Handshake";
const JDWP_ATTEMPT_INTERVAL: Duration = Duration::from_millis(250);
const JDWP_MIN_ATTEMPTS: u64 = 2;
const JDWP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
// VirtualMachine.Dispose: command set 1, command 6, no payload.
const JDWP_DISPOSE_PACKET: [u8; 11] = [0, 0, 0, 11, 0, 0, 0, 1, 0, 1, 6];

/// A live debugger link to one remote runtime.
#[async_trait]
pub trait DebugTransport: Send + Sync {
    /// True once the remote end is gone, including silent loss such as a
    /// container restart without a clean detach.
    async fn is_disconnected(&self) -> bool;

    async fn disconnect(&self) -> Result<()>;

    fn describe(&self) -> String;
}

#[async_trait]
pub trait DebugConnector: Send + Sync {
    async fn connect(
        &self,
        target: &AttachTarget,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DebugTransport>>;
}

/// Production connector: JDWP over TCP for socket endpoints, and an
/// introspection-backed link for DevTools endpoints whose front-end runs
/// outside this process.
pub struct SocketConnector {
    probe: Arc<dyn RemoteProbe>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl SocketConnector {
    pub fn new(probe: Arc<dyn RemoteProbe>, config: &McConfig) -> Self {
        Self {
            probe,
            connect_timeout: config.debug_connect_timeout(),
            request_timeout: config.request_timeout,
        }
    }

    async fn connect_jdwp(
        &self,
        target: &AttachTarget,
        host: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DebugTransport>> {
        // Four attempts per second across the connect timeout.
        let attempts = (self.connect_timeout.as_millis() as u64 / JDWP_ATTEMPT_INTERVAL.as_millis() as u64)
            .max(JDWP_MIN_ATTEMPTS);
        let mut last_error = String::from("no attempt made");

        tracing::debug!(
            "Connecting JDWP debugger to {}:{} for {} ({} attempts)",
            host,
            port,
            target.name,
            attempts
        );

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                tracing::debug!("User cancelled debugger connecting for {}", target.name);
                return Err(McError::Cancelled);
            }

            match jdwp_handshake(host, port).await {
                Ok(stream) => {
                    tracing::info!("JDWP handshake with {}:{} succeeded", host, port);
                    return Ok(Box::new(JdwpTransport::new(stream, format!("jdwp://{host}:{port}"))));
                }
                Err(e) => {
                    if attempt % 8 == 0 {
                        tracing::debug!("Waiting for debugger attach to {}", target.name);
                    }
                    last_error = e.to_string();
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(McError::Cancelled),
                    _ = tokio::time::sleep(JDWP_ATTEMPT_INTERVAL) => {}
                }
            }
        }

        Err(McError::attach_failure(&target.name, last_error))
    }
}

#[async_trait]
impl DebugConnector for SocketConnector {
    async fn connect(
        &self,
        target: &AttachTarget,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn DebugTransport>> {
        match endpoint {
            Endpoint::Socket { host, port } => self.connect_jdwp(target, host, *port, cancel).await,
            Endpoint::DevTools {
                target_id,
                host,
                port,
                ..
            } => {
                if cancel.is_cancelled() {
                    return Err(McError::Cancelled);
                }
                let identity = current_target_identity(self.probe.as_ref(), host, *port, self.request_timeout)
                    .await
                    .map_err(|e| McError::attach_failure(&target.name, e.to_string()))?;
                Ok(Box::new(DevToolsTransport {
                    probe: self.probe.clone(),
                    host: host.clone(),
                    port: *port,
                    identity: target_id.clone().or(identity),
                    request_timeout: self.request_timeout,
                    detached: AtomicBool::new(false),
                }))
            }
        }
    }
}

async fn jdwp_handshake(host: &str, port: u16) -> Result<TcpStream> {
    let handshake = async {
        let mut stream = TcpStream::connect((host, port)).await?;
        stream.write_all(JDWP_HANDSHAKE).await?;
        let mut reply = [0u8; JDWP_HANDSHAKE.len()];
        stream.read_exact(&mut reply).await?;
        if reply != JDWP_HANDSHAKE {
            return Err(McError::InvalidResponse("Unexpected JDWP handshake reply".into()));
        }
        Ok::<TcpStream, McError>(stream)
    };

    tokio::time::timeout(JDWP_HANDSHAKE_TIMEOUT, handshake)
        .await
        .map_err(|_| McError::Timeout(JDWP_HANDSHAKE_TIMEOUT))?
}

/// JDWP link over one socket. The VM pushes event packets unprompted, so a
/// reader task drains them and records when the socket reaches EOF.
pub struct JdwpTransport {
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: CancellationToken,
    reader: JoinHandle<()>,
    label: String,
}

impl JdwpTransport {
    pub fn new(stream: TcpStream, label: String) -> Self {
        let (mut read_half, write_half) = stream.into_split();
        let closed = CancellationToken::new();
        let reader = tokio::spawn({
            let closed = closed.clone();
            let label = label.clone();
            async move {
                let mut buf = [0u8; 1024];
                loop {
                    match read_half.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => tracing::trace!("Discarded {} bytes of JDWP traffic from {}", n, label),
                        Err(e) => {
                            tracing::debug!("JDWP read from {} failed: {}", label, e);
                            break;
                        }
                    }
                }
                closed.cancel();
            }
        });

        Self {
            writer: Mutex::new(Some(write_half)),
            closed,
            reader,
            label,
        }
    }
}

impl Drop for JdwpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl DebugTransport for JdwpTransport {
    async fn is_disconnected(&self) -> bool {
        self.closed.is_cancelled() || self.writer.lock().await.is_none()
    }

    async fn disconnect(&self) -> Result<()> {
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        self.reader.abort();
        writer.write_all(&JDWP_DISPOSE_PACKET).await?;
        writer.shutdown().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

/// The DevTools front-end is a browser the user opens; this link only
/// watches the inspector. A vanished endpoint or a new target identity means
/// the runtime restarted. When the inspector lists neither an id nor a
/// front-end URL, only a vanished endpoint is detected.
pub struct DevToolsTransport {
    probe: Arc<dyn RemoteProbe>,
    host: String,
    port: u16,
    identity: Option<String>,
    request_timeout: Duration,
    detached: AtomicBool,
}

#[async_trait]
impl DebugTransport for DevToolsTransport {
    async fn is_disconnected(&self) -> bool {
        if self.detached.load(Ordering::SeqCst) {
            return true;
        }
        match current_target_identity(self.probe.as_ref(), &self.host, self.port, self.request_timeout).await {
            Ok(current) => match (&self.identity, current) {
                (Some(expected), Some(current)) => *expected != current,
                _ => false,
            },
            Err(e) => {
                tracing::debug!("Inspector at {}:{} unreachable: {}", self.host, self.port, e);
                true
            }
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.detached.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("devtools://{}:{}", self.host, self.port)
    }
}
