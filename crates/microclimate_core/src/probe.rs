use crate::{McError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Status code and body of one HTTP exchange with the remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body: String,
}

impl ProbeResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into `McError::Http`.
    pub fn into_success(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(McError::Http {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// Thin access to the remote server. Implementations never retry and never
/// parse; retry policy belongs to the caller.
#[async_trait]
pub trait RemoteProbe: Send + Sync {
    async fn get(&self, uri: &str, timeout: Duration) -> Result<ProbeResponse>;

    async fn post(&self, uri: &str, body: Option<Value>, timeout: Duration) -> Result<ProbeResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpProbe {
    http_client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self> {
        let http_client = reqwest::Client::builder().build()?;
        Ok(Self { http_client })
    }

    async fn send(&self, request: reqwest::RequestBuilder, timeout: Duration) -> Result<ProbeResponse> {
        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                McError::Timeout(timeout)
            } else {
                McError::Connection(e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ProbeResponse { status, body })
    }
}

#[async_trait]
impl RemoteProbe for HttpProbe {
    async fn get(&self, uri: &str, timeout: Duration) -> Result<ProbeResponse> {
        tracing::debug!("GET {}", uri);
        self.send(self.http_client.get(uri), timeout).await
    }

    async fn post(&self, uri: &str, body: Option<Value>, timeout: Duration) -> Result<ProbeResponse> {
        tracing::debug!("POST {}", uri);
        let mut request = self.http_client.post(uri);
        if let Some(body) = body {
            request = request.json(&body);
        }
        self.send(request, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_probe_response_success_range() {
        assert!(ProbeResponse::new(200, "").is_success());
        assert!(ProbeResponse::new(204, "").is_success());
        assert!(!ProbeResponse::new(404, "").is_success());
        assert!(!ProbeResponse::new(500, "").is_success());
    }

    #[test]
    fn test_into_success_maps_http_error() {
        let err = ProbeResponse::new(503, "busy").into_success().unwrap_err();
        match err {
            McError::Http { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("Expected Http variant, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_http_probe_reads_status_and_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            let body = "[]";
            let reply = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
        });

        let probe = HttpProbe::new().unwrap();
        let response = probe
            .get(&format!("http://{addr}/json/list"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, "[]");
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new().unwrap();
        let err = probe
            .get(&format!("http://{addr}/json/list"), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_retryable(), "unexpected error: {err}");
    }
}
