use crate::{HttpProbe, McConfig, ProbeResponse, RemoteProbe, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// REST client for the Microclimate server's project API.
#[derive(Clone)]
pub struct McClient {
    config: McConfig,
    probe: Arc<dyn RemoteProbe>,
}

impl McClient {
    pub fn new(config: McConfig) -> Result<Self> {
        let probe = Arc::new(HttpProbe::new()?);
        Ok(Self::with_probe(config, probe))
    }

    pub fn with_probe(config: McConfig, probe: Arc<dyn RemoteProbe>) -> Self {
        Self { config, probe }
    }

    pub fn config(&self) -> &McConfig {
        &self.config
    }

    pub fn probe(&self) -> Arc<dyn RemoteProbe> {
        self.probe.clone()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.server_url.trim_end_matches('/'), path)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        tracing::debug!("Fetching {}", url);
        let response = self
            .probe
            .get(&url, self.config.request_timeout)
            .await?
            .into_success()?;
        Ok(serde_json::from_str(&response.body)?)
    }

    pub async fn post_json(&self, path: &str, body: Option<Value>) -> Result<ProbeResponse> {
        let url = self.url(path);
        tracing::debug!("Posting to {}", url);
        self.probe
            .post(&url, body, self.config.request_timeout)
            .await?
            .into_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedProbe;
    use crate::McError;
    use std::time::Duration;

    fn client(probe: Arc<ScriptedProbe>) -> McClient {
        McClient::with_probe(McConfig::new("http://mc.example:9090/", Duration::from_secs(1)), probe)
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = client(ScriptedProbe::new(vec![]));
        assert_eq!(client.url("/api/v1/projects"), "http://mc.example:9090/api/v1/projects");
    }

    #[tokio::test]
    async fn test_get_json_surfaces_http_errors() {
        let probe = ScriptedProbe::new(vec![Ok(ProbeResponse::new(500, "boom"))]);
        let err = client(probe).get_json::<Value>("/x").await.unwrap_err();
        assert!(matches!(err, McError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_get_json_rejects_malformed_body() {
        let probe = ScriptedProbe::new(vec![Ok(ProbeResponse::new(200, "not json"))]);
        let err = client(probe).get_json::<Value>("/x").await.unwrap_err();
        assert!(matches!(err, McError::Deserialize(_)));
    }
}
