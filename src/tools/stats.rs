use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use super::ToolBackend;

/// HTTP client for the statistics tool service.
///
/// Each tool is `POST {base_url}/tools/{endpoint}` with the JSON arguments as
/// body; the reply's `result` field is the tool output.
pub struct StatsServiceClient {
    client: reqwest::Client,
    base_url: String,
}

impl StatsServiceClient {
    pub fn from_env() -> Result<Self> {
        let base_url = dotenv::var("STATS_SERVICE_URL")
            .unwrap_or_else(|_| "http://localhost:8001".to_string());
        Self::new(base_url, Duration::from_secs(30))
    }

    pub fn new(base_url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        info!(base_url = %base_url, "Stats service client initialized");
        Ok(Self { client, base_url })
    }

    fn tool_url(&self, endpoint: &str) -> String {
        format!("{}/tools/{}", self.base_url.trim_end_matches('/'), endpoint)
    }
}

#[async_trait]
impl ToolBackend for StatsServiceClient {
    async fn invoke(&self, endpoint: &str, args: &Value) -> Result<Value> {
        let url = self.tool_url(endpoint);
        debug!(url = %url, "calling stats tool");

        let resp = self
            .client
            .post(&url)
            .json(args)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            bail!("stats service returned {}: {}", status, snippet);
        }

        let body: Value = resp.json().await.context("invalid JSON from stats service")?;
        Ok(body
            .get("result")
            .cloned()
            .unwrap_or_else(|| Value::String("No data available".to_string())))
    }
}
