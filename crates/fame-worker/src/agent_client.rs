//! Drives the Agent's six endpoints plus the plain liveness probe
//! `prepare()` needs before any task exists (§4.5 "Per-execution protocol",
//! "VM lifecycle"). Mirrors `fame-agent::task::ResultsPayload`'s wire shape
//! without depending on that crate — the Agent protocol is a wire contract,
//! not a shared Rust type.

use fame_core::{FameError, FameResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct InnerResults {
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub extractions: Vec<serde_json::Value>,
    #[serde(default)]
    pub iocs: Vec<serde_json::Value>,
    #[serde(default)]
    pub probable_names: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub generated_files: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub extracted_files: Vec<String>,
    #[serde(default)]
    pub support_files: Vec<String>,
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ResultsPayload {
    #[serde(default)]
    pub results: serde_json::Value,
    #[serde(rename = "_results", default)]
    pub inner: InnerResults,
    #[serde(default)]
    pub should_restore: bool,
}

pub struct AgentClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(ip_address: &str, port: u16) -> Self {
        AgentClient {
            http: reqwest::Client::new(),
            base_url: format!("http://{ip_address}:{port}"),
        }
    }

    /// The plain pre-task liveness check `prepare()` polls — distinct from
    /// the per-task `/{task}/ready` used during execution (step 4).
    pub async fn is_alive(&self) -> bool {
        self.http
            .get(format!("{}/status", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn new_task(&self) -> FameResult<String> {
        let resp = self
            .http
            .get(format!("{}/new_task", self.base_url))
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?;
        let body: serde_json::Value = resp.json().await.map_err(|e| FameError::Agent(e.to_string()))?;
        body["task_id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| FameError::Agent("new_task response missing task_id".to_string()))
    }

    pub async fn upload_module(&self, task_id: &str, module_bytes: Vec<u8>) -> FameResult<()> {
        self.http
            .post(format!("{}/{task_id}/module_update", self.base_url))
            .body(module_bytes)
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .error_for_status()
            .map_err(|e| FameError::Agent(e.to_string()))?;
        Ok(())
    }

    pub async fn send_module_info(
        &self,
        task_id: &str,
        name: &str,
        config: &HashMap<String, serde_json::Value>,
    ) -> FameResult<()> {
        self.http
            .post(format!("{}/{task_id}/module_update_info", self.base_url))
            .json(&serde_json::json!({ "name": name, "config": config }))
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .error_for_status()
            .map_err(|e| FameError::Agent(e.to_string()))?;
        Ok(())
    }

    pub async fn send_file_target(&self, task_id: &str, target_type: &str, path: &Path) -> FameResult<()> {
        let bytes = tokio::fs::read(path).await.map_err(FameError::Io)?;
        self.http
            .post(format!("{}/{task_id}/module_each/{target_type}", self.base_url))
            .body(bytes)
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .error_for_status()
            .map_err(|e| FameError::Agent(e.to_string()))?;
        Ok(())
    }

    pub async fn send_url_target(&self, task_id: &str, target_type: &str, url: &str) -> FameResult<()> {
        self.http
            .post(format!("{}/{task_id}/module_each/{target_type}", self.base_url))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(format!("data={url}"))
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .error_for_status()
            .map_err(|e| FameError::Agent(e.to_string()))?;
        Ok(())
    }

    /// Polls `/{task}/ready` every 5 seconds (§4.4/§5) until the Agent
    /// reports completion.
    pub async fn poll_until_ready(&self, task_id: &str) -> FameResult<()> {
        loop {
            let resp = self
                .http
                .get(format!("{}/{task_id}/ready", self.base_url))
                .send()
                .await
                .map_err(|e| FameError::Agent(e.to_string()))?;
            let body: serde_json::Value = resp.json().await.map_err(|e| FameError::Agent(e.to_string()))?;
            if body["ready"].as_bool().unwrap_or(false) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    pub async fn fetch_results(&self, task_id: &str) -> FameResult<ResultsPayload> {
        let resp = self
            .http
            .get(format!("{}/{task_id}/results", self.base_url))
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .error_for_status()
            .map_err(|e| FameError::Agent(e.to_string()))?;
        resp.json().await.map_err(|e| FameError::Agent(e.to_string()))
    }

    pub async fn download_artifact(&self, task_id: &str, filepath: &str, dest: &Path) -> FameResult<()> {
        let resp = self
            .http
            .post(format!("{}/{task_id}/get_file", self.base_url))
            .query(&[("filepath", filepath)])
            .send()
            .await
            .map_err(|e| FameError::Agent(e.to_string()))?
            .error_for_status()
            .map_err(|e| FameError::Agent(e.to_string()))?;
        let bytes = resp.bytes().await.map_err(|e| FameError::Agent(e.to_string()))?;
        tokio::fs::write(dest, &bytes).await.map_err(FameError::Io)?;
        Ok(())
    }
}
