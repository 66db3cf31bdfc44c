//! The collaborator a module's isolated-execution path drives to keep a VM
//! in the right state (§4.5 "VM lifecycle", §9 "Polymorphism over module
//! types" — a Virtualization module's `is_running/start/stop/
//! restore_snapshot` capability set). This core exposes the hook; concrete
//! hypervisor wiring is a collaborator, same split as the Store/Queue
//! traits.

use async_trait::async_trait;
use fame_core::FameResult;
use reqwest::Client;
use std::time::Duration;

#[async_trait]
pub trait VirtualizationDriver: Send + Sync {
    async fn is_running(&self, label: &str) -> FameResult<bool>;
    async fn start(&self, label: &str) -> FameResult<()>;
    async fn stop(&self, label: &str) -> FameResult<()>;
    async fn restore_snapshot(&self, label: &str) -> FameResult<()>;
}

/// Drives a Proxmox-style hypervisor API. A label is `node/vmid`, e.g.
/// `pve1/103`.
pub struct ProxmoxDriver {
    base_url: String,
    auth_header: String,
    http: Client,
}

impl ProxmoxDriver {
    pub fn new(url: &str, user: &str, token_id: &str, token_secret: &str) -> Self {
        let auth_header = format!("PVEAPIToken={user}!{token_id}={token_secret}");
        let base_url = if url.ends_with('/') {
            format!("{url}api2/json")
        } else {
            format!("{url}/api2/json")
        };
        ProxmoxDriver {
            base_url,
            auth_header,
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
        }
    }

    fn split_label(label: &str) -> FameResult<(&str, &str)> {
        label
            .split_once('/')
            .ok_or_else(|| fame_core::FameError::Agent(format!("malformed VM label '{label}', expected node/vmid")))
    }

    async fn vm_action(&self, label: &str, action: &str) -> FameResult<()> {
        let (node, vmid) = Self::split_label(label)?;
        let url = format!("{}/nodes/{node}/qemu/{vmid}/status/{action}", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| fame_core::FameError::Agent(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fame_core::FameError::Agent(format!("proxmox {action} on {label}: {}", resp.status())));
        }
        Ok(())
    }
}

#[async_trait]
impl VirtualizationDriver for ProxmoxDriver {
    async fn is_running(&self, label: &str) -> FameResult<bool> {
        let (node, vmid) = Self::split_label(label)?;
        let url = format!("{}/nodes/{node}/qemu/{vmid}/status/current", self.base_url);
        let resp = self
            .http
            .get(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| fame_core::FameError::Agent(e.to_string()))?;
        if !resp.status().is_success() {
            return Ok(false);
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| fame_core::FameError::Agent(e.to_string()))?;
        Ok(body["data"]["status"].as_str() == Some("running"))
    }

    async fn start(&self, label: &str) -> FameResult<()> {
        self.vm_action(label, "start").await
    }

    async fn stop(&self, label: &str) -> FameResult<()> {
        self.vm_action(label, "stop").await
    }

    async fn restore_snapshot(&self, label: &str) -> FameResult<()> {
        let (node, vmid) = Self::split_label(label)?;
        let url = format!("{}/nodes/{node}/qemu/{vmid}/snapshot/pristine/rollback", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Authorization", &self.auth_header)
            .send()
            .await
            .map_err(|e| fame_core::FameError::Agent(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(fame_core::FameError::Agent(format!("proxmox rollback on {label}: {}", resp.status())));
        }
        Ok(())
    }
}
