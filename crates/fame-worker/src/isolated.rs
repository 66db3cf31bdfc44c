//! The VM-sandboxed execution path (§4.5 "IsolatedRunner / Agent
//! protocol", §5 "VM lock", §8 scenario 5). `IsolatedModule` is an
//! `ExecutableModule` like any worker-hosted one; what makes it isolated is
//! that `run()` acquires a `(driver,label)` lock, makes sure a VM is up and
//! answering, drives the Agent's per-task protocol, and releases the lock
//! according to the VM's `always_ready`/`restore_after` policy.

use crate::agent_client::AgentClient;
use crate::module_host::{ExecutableModule, ModuleTarget, ModuleVerdict};
use crate::vm_driver::VirtualizationDriver;
use async_trait::async_trait;
use fame_core::{FameError, FameResult};
use fame_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const STALE_LOCK_SECS: i64 = 120 * 60;
const LOCK_RETRY_INTERVAL: Duration = Duration::from_secs(15);
const VM_RESTORE_TIMEOUT: Duration = Duration::from_secs(120);
const VM_READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Label {
    pub name: String,
    pub ip_address: String,
    pub port: u16,
}

fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Acquires and releases one entry of the `internals.virtual_machines`
/// singleton document — a single JSON object with one sub-key per
/// `(driver,label)` pair, mutated through `Store::with_internal`'s
/// compare-and-set primitive so concurrent workers never both claim the
/// same VM (§5 "Shared-resource policy").
pub struct VmLock<S> {
    store: Arc<S>,
    key: String,
}

impl<S: Store> VmLock<S> {
    /// Tries every `(driver_name, label)` pair in declaration order each
    /// pass, sleeping 15 s between full passes over the list (§4.5
    /// "Allocation").
    pub async fn acquire(store: Arc<S>, driver_name: &str, labels: &[Label]) -> FameResult<(Self, Label)> {
        loop {
            for label in labels {
                let key = format!("{driver_name}|{}", label.name);
                let acquired = Self::try_claim(&store, &key).await?;
                if acquired {
                    return Ok((VmLock { store: store.clone(), key }, label.clone()));
                }
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn try_claim(store: &Arc<S>, key: &str) -> FameResult<bool> {
        let key = key.to_string();
        store
            .with_internal("virtual_machines", move |doc| {
                if !doc.is_object() {
                    *doc = serde_json::json!({});
                }
                let obj = doc.as_object_mut().expect("virtual_machines internal is always an object");
                let entry = obj
                    .entry(key.clone())
                    .or_insert_with(|| serde_json::json!({ "locked": false, "last_locked": 0 }));
                let locked = entry.get("locked").and_then(|v| v.as_bool()).unwrap_or(false);
                let last_locked = entry.get("last_locked").and_then(|v| v.as_i64()).unwrap_or(0);
                let stale = locked && now_epoch() - last_locked > STALE_LOCK_SECS;
                if !locked || stale {
                    entry["locked"] = serde_json::json!(true);
                    entry["last_locked"] = serde_json::json!(now_epoch());
                    true
                } else {
                    false
                }
            })
            .await
    }

    pub async fn release(self) -> FameResult<()> {
        let key = self.key.clone();
        self.store
            .with_internal("virtual_machines", move |doc| {
                if let Some(entry) = doc.get_mut(&key) {
                    entry["locked"] = serde_json::json!(false);
                }
            })
            .await
    }

    async fn increment_execution_count(&self) -> FameResult<u32> {
        let key = self.key.clone();
        self.store
            .with_internal("virtual_machines", move |doc| {
                let entry = doc
                    .as_object_mut()
                    .and_then(|obj| obj.get_mut(&key))
                    .expect("entry claimed by acquire() must exist");
                let count = entry.get("executions").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
                entry["executions"] = serde_json::json!(count);
                count as u32
            })
            .await
    }

    async fn reset_execution_count(&self) -> FameResult<()> {
        let key = self.key.clone();
        self.store
            .with_internal("virtual_machines", move |doc| {
                if let Some(entry) = doc.get_mut(&key) {
                    entry["executions"] = serde_json::json!(0);
                }
            })
            .await
    }
}

/// Pure decision extracted from §4.5 "VM lifecycle" so it is testable
/// without a live driver: whether the VM should be restored from snapshot
/// (vs. merely stopped) after this execution.
fn should_restore(always_ready: bool, executions_since_restore: u32, restore_after: u32, module_requested: bool) -> bool {
    if module_requested {
        return true;
    }
    if !always_ready {
        return false;
    }
    executions_since_restore >= restore_after
}

/// Ensures the VM behind `label` is running and its Agent is reachable
/// before any request (§4.5 "VM lifecycle"): if not, stop, restore the
/// snapshot, start, and poll the plain liveness probe up to 120 s.
async fn prepare(driver: &dyn VirtualizationDriver, label: &str, agent: &AgentClient) -> FameResult<()> {
    if driver.is_running(label).await? && agent.is_alive().await {
        return Ok(());
    }
    driver.stop(label).await.ok();
    driver.restore_snapshot(label).await?;
    driver.start(label).await?;

    let deadline = tokio::time::Instant::now() + VM_RESTORE_TIMEOUT;
    loop {
        if agent.is_alive().await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(FameError::Agent(format!("VM {label} did not become ready within {VM_RESTORE_TIMEOUT:?}")));
        }
        tokio::time::sleep(VM_READY_POLL_INTERVAL).await;
    }
}

fn parse_labels(config: &HashMap<String, serde_json::Value>) -> FameResult<Vec<Label>> {
    let csv = |key: &str| -> FameResult<Vec<String>> {
        Ok(config
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| FameError::Agent(format!("isolated module missing '{key}' config")))?
            .split(',')
            .map(|s| s.trim().to_string())
            .collect())
    };
    let names = csv("labels")?;
    let ips = csv("ip_addresses")?;
    let ports = csv("ports")?;
    if names.len() != ips.len() || names.len() != ports.len() {
        return Err(FameError::Agent("labels/ip_addresses/ports must have identical length".to_string()));
    }
    names
        .into_iter()
        .zip(ips)
        .zip(ports)
        .map(|((name, ip_address), port)| {
            let port = port
                .parse::<u16>()
                .map_err(|e| FameError::Agent(format!("invalid port '{port}': {e}")))?;
            Ok(Label { name, ip_address, port })
        })
        .collect()
}

pub struct IsolatedModule<S> {
    store: Arc<S>,
    drivers: Arc<HashMap<String, Arc<dyn VirtualizationDriver>>>,
    driver_name: String,
    labels: Vec<Label>,
    always_ready: bool,
    restore_after: u32,
    module_source_path: std::path::PathBuf,
    class_name: String,
}

impl<S: Store> IsolatedModule<S> {
    pub fn new(store: Arc<S>, drivers: Arc<HashMap<String, Arc<dyn VirtualizationDriver>>>) -> Self {
        IsolatedModule {
            store,
            drivers,
            driver_name: String::new(),
            labels: Vec::new(),
            always_ready: false,
            restore_after: 1,
            module_source_path: std::path::PathBuf::new(),
            class_name: String::new(),
        }
    }
}

#[async_trait]
impl<S: Store + Send + Sync + 'static> ExecutableModule for IsolatedModule<S> {
    async fn initialize(&mut self, config: &HashMap<String, serde_json::Value>) -> FameResult<()> {
        self.driver_name = config
            .get("virtualization_driver")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FameError::Agent("isolated module missing 'virtualization_driver' config".to_string()))?
            .to_string();
        self.labels = parse_labels(config)?;
        self.always_ready = config.get("always_ready").and_then(|v| v.as_bool()).unwrap_or(false);
        self.restore_after = config.get("restore_after").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
        self.module_source_path = config
            .get("module_source_path")
            .and_then(|v| v.as_str())
            .map(std::path::PathBuf::from)
            .ok_or_else(|| FameError::Agent("isolated module missing 'module_source_path' config".to_string()))?;
        self.class_name = config
            .get("class_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| FameError::Agent("isolated module missing 'class_name' config".to_string()))?
            .to_string();
        if !self.drivers.contains_key(&self.driver_name) {
            return Err(FameError::Agent(format!("no virtualization driver registered for '{}'", self.driver_name)));
        }
        Ok(())
    }

    async fn run(&mut self, target: &ModuleTarget<'_>) -> FameResult<ModuleVerdict> {
        let driver = self.drivers.get(&self.driver_name).expect("checked in initialize").clone();
        let (lock, label) = VmLock::acquire(self.store.clone(), &self.driver_name, &self.labels).await?;

        let outcome = self.run_on_label(driver.as_ref(), &label, target).await;
        let module_requested_restore = match &outcome {
            Ok((_, should_restore)) => *should_restore,
            Err(_) => false,
        };

        let executions = lock.increment_execution_count().await.unwrap_or(1);
        if should_restore(self.always_ready, executions, self.restore_after, module_requested_restore) {
            if let Err(e) = driver.restore_snapshot(&label.name).await {
                log::warn!("[ISOLATED] post-execution restore of {} failed: {e}", label.name);
            }
            let _ = lock.reset_execution_count().await;
        } else if !self.always_ready {
            if let Err(e) = driver.stop(&label.name).await {
                log::warn!("[ISOLATED] stop of {} failed: {e}", label.name);
            }
        }

        lock.release().await?;
        outcome.map(|(verdict, _)| verdict)
    }
}

impl<S: Store> IsolatedModule<S> {
    async fn run_on_label(
        &self,
        driver: &dyn VirtualizationDriver,
        label: &Label,
        target: &ModuleTarget<'_>,
    ) -> FameResult<(ModuleVerdict, bool)> {
        let agent = AgentClient::new(&label.ip_address, label.port);
        prepare(driver, &label.name, &agent).await?;

        let task_id = agent.new_task().await?;
        let module_bytes = tokio::fs::read(&self.module_source_path).await.map_err(FameError::Io)?;
        agent.upload_module(&task_id, module_bytes).await?;

        let mut config = HashMap::new();
        config.insert("class_name".to_string(), serde_json::json!(self.class_name));
        agent.send_module_info(&task_id, &self.class_name, &config).await?;

        match target {
            ModuleTarget::File { path, file_type } => {
                agent.send_file_target(&task_id, file_type, path).await?;
            }
            ModuleTarget::Url { url, file_type } => {
                agent.send_url_target(&task_id, file_type, url).await?;
            }
        }

        agent.poll_until_ready(&task_id).await?;
        let payload = agent.fetch_results(&task_id).await?;

        let verdict = ModuleVerdict {
            success: !payload.inner.logs.iter().any(|l| l.starts_with("could not") || l.starts_with("invalid")),
            result: payload.inner.result.clone(),
            tags: payload.inner.tags,
            generated_files: payload.inner.generated_files,
            probable_names: payload.inner.probable_names,
        };
        Ok((verdict, payload.should_restore))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fame_store::MemoryStore;

    #[test]
    fn restore_when_module_explicitly_requests_it() {
        assert!(should_restore(false, 0, 10, true));
    }

    #[test]
    fn restore_after_threshold_reached_with_always_ready() {
        assert!(should_restore(true, 5, 5, false));
        assert!(!should_restore(true, 4, 5, false));
    }

    #[test]
    fn never_auto_restores_without_always_ready() {
        assert!(!should_restore(false, 1000, 1, false));
    }

    #[tokio::test]
    async fn acquire_claims_the_first_free_label() {
        let store = Arc::new(MemoryStore::new());
        let labels = vec![
            Label { name: "vm1".into(), ip_address: "10.0.0.1".into(), port: 8081 },
            Label { name: "vm2".into(), ip_address: "10.0.0.2".into(), port: 8081 },
        ];
        let (lock, label) = VmLock::acquire(store.clone(), "proxmox", &labels).await.unwrap();
        assert_eq!(label.name, "vm1");
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn acquire_skips_a_held_label_and_takes_the_next() {
        let store = Arc::new(MemoryStore::new());
        let labels = vec![
            Label { name: "vm1".into(), ip_address: "10.0.0.1".into(), port: 8081 },
            Label { name: "vm2".into(), ip_address: "10.0.0.2".into(), port: 8081 },
        ];
        let (first_lock, first) = VmLock::acquire(store.clone(), "proxmox", &labels).await.unwrap();
        assert_eq!(first.name, "vm1");

        let (second_lock, second) = VmLock::acquire(store.clone(), "proxmox", &labels).await.unwrap();
        assert_eq!(second.name, "vm2");

        first_lock.release().await.unwrap();
        second_lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn a_stale_lock_can_be_stolen() {
        let store = Arc::new(MemoryStore::new());
        let labels = vec![Label { name: "vm1".into(), ip_address: "10.0.0.1".into(), port: 8081 }];

        store
            .with_internal("virtual_machines", |doc| {
                *doc = serde_json::json!({ "proxmox|vm1": { "locked": true, "last_locked": 0 } });
            })
            .await
            .unwrap();

        let (lock, label) = VmLock::acquire(store.clone(), "proxmox", &labels).await.unwrap();
        assert_eq!(label.name, "vm1");
        lock.release().await.unwrap();
    }
}
