mod agent_client;
mod cleaner;
mod config;
mod files;
mod isolated;
mod module_host;
mod remote;
mod vm_driver;
mod worker;

use clap::Parser;
use config::{WorkerConfig, WorkerMode};
use fame_dispatcher::ModuleCatalog;
use fame_store::{PgQueue, PgStore, Store};
use files::FileAccess;
use module_host::ModuleHost;
use remote::RemoteClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use vm_driver::{ProxmoxDriver, VirtualizationDriver};
use worker::Worker;

/// Builds the registry of `ModuleInfo::effective_value("virtualization_driver")`
/// names an isolated module can select (§4.5). Empty unless a Proxmox
/// hypervisor is configured via env; a deployment wanting a different
/// hypervisor registers another driver here the same way.
fn build_drivers() -> HashMap<String, Arc<dyn VirtualizationDriver>> {
    let mut drivers: HashMap<String, Arc<dyn VirtualizationDriver>> = HashMap::new();
    if let (Ok(url), Ok(user), Ok(token_id), Ok(token_secret)) = (
        std::env::var("PROXMOX_URL"),
        std::env::var("PROXMOX_USER"),
        std::env::var("PROXMOX_TOKEN_ID"),
        std::env::var("PROXMOX_TOKEN_SECRET"),
    ) {
        drivers.insert("proxmox".to_string(), Arc::new(ProxmoxDriver::new(&url, &user, &token_id, &token_secret)));
    }
    drivers
}

/// `worker [queues...] [--celery_args STR] [--refresh_interval SEC]` (§6.4).
#[derive(Parser, Debug)]
#[command(name = "fame-worker")]
struct Cli {
    /// Queue names to pull tasks from. Defaults to the platform queue
    /// (`windows`/`unix`); a local worker additionally joins `updates`.
    queues: Vec<String>,

    /// Opaque arguments forwarded to module dependency installation,
    /// unexamined by this crate beyond being logged at startup.
    #[arg(long)]
    celery_args: Option<String>,

    #[arg(long, default_value_t = 60)]
    refresh_interval: u64,
}

async fn run_consumer<S: fame_store::Store + 'static, Q: fame_store::Queue + 'static>(
    worker: Arc<Worker<S, Q>>,
    queues: Vec<String>,
) {
    loop {
        let mut found_any = false;
        for queue_name in &queues {
            match worker.pull_and_run(queue_name).await {
                Ok(true) => found_any = true,
                Ok(false) => {}
                Err(e) => log::error!("[WORKER] queue {queue_name} error: {e}"),
            }
        }
        if !found_any {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

/// §6.4: on each refresh interval, poll `internals.updates.last_update`;
/// when it has advanced, restart the task-consumer subprocess after
/// re-installing module dependencies. Here "subprocess" is a spawned task
/// rather than an OS process, and "re-installing dependencies" is the
/// `celery_args`-driven hook a deployment wires up; this crate logs the
/// step and restarts the consumer loop against a freshly reloaded catalog.
async fn supervise<S: fame_store::Store + 'static, Q: fame_store::Queue + 'static>(
    worker: Arc<Worker<S, Q>>,
    queues: Vec<String>,
    refresh_interval: Duration,
    celery_args: Option<String>,
) {
    let mut consumer = tokio::spawn(run_consumer(worker.clone(), queues.clone()));
    let mut last_update: Option<String> = worker
        .store
        .get_internal("updates")
        .await
        .ok()
        .flatten()
        .and_then(|v| v.get("last_update").and_then(|lu| lu.as_str()).map(str::to_string));

    let mut interval = tokio::time::interval(refresh_interval);
    loop {
        interval.tick().await;
        let current = worker
            .store
            .get_internal("updates")
            .await
            .ok()
            .flatten()
            .and_then(|v| v.get("last_update").and_then(|lu| lu.as_str()).map(str::to_string));

        if current != last_update {
            log::info!(
                "[WORKER] updates.last_update advanced, restarting consumer (celery_args={:?})",
                celery_args
            );
            consumer.abort();
            if let Err(e) = worker.reload_catalog().await {
                log::error!("[WORKER] catalog reload during restart failed: {e}");
            }
            consumer = tokio::spawn(run_consumer(worker.clone(), queues.clone()));
            last_update = current;
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();

    let mut queues = cli.queues;
    if queues.is_empty() {
        queues.push(config::default_queue().to_string());
    }
    if config.mode == WorkerMode::Local && !queues.iter().any(|q| q == "updates") {
        queues.push("updates".to_string());
    }

    println!("[WORKER] connecting to database...");
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to database: {e}")),
    );
    let queue = Arc::new(PgQueue::new(store.pool().clone()));

    let modules = store.list_modules().await.unwrap_or_default();
    let catalog = RwLock::new(Arc::new(ModuleCatalog::build(modules)));

    let file_access = match config.mode {
        WorkerMode::Local => FileAccess::Local,
        WorkerMode::Remote => {
            let cache_dir = format!("{}/remote_cache", config.temp_path);
            FileAccess::Remote(RemoteClient::new(config.orchestrator_url.clone(), cache_dir))
        }
    };

    let worker_id = format!("worker-{}", uuid::Uuid::new_v4());
    let worker = Arc::new(Worker {
        store,
        queue,
        catalog,
        host: ModuleHost::new(),
        drivers: Arc::new(build_drivers()),
        file_access,
        worker_id,
    });

    if config.mode == WorkerMode::Local {
        tokio::spawn(cleaner::run(config.temp_path.clone()));
    }

    println!(
        "[WORKER] {} pulling from queues: {:?} (mode={:?})",
        worker.worker_id, queues, config.mode
    );

    supervise(worker, queues, Duration::from_secs(cli.refresh_interval), cli.celery_args).await;
}
