//! The worker runtime (§4.4): pulls `(analysis_id, module_name)` tasks off
//! its queues and runs the ten-step execution sequence, one task in flight
//! per process (parallelism comes from running many worker processes, not
//! from threading inside one).

use crate::files::FileAccess;
use crate::isolated::IsolatedModule;
use crate::module_host::{ExecutableModule, ModuleHost, ModuleTarget};
use crate::vm_driver::VirtualizationDriver;
use fame_core::{FameError, FameResult, ModuleType};
use fame_dispatcher::ModuleCatalog;
use fame_orchestrator::engine::Engine;
use fame_store::{Queue, Store, Task};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct Worker<S, Q> {
    pub store: Arc<S>,
    pub queue: Arc<Q>,
    pub catalog: RwLock<Arc<ModuleCatalog>>,
    pub host: ModuleHost,
    pub drivers: Arc<HashMap<String, Arc<dyn VirtualizationDriver>>>,
    pub file_access: FileAccess,
    pub worker_id: String,
}

impl<S: Store + Send + Sync + 'static, Q: Queue> Worker<S, Q> {
    pub async fn reload_catalog(&self) -> FameResult<()> {
        let modules = self.store.list_modules().await?;
        *self.catalog.write().await = Arc::new(ModuleCatalog::build(modules));
        Ok(())
    }

    async fn engine(&self) -> Engine<S, Q> {
        let catalog = self.catalog.read().await.clone();
        Engine::new(self.store.clone(), self.queue.clone(), catalog)
    }

    /// Pulls one task from `queue_name`; returns `true` if a task was
    /// found and processed (whether it succeeded, failed, or was skipped
    /// as already-claimed), `false` on an empty queue.
    pub async fn pull_and_run(&self, queue_name: &str) -> FameResult<bool> {
        let Some((handle, task)) = self.queue.pull(queue_name, &self.worker_id).await? else {
            return Ok(false);
        };
        if let Err(e) = self.execute_task(&task).await {
            log::error!("[WORKER] task {} on analysis {} failed: {e}", task.module_name, task.analysis_id);
        }
        self.queue.ack(handle).await?;
        Ok(true)
    }

    /// §4.4 steps 1-10. Any failure from step 5 onward is caught and
    /// turned into a canceled module rather than propagated — the worker
    /// itself never crashes on a module's behalf.
    async fn execute_task(&self, task: &Task) -> FameResult<()> {
        self.reload_catalog().await?;
        let id = task.analysis_id;
        let name = &task.module_name;

        let analysis = self
            .store
            .get_analysis(id)
            .await?
            .ok_or_else(|| FameError::Store(format!("analysis {id} not found")))?;

        let already_claimed = !self.store.with_analysis(id, |a| a.move_to_executed(name)).await?;
        if already_claimed {
            log::info!("[WORKER] {name} on {id} already claimed by another worker, skipping");
            return Ok(());
        }

        let catalog = self.catalog.read().await.clone();
        let Some(module) = catalog.get(name).cloned() else {
            log::error!("[WORKER] module {name} not found in catalog");
            self.store
                .with_analysis(id, |a| {
                    a.move_to_canceled(name);
                    a.log("error", format!("module {name} not found in catalog"));
                })
                .await?;
            return Ok(());
        };

        let mut instance: Box<dyn ExecutableModule> = if module.effective_value("virtualization_driver").is_some() {
            Box::new(IsolatedModule::new(self.store.clone(), self.drivers.clone()))
        } else {
            match self.host.load(&module) {
                Ok(instance) => instance,
                Err(e) => {
                    self.fail_module(id, name, &format!("could not load module host: {e}")).await?;
                    return Ok(());
                }
            }
        };

        let mut config = std::collections::HashMap::new();
        for setting in &module.config {
            if let Some(v) = module.effective_value(&setting.name) {
                config.insert(setting.name.clone(), v);
            }
        }
        if let Err(e) = instance.initialize(&config).await {
            self.fail_module(id, name, &format!("initialize failed: {e}")).await?;
            return Ok(());
        }

        self.store
            .with_analysis(id, |a| match module.module_type {
                ModuleType::Preloading => a.start_preloading(),
                _ => a.start_running(),
            })
            .await?;

        let file = self
            .store
            .get_file(analysis.file)
            .await?
            .ok_or_else(|| FameError::Store(format!("file {} not found", analysis.file)))?;
        let input_path = match &file.storage_path {
            Some(p) => self.file_access.resolve_input(id, p).await.ok(),
            None => None,
        };
        let file_type = file.file_type.clone();
        let target = match &input_path {
            Some(p) => ModuleTarget::File { path: p, file_type: &file_type },
            None => ModuleTarget::Url {
                url: file.names.first().cloned().unwrap_or_default(),
                file_type: &file_type,
            },
        };

        let verdict = match instance.run(&target).await {
            Ok(v) => v,
            Err(e) => {
                self.fail_module(id, name, &format!("execution failed: {e}")).await?;
                return Ok(());
            }
        };

        let engine = self.engine().await;
        if verdict.success {
            if let Some(result) = verdict.result.clone() {
                self.store.with_analysis(id, |a| a.add_result(name, result.clone())).await?;
            }
            engine.on_module_success(id, name, &verdict.tags).await?;
            for (file_type, paths) in &verdict.generated_files {
                engine.add_generated_files(id, file_type, paths.clone()).await?;
            }
            if !verdict.probable_names.is_empty() {
                self.store
                    .with_analysis(id, |a| a.probable_names.extend(verdict.probable_names.clone()))
                    .await?;
            }
        } else {
            self.store
                .with_analysis(id, |a| {
                    a.move_to_canceled(name);
                    a.log("warn", format!("module {name} returned a falsy verdict"));
                })
                .await?;
        }

        let root_type = file.file_type.clone();
        engine.resume(id, &root_type).await?;
        Ok(())
    }

    async fn fail_module(&self, id: fame_core::AnalysisId, name: &str, message: &str) -> FameResult<()> {
        log::error!("[WORKER] {name} on {id}: {message}");
        self.store
            .with_analysis(id, |a| {
                a.move_to_canceled(name);
                a.log("error", message.to_string());
            })
            .await
    }
}
