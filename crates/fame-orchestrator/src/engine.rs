//! Decision-making over an `Analysis`: `resume`, `queue_modules`,
//! `add_tag`, `add_generated_files`, `add_extracted_file`, `change_type`.
//! Plain data lives in `fame_core::Analysis`; this module is the part that
//! needs the module catalog and dispatcher to decide *what happens next*,
//! the same split a dedicated action-manager type draws from a task's
//! records elsewhere in this codebase.

use fame_core::{Analysis, AnalysisId, FameError, FameResult, File, FileId};
use fame_dispatcher::{Dispatcher, ModuleCatalog};
use fame_store::{Queue, Store, Task};
use std::collections::HashSet;
use std::sync::Arc;

pub struct Engine<S, Q> {
    pub store: Arc<S>,
    pub queue: Arc<Q>,
    pub catalog: Arc<ModuleCatalog>,
}

impl<S: Store, Q: Queue> Engine<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, catalog: Arc<ModuleCatalog>) -> Self {
        Self { store, queue, catalog }
    }

    /// Creates a new analysis of `file`, applying the automatic
    /// general-purpose pass when magic is enabled and no modules were
    /// explicitly requested.
    pub async fn start_analysis(
        &self,
        file: &File,
        initiating_user: &str,
        groups: HashSet<String>,
        requested_modules: Vec<String>,
    ) -> FameResult<AnalysisId> {
        let mut analysis = Analysis::new(file.id, initiating_user, groups);
        let magic = analysis.options.magic_enabled();
        let id = analysis.id;
        self.store.put_analysis(&analysis).await?;

        if !requested_modules.is_empty() {
            self.queue_modules(id, requested_modules, true).await?;
        } else if !file.is_hash_only() && magic {
            let general: Vec<String> = self.catalog.general_purpose().to_vec();
            self.queue_modules(id, general, false).await?;
        }

        self.resume(id, &file.file_type).await?;
        Ok(id)
    }

    /// `resume()` — the heart of the core. Idempotent against concurrent
    /// execution: operates on freshly-refreshed state plus the store's
    /// conditional update primitive.
    pub async fn resume(&self, id: AnalysisId, root_type: &str) -> FameResult<()> {
        let analysis = self
            .store
            .get_analysis(id)
            .await?
            .ok_or_else(|| FameError::Store(format!("analysis {id} not found")))?;

        if !analysis.pending_modules.is_empty() {
            return Ok(());
        }

        let mut enqueued_any = false;
        let root_is_hash = root_type == "hash";
        let has_real_file = analysis.generated_files.values().any(|v| !v.is_empty())
            || !analysis.extracted_files.is_empty();

        if root_is_hash && !has_real_file {
            let dispatcher = Dispatcher::new(&self.catalog);
            let excluded: HashSet<String> = analysis
                .executed_modules
                .iter()
                .chain(analysis.canceled_modules.iter())
                .cloned()
                .collect();
            let candidates: Vec<String> = self.catalog.preloading().to_vec();
            match dispatcher.next_preloading_module(&candidates, &excluded) {
                Ok(module) => {
                    self.queue_modules(id, vec![module], false).await?;
                    enqueued_any = true;
                }
                Err(_) => {
                    let waiting: Vec<String> = self
                        .store
                        .get_analysis(id)
                        .await?
                        .map(|a| a.waiting_modules)
                        .unwrap_or_default();
                    for module in waiting {
                        self.cancel_module(id, &module, "no preloading module left to try")
                            .await?;
                    }
                }
            }
        } else {
            let waiting = analysis.waiting_modules.clone();
            let types_available = analysis.types_available(root_type);
            for module in waiting {
                let dispatcher = Dispatcher::new(&self.catalog);
                let excluded: HashSet<String> = analysis.executed_modules.iter().cloned().collect();
                match dispatcher.next_module(&types_available, &module, &excluded) {
                    Ok(next) => {
                        self.queue_modules(id, vec![next], false).await?;
                        enqueued_any = true;
                    }
                    Err(_) => {
                        self.cancel_module(id, &module, "no execution path").await?;
                    }
                }
            }
        }

        if !enqueued_any {
            let still_pending = self
                .store
                .get_analysis(id)
                .await?
                .map(|a| !a.pending_modules.is_empty())
                .unwrap_or(false);
            if !still_pending {
                self.store
                    .with_analysis(id, |a| {
                        if a.status != fame_core::AnalysisStatus::Error {
                            a.finish();
                        }
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn cancel_module(&self, id: AnalysisId, module: &str, reason: &str) -> FameResult<()> {
        log::warn!("[RESUME] module {module} canceled: {reason}");
        self.store
            .with_analysis(id, |a| {
                a.move_to_canceled(module);
                a.log("warn", format!("module {module} canceled: {reason}"));
            })
            .await
    }

    /// `queue_modules(names, fallback_waiting)`. For each name not already
    /// in pending or executed, either enqueues it now or parks it waiting,
    /// per the catalog's declared `acts_on`/generated types.
    pub async fn queue_modules(
        &self,
        id: AnalysisId,
        names: Vec<String>,
        fallback_waiting: bool,
    ) -> FameResult<()> {
        for name in names {
            let Some(module) = self.catalog.get(&name) else {
                log::error!("[QUEUE] module {name} not found in catalog");
                self.store
                    .with_analysis(id, |a| {
                        a.move_to_canceled(&name);
                        a.log("error", format!("module {name} not found in catalog"));
                    })
                    .await?;
                continue;
            };

            let already_done = self
                .store
                .get_analysis(id)
                .await?
                .map(|a| {
                    a.pending_modules.iter().any(|m| m == &name)
                        || a.executed_modules.iter().any(|m| m == &name)
                })
                .unwrap_or(false);
            if already_done {
                continue;
            }

            let analysis = self
                .store
                .get_analysis(id)
                .await?
                .ok_or_else(|| FameError::Store(format!("analysis {id} not found")))?;
            let root_type = self
                .store
                .get_file(analysis.file)
                .await?
                .map(|f| f.file_type)
                .unwrap_or_default();
            let types_available = analysis.types_available(&root_type);

            let can_run_now =
                module.acts_on.is_empty() || module.can_run_on(&types_available);

            if can_run_now {
                let newly_added = self.store.with_analysis(id, |a| a.move_to_pending(&name)).await?;
                if newly_added {
                    self.queue
                        .publish(
                            &module.queue,
                            Task {
                                analysis_id: id,
                                module_name: name.clone(),
                            },
                        )
                        .await?;
                }
            } else if fallback_waiting {
                self.store.with_analysis(id, |a| a.move_to_waiting(&name)).await?;
            } else {
                log::warn!(
                    "[QUEUE] module {name} not runnable and fallback_waiting=false, dropped"
                );
            }
        }
        Ok(())
    }

    /// Idempotent tag append that, when magic is enabled, enqueues every
    /// module registered for that tag.
    pub async fn add_tag(&self, id: AnalysisId, tag: &str) -> FameResult<()> {
        let newly_added = self.store.with_analysis(id, |a| a.add_tag(tag)).await?;
        if !newly_added {
            return Ok(());
        }
        let magic = self
            .store
            .get_analysis(id)
            .await?
            .map(|a| a.options.magic_enabled())
            .unwrap_or(true);
        if magic {
            let triggered = self.catalog.triggered_by(tag);
            if !triggered.is_empty() {
                self.queue_modules(id, triggered, true).await?;
            }
        }
        Ok(())
    }

    /// Called after a module finishes successfully: emits the bare module
    /// name, each tag the module declared in its verdict, and
    /// `module_name(tag)` for each of those declared tags.
    pub async fn on_module_success(&self, id: AnalysisId, module: &str, declared_tags: &[String]) -> FameResult<()> {
        self.add_tag(id, module).await?;
        for t in declared_tags {
            self.add_tag(id, t).await?;
            self.add_tag(id, &format!("{module}({t})")).await?;
        }
        Ok(())
    }

    /// `add_generated_files(type, paths)`: appends the paths and, when
    /// magic is enabled, enqueues modules registered for the synthetic
    /// `_generated_file(type)` tag.
    pub async fn add_generated_files(
        &self,
        id: AnalysisId,
        file_type: &str,
        paths: Vec<String>,
    ) -> FameResult<()> {
        self.store
            .with_analysis(id, |a| a.add_generated_files(file_type, paths.clone()))
            .await?;
        let magic = self
            .store
            .get_analysis(id)
            .await?
            .map(|a| a.options.magic_enabled())
            .unwrap_or(true);
        if magic {
            let tag = format!("_generated_file({file_type})");
            let triggered = self.catalog.triggered_by(&tag);
            if !triggered.is_empty() {
                self.queue_modules(id, triggered, true).await?;
            }
        }
        Ok(())
    }

    /// An extracted file is treated as a new submission: if its hash is
    /// unknown, a new `File` is created; either way a fresh analysis is
    /// scheduled for it using the extracted-file default module set
    /// (`extracted_file_modules` named config) when magic is enabled.
    /// Re-analyzing a known hash on every extraction (rather than skipping
    /// it) means a file pulled from two different parents gets independent
    /// treatment even when the parents warrant different triggers.
    pub async fn add_extracted_file(
        &self,
        parent_id: AnalysisId,
        sha256: &str,
        file_type: &str,
        storage_path: &str,
    ) -> FameResult<FileId> {
        let parent = self
            .store
            .get_analysis(parent_id)
            .await?
            .ok_or_else(|| FameError::Store(format!("analysis {parent_id} not found")))?;

        let existing = self.store.find_file_by_sha256(sha256).await?;
        let file = match existing {
            Some(mut f) => {
                f.groups.extend(parent.groups.iter().cloned());
                f.extracted_by.push(parent_id);
                self.store.put_file(&f).await?;
                f
            }
            None => {
                let mut f = File::new(file_type);
                f.sha256 = Some(sha256.to_string());
                f.storage_path = Some(storage_path.to_string());
                f.groups = parent.groups.clone();
                f.ancestor_analyses.push(parent_id);
                f.extracted_by.push(parent_id);
                self.store.put_file(&f).await?;
                f
            }
        };

        self.store
            .with_analysis(parent_id, |a| a.add_extracted_file(file.id))
            .await?;

        let magic = parent.options.magic_enabled();
        let default_modules = if magic {
            self.store
                .get_config("extracted_file_modules")
                .await?
                .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        self.start_analysis(&file, &parent.initiating_user, parent.groups.clone(), default_modules)
            .await?;

        Ok(file.id)
    }

    /// Only permitted for the root file: updates `file_type` and, when
    /// magic is enabled, re-runs the general-purpose pass the same way
    /// `start_analysis` does.
    pub async fn change_type(&self, id: AnalysisId, file_id: FileId, new_type: &str) -> FameResult<()> {
        let analysis = self
            .store
            .get_analysis(id)
            .await?
            .ok_or_else(|| FameError::Store(format!("analysis {id} not found")))?;

        if analysis.file != file_id {
            log::error!("[CHANGE_TYPE] {file_id} is not the root file of analysis {id}, rejected");
            return Err(FameError::Store(
                "change_type is only permitted for the root file of an analysis".to_string(),
            ));
        }

        self.store
            .with_file(file_id, |f| f.file_type = new_type.to_string())
            .await?;

        if analysis.options.magic_enabled() {
            let general: Vec<String> = self.catalog.general_purpose().to_vec();
            self.queue_modules(id, general, false).await?;
            self.resume(id, new_type).await?;
        }
        Ok(())
    }
}
