//! A way to load a module class by dotted path and instantiate it with its
//! configuration injected (§6.1 "Module host"). Concrete module bodies are
//! out of scope here; what this crate owns is the hook real modules plug
//! into, so the registry below maps `class_path` to a factory closure
//! rather than reflecting over a dynamic language's class table.

use fame_core::{FameError, FameResult, ModuleInfo};
use std::collections::HashMap;
use std::path::Path;

/// What a module is asked to act on: either a concrete file on disk or a
/// bare URL (§4.5 step 4, "or `data=url` for URL targets"). `file_type`
/// carries the `{type}` segment an isolated module's `module_each/{type}`
/// call needs; a worker-hosted module is free to ignore it.
pub enum ModuleTarget<'a> {
    File { path: &'a Path, file_type: &'a str },
    Url { url: String, file_type: &'a str },
}

/// Truthy verdict + optional structured result + declared tags (§4.4 step
/// 7). `generated_files` and `extracted_files` mirror what a module may
/// additionally hand back per the Agent's `_results` payload (§4.5 step 5);
/// a worker-hosted module reports them the same way a VM-hosted one does.
#[derive(Debug, Default, Clone)]
pub struct ModuleVerdict {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub tags: Vec<String>,
    pub generated_files: HashMap<String, Vec<String>>,
    pub probable_names: Vec<String>,
}

/// A module's two entry points (§4.4 steps 5 and 7). Async because a
/// VM-isolated module (`crate::isolated::IsolatedModule`) drives HTTP calls
/// against the Agent and a worker-hosted one may do its own I/O; a
/// synchronous trait would force either kind to block the worker's runtime.
#[async_trait::async_trait]
pub trait ExecutableModule: Send {
    async fn initialize(&mut self, config: &HashMap<String, serde_json::Value>) -> FameResult<()>;
    async fn run(&mut self, target: &ModuleTarget<'_>) -> FameResult<ModuleVerdict>;
}

type Factory = Box<dyn Fn() -> Box<dyn ExecutableModule> + Send + Sync>;

/// Keyed by `ModuleInfo::class_path`. Empty by default; a deployment
/// registers its own modules at startup the way `remnux.rs`/`proxmox.rs`
/// register concrete drivers behind a small dispatch table instead of a
/// plugin-loader.
#[derive(Default)]
pub struct ModuleHost {
    factories: HashMap<String, Factory>,
}

impl ModuleHost {
    pub fn new() -> Self {
        ModuleHost { factories: HashMap::new() }
    }

    pub fn register(&mut self, class_path: impl Into<String>, factory: Factory) {
        self.factories.insert(class_path.into(), factory);
    }

    pub fn load(&self, module: &ModuleInfo) -> FameResult<Box<dyn ExecutableModule>> {
        self.factories
            .get(&module.class_path)
            .map(|f| f())
            .ok_or_else(|| FameError::ModuleNotFound(module.class_path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;
    #[async_trait::async_trait]
    impl ExecutableModule for Noop {
        async fn initialize(&mut self, _config: &HashMap<String, serde_json::Value>) -> FameResult<()> {
            Ok(())
        }
        async fn run(&mut self, _target: &ModuleTarget<'_>) -> FameResult<ModuleVerdict> {
            Ok(ModuleVerdict { success: true, ..Default::default() })
        }
    }

    #[test]
    fn unregistered_class_path_is_not_found() {
        let host = ModuleHost::new();
        let m = ModuleInfo { class_path: "missing.Module".into(), ..Default::default() };
        assert!(matches!(host.load(&m), Err(FameError::ModuleNotFound(_))));
    }

    #[tokio::test]
    async fn registered_class_path_loads() {
        let mut host = ModuleHost::new();
        host.register("noop.Noop", Box::new(|| Box::new(Noop)));
        let m = ModuleInfo { class_path: "noop.Noop".into(), ..Default::default() };
        let mut instance = host.load(&m).unwrap();
        instance.initialize(&HashMap::new()).await.unwrap();
        let target = ModuleTarget::Url { url: "http://x".into(), file_type: "url" };
        let verdict = instance.run(&target).await.unwrap();
        assert!(verdict.success);
    }
}
