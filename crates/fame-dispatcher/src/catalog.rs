use crate::glob;
use fame_core::{ModuleInfo, ModuleType};
use std::collections::HashMap;

/// A potential transform: producing `generated_type` from `source_type` via
/// `module`.
#[derive(Debug, Clone)]
pub struct Transform {
    pub generated_type: String,
    pub module: String,
}

struct TriggerEntry {
    pattern: String,
    module: String,
    order: usize,
}

/// Registers the set of enabled modules and exposes the lookup/enumeration
/// surface the dispatcher and the analysis engine need.
///
/// Built fresh from a module list every time the store's `updates` signal
/// advances — the same "rebuild an in-memory table from the source of
/// truth" shape as an `AgentManager` sessions table, except the catalog is
/// immutable-after-build and shared via `Arc` rather than mutated behind a
/// `Mutex`.
pub struct ModuleCatalog {
    modules: HashMap<String, ModuleInfo>,
    by_type: HashMap<ModuleType, Vec<String>>,
    /// source type -> potential transforms (regular, `acts_on` non-empty)
    transforms: HashMap<String, Vec<Transform>>,
    /// generated type -> modules that produce it with empty `acts_on`
    direct_transforms: HashMap<String, Vec<String>>,
    general_purpose: Vec<String>,
    triggers: Vec<TriggerEntry>,
    literal_index: HashMap<String, Vec<usize>>,
    dynamic_index: Vec<usize>,
    filetype_modules: HashMap<String, Vec<String>>,
    disabled_incomplete_config: Vec<String>,
}

impl ModuleCatalog {
    /// Builds the catalog from every module the store returned, applying
    /// the auto-disable-on-incomplete-config rule (§3, §7) before indexing.
    pub fn build(modules: Vec<ModuleInfo>) -> Self {
        let mut cat = ModuleCatalog {
            modules: HashMap::new(),
            by_type: HashMap::new(),
            transforms: HashMap::new(),
            direct_transforms: HashMap::new(),
            general_purpose: Vec::new(),
            triggers: Vec::new(),
            literal_index: HashMap::new(),
            dynamic_index: Vec::new(),
            filetype_modules: HashMap::new(),
            disabled_incomplete_config: Vec::new(),
        };

        for m in modules {
            if !m.enabled {
                continue;
            }
            if !m.has_complete_config() {
                cat.disabled_incomplete_config.push(m.name.clone());
                continue;
            }
            cat.register(m);
        }

        log::info!(
            "[CATALOG] loaded {} modules ({} disabled by incomplete config)",
            cat.modules.len(),
            cat.disabled_incomplete_config.len()
        );

        cat
    }

    fn register(&mut self, m: ModuleInfo) {
        let name = m.name.clone();
        self.by_type.entry(m.module_type).or_default().push(name.clone());

        if m.module_type == ModuleType::Filetype {
            if m.acts_on.is_empty() {
                self.filetype_modules.entry("*".to_string()).or_default().push(name.clone());
            } else {
                for t in &m.acts_on {
                    self.filetype_modules.entry(t.clone()).or_default().push(name.clone());
                }
            }
        }

        if m.module_type == ModuleType::Processing {
            for source in &m.acts_on {
                for generated in &m.generates {
                    self.transforms.entry(source.clone()).or_default().push(Transform {
                        generated_type: generated.clone(),
                        module: name.clone(),
                    });
                }
            }
            if m.acts_on.is_empty() {
                for generated in &m.generates {
                    self.direct_transforms.entry(generated.clone()).or_default().push(name.clone());
                }
            }
            if m.triggered_by.is_empty() {
                self.general_purpose.push(name.clone());
                for source in &m.acts_on {
                    self.add_trigger(format!("_generated_file({source})"), name.clone());
                }
            }
        }

        for pattern in &m.triggered_by {
            self.add_trigger(pattern.clone(), name.clone());
        }

        self.modules.insert(name, m);
    }

    fn add_trigger(&mut self, pattern: String, module: String) {
        let order = self.triggers.len();
        let dynamic = glob::has_wildcard(&pattern);
        self.triggers.push(TriggerEntry { pattern: pattern.clone(), module, order });
        if dynamic {
            self.dynamic_index.push(order);
        } else {
            self.literal_index.entry(pattern).or_default().push(order);
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    pub fn processing(&self) -> &[String] {
        self.by_type.get(&ModuleType::Processing).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn preloading(&self) -> &[String] {
        self.by_type.get(&ModuleType::Preloading).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn reporting(&self) -> &[String] {
        self.by_type.get(&ModuleType::Reporting).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn threat_intelligence(&self) -> &[String] {
        self.by_type.get(&ModuleType::ThreatIntelligence).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn antivirus(&self) -> &[String] {
        self.by_type.get(&ModuleType::Antivirus).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn virtualization(&self) -> &[String] {
        self.by_type.get(&ModuleType::Virtualization).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn filetype_for(&self, file_type: &str) -> Vec<String> {
        let mut out = self.filetype_modules.get(file_type).cloned().unwrap_or_default();
        if let Some(any) = self.filetype_modules.get("*") {
            out.extend(any.iter().cloned());
        }
        out
    }

    pub fn transforms_from(&self, source_type: &str) -> &[Transform] {
        self.transforms.get(source_type).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn direct_transforms_to(&self, generated_type: &str) -> &[String] {
        self.direct_transforms.get(generated_type).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn general_purpose(&self) -> &[String] {
        &self.general_purpose
    }

    /// Modules whose `triggered_by` patterns match `tag`, in registration
    /// order (§4.1).
    pub fn triggered_by(&self, tag: &str) -> Vec<String> {
        let mut indices: Vec<usize> = self.literal_index.get(tag).cloned().unwrap_or_default();
        for &i in &self.dynamic_index {
            if glob::matches(&self.triggers[i].pattern, tag) {
                indices.push(i);
            }
        }
        indices.sort_unstable();
        indices.into_iter().map(|i| self.triggers[i].module.clone()).collect()
    }

    /// Union of every enabled module's `option=true` settings, grouped by
    /// declared type then setting name (§4.1 `options()`).
    pub fn options(&self) -> HashMap<fame_core::ConfigValueType, HashMap<String, OptionDescriptor>> {
        let mut out: HashMap<fame_core::ConfigValueType, HashMap<String, OptionDescriptor>> = HashMap::new();
        for m in self.modules.values() {
            for setting in &m.config {
                if !setting.option {
                    continue;
                }
                let entry = out
                    .entry(setting.value_type)
                    .or_default()
                    .entry(setting.name.clone())
                    .or_insert_with(|| OptionDescriptor {
                        default: setting.default.clone(),
                        description: setting.description.clone(),
                        modules: Vec::new(),
                    });
                entry.modules.push(m.name.clone());
            }
        }
        out
    }

    pub fn disabled_incomplete_config(&self) -> &[String] {
        &self.disabled_incomplete_config
    }
}

#[derive(Debug, Clone)]
pub struct OptionDescriptor {
    pub default: Option<serde_json::Value>,
    pub description: String,
    pub modules: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fame_core::ConfigValueType;

    fn module(name: &str) -> ModuleInfo {
        ModuleInfo { name: name.to_string(), ..Default::default() }
    }

    #[test]
    fn incomplete_config_disables_module() {
        let mut m = module("NeedsKey");
        m.config.push(fame_core::ConfigSetting {
            name: "api_key".into(),
            value_type: ConfigValueType::Str,
            default: None,
            description: "".into(),
            option: false,
        });
        let cat = ModuleCatalog::build(vec![m]);
        assert!(cat.get("NeedsKey").is_none());
        assert_eq!(cat.disabled_incomplete_config(), &["NeedsKey".to_string()]);
    }

    #[test]
    fn general_purpose_registration_order_preserved() {
        let a = module("A");
        let b = module("B");
        let cat = ModuleCatalog::build(vec![a, b]);
        assert_eq!(cat.general_purpose(), &["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn literal_trigger_lookup() {
        let mut m = module("Reporter");
        m.triggered_by = vec!["ransomware".to_string()];
        let cat = ModuleCatalog::build(vec![m]);
        assert_eq!(cat.triggered_by("ransomware"), vec!["Reporter".to_string()]);
        assert!(cat.triggered_by("other").is_empty());
    }

    #[test]
    fn wildcard_trigger_lookup_preserves_registration_order() {
        let mut first = module("Catchall");
        first.triggered_by = vec!["*ransom*".to_string()];
        let mut second = module("Exact");
        second.triggered_by = vec!["maze_ransomware".to_string()];
        let cat = ModuleCatalog::build(vec![first, second]);
        let hits = cat.triggered_by("maze_ransomware");
        assert_eq!(hits, vec!["Catchall".to_string(), "Exact".to_string()]);
    }

    #[test]
    fn synthetic_generated_file_trigger_for_untriggered_module() {
        let mut m = module("Static");
        m.acts_on = vec!["executable".to_string()];
        let cat = ModuleCatalog::build(vec![m]);
        assert_eq!(
            cat.triggered_by("_generated_file(executable)"),
            vec!["Static".to_string()]
        );
    }

    #[test]
    fn transform_and_direct_transform_indices() {
        let mut unzip = module("Unzip");
        unzip.acts_on = vec!["zip".to_string()];
        unzip.generates = vec!["executable".to_string()];
        let mut vt = module("VTLookup");
        vt.generates = vec!["pdf".to_string()];
        let cat = ModuleCatalog::build(vec![unzip, vt]);
        assert_eq!(cat.transforms_from("zip")[0].module, "Unzip");
        assert_eq!(cat.direct_transforms_to("pdf"), &["VTLookup".to_string()]);
    }
}
