use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ModuleType {
    Processing,
    Preloading,
    Reporting,
    ThreatIntelligence,
    Antivirus,
    Filetype,
    Virtualization,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ConfigValueType {
    Str,
    Text,
    Integer,
    Bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSetting {
    pub name: String,
    pub value_type: ConfigValueType,
    pub default: Option<serde_json::Value>,
    pub description: String,
    /// Whether this setting is exposed as a per-analysis runtime option
    /// (the `option=true` flag from §3/§9 "Options namespace").
    pub option: bool,
}

/// Module metadata as registered in the catalog. One row per enabled (or
/// disabled-pending-config) module; see `fame-dispatcher::ModuleCatalog`
/// for how these get indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub class_path: String,
    pub module_type: ModuleType,
    pub acts_on: Vec<String>,
    pub generates: Vec<String>,
    pub triggered_by: Vec<String>,
    pub queue: String,
    pub config: Vec<ConfigSetting>,
    pub enabled: bool,
    /// Per-deployment configuration overrides, keyed by setting name.
    pub diffs: HashMap<String, serde_json::Value>,
}

impl Default for ModuleInfo {
    fn default() -> Self {
        ModuleInfo {
            name: String::new(),
            class_path: String::new(),
            module_type: ModuleType::Processing,
            acts_on: Vec::new(),
            generates: Vec::new(),
            triggered_by: Vec::new(),
            queue: "unix".to_string(),
            config: Vec::new(),
            enabled: true,
            diffs: HashMap::new(),
        }
    }
}

impl ModuleInfo {
    /// A module with empty `acts_on` runs regardless of the types
    /// currently available on the analysis — used both by the dispatcher's
    /// "direct transform" rule and by `queue_modules`'s runnability check.
    pub fn can_run_on(&self, types_available: &[String]) -> bool {
        self.acts_on.is_empty()
            || self
                .acts_on
                .iter()
                .any(|t| types_available.iter().any(|a| a == t))
    }

    /// A module with no `triggered_by` patterns runs in the default,
    /// automatic pass (§4.1 `general_purpose`).
    pub fn is_general_purpose(&self) -> bool {
        self.triggered_by.is_empty()
    }

    /// Resolve one configuration setting's effective value: a deployment
    /// diff overrides the declared default. Returns `None` when neither is
    /// present — the caller (catalog registration) treats that as "module
    /// auto-disables" per §7.
    pub fn effective_value(&self, setting_name: &str) -> Option<serde_json::Value> {
        if let Some(v) = self.diffs.get(setting_name) {
            return Some(v.clone());
        }
        self.config
            .iter()
            .find(|c| c.name == setting_name)
            .and_then(|c| c.default.clone())
    }

    /// Per §3's invariant: when `enabled`, every setting must resolve to a
    /// value. A module that fails this auto-disables (§7 "Configuration
    /// missing").
    pub fn has_complete_config(&self) -> bool {
        self.config
            .iter()
            .all(|c| self.effective_value(&c.name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_acts_on_can_run_on_anything() {
        let m = ModuleInfo {
            acts_on: vec![],
            ..Default::default()
        };
        assert!(m.can_run_on(&[]));
        assert!(m.can_run_on(&["executable".to_string()]));
    }

    #[test]
    fn acts_on_requires_overlap() {
        let m = ModuleInfo {
            acts_on: vec!["executable".to_string()],
            ..Default::default()
        };
        assert!(!m.can_run_on(&["pdf".to_string()]));
        assert!(m.can_run_on(&["executable".to_string(), "pdf".to_string()]));
    }

    #[test]
    fn missing_config_without_default_is_incomplete() {
        let m = ModuleInfo {
            config: vec![ConfigSetting {
                name: "api_key".to_string(),
                value_type: ConfigValueType::Str,
                default: None,
                description: "".to_string(),
                option: false,
            }],
            ..Default::default()
        };
        assert!(!m.has_complete_config());
    }

    #[test]
    fn diff_overrides_default() {
        let mut m = ModuleInfo {
            config: vec![ConfigSetting {
                name: "threshold".to_string(),
                value_type: ConfigValueType::Integer,
                default: Some(serde_json::json!(1)),
                description: "".to_string(),
                option: false,
            }],
            ..Default::default()
        };
        assert_eq!(m.effective_value("threshold"), Some(serde_json::json!(1)));
        m.diffs.insert("threshold".to_string(), serde_json::json!(5));
        assert_eq!(m.effective_value("threshold"), Some(serde_json::json!(5)));
    }
}
