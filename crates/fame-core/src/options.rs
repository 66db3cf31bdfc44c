use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OptionValue {
    Str(String),
    Integer(i64),
    Bool(bool),
}

/// Per-analysis runtime configuration: the union of every enabled module's
/// `option=true` settings (§4.1 `options()`), plus the single special
/// `magic_enabled` flag the analysis itself consults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Options(pub HashMap<String, OptionValue>);

impl Options {
    pub fn new() -> Self {
        Options(HashMap::new())
    }

    /// `magic_enabled` defaults to `true` when absent (§9 "Options
    /// namespace").
    pub fn magic_enabled(&self) -> bool {
        match self.0.get("magic_enabled") {
            Some(OptionValue::Bool(b)) => *b,
            Some(OptionValue::Str(s)) => !is_falsey(s),
            Some(OptionValue::Integer(n)) => *n != 0,
            None => true,
        }
    }

    /// Coerce a raw form-encoded string value to the declared type. Booleans
    /// treat `0`, `"0"`, `"False"` as false and everything else as true —
    /// the exact rule stated in §9.
    pub fn coerce(
        value_type: crate::module::ConfigValueType,
        raw: &str,
    ) -> OptionValue {
        use crate::module::ConfigValueType::*;
        match value_type {
            Bool => OptionValue::Bool(!is_falsey(raw)),
            Integer => OptionValue::Integer(raw.trim().parse().unwrap_or(0)),
            Str | Text => OptionValue::Str(raw.to_string()),
        }
    }
}

fn is_falsey(s: &str) -> bool {
    matches!(s, "0" | "False")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ConfigValueType;

    #[test]
    fn magic_enabled_defaults_true() {
        assert!(Options::new().magic_enabled());
    }

    #[test]
    fn magic_enabled_honors_explicit_false() {
        let mut o = Options::new();
        o.0.insert("magic_enabled".to_string(), OptionValue::Bool(false));
        assert!(!o.magic_enabled());
    }

    #[test]
    fn bool_coercion_treats_zero_and_false_string_as_false() {
        assert_eq!(Options::coerce(ConfigValueType::Bool, "0"), OptionValue::Bool(false));
        assert_eq!(
            Options::coerce(ConfigValueType::Bool, "False"),
            OptionValue::Bool(false)
        );
        assert_eq!(Options::coerce(ConfigValueType::Bool, "1"), OptionValue::Bool(true));
        assert_eq!(
            Options::coerce(ConfigValueType::Bool, "anything"),
            OptionValue::Bool(true)
        );
    }
}
