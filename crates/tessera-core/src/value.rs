//! # Config Values
//!
//! Scalar values accepted by the config key/value port: bool, int, double,
//! string, and string list. Anything richer belongs in a repository.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// A namespaced config value.
///
/// Serialized adjacently tagged so storage adapters can round-trip the
/// exact variant: `{ "type": "int", "value": 42 }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    StringList(Vec<String>),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            ConfigValue::Double(d) => Some(*d),
            ConfigValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            ConfigValue::StringList(list) => Some(list),
            _ => None,
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Double(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}

impl From<Vec<String>> for ConfigValue {
    fn from(v: Vec<String>) -> Self {
        ConfigValue::StringList(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let json = serde_json::to_string(&ConfigValue::Int(42)).unwrap();
        assert_eq!(json, r#"{"type":"int","value":42}"#);

        let back: ConfigValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_int(), Some(42));
    }

    #[test]
    fn test_accessors_reject_other_variants() {
        let value = ConfigValue::from("cursor");
        assert_eq!(value.as_str(), Some("cursor"));
        assert_eq!(value.as_bool(), None);
        assert_eq!(ConfigValue::Int(2).as_double(), Some(2.0));
    }
}
