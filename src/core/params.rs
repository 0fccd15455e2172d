//! Typed template parameters and parameter schemas

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parameter value passed to template rendering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl ParamValue {
    /// Render the value as substitution text.
    ///
    /// Lists render as JSON arrays and maps as JSON objects so the same
    /// value is valid in tfvars and in extra-vars payloads.
    pub fn render(&self) -> String {
        match self {
            ParamValue::String(s) => s.clone(),
            ParamValue::List(items) => {
                serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
            }
            ParamValue::Map(map) => {
                serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::String(_) => ParamKind::String,
            ParamValue::List(_) => ParamKind::List,
            ParamValue::Map(_) => ParamKind::Map,
        }
    }

    /// Convert to a JSON value for extra-vars payloads
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ParamValue::String(s) => serde_json::Value::String(s.clone()),
            ParamValue::List(items) => serde_json::json!(items),
            ParamValue::Map(map) => serde_json::json!(map),
        }
    }

    /// Lift a step output back into a parameter. Scalars become strings;
    /// string arrays and objects keep their shape; anything deeper is
    /// carried as its JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => ParamValue::String(s.clone()),
            serde_json::Value::Array(items)
                if items.iter().all(|i| i.is_string()) =>
            {
                ParamValue::List(
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect(),
                )
            }
            serde_json::Value::Object(map)
                if map.values().all(|v| v.is_string()) =>
            {
                ParamValue::Map(
                    map.iter()
                        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                        .collect(),
                )
            }
            other => ParamValue::String(other.to_string()),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::String(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::String(s)
    }
}

/// The running parameter set for a pipeline. BTreeMap keeps iteration
/// deterministic, which fingerprinting relies on.
pub type ParamMap = BTreeMap<String, ParamValue>;

/// Declared type of a template parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    List,
    Map,
}

/// One declared parameter in a template schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    #[serde(default = "default_param_kind")]
    pub kind: ParamKind,
}

fn default_param_kind() -> ParamKind {
    ParamKind::String
}

/// Required/optional parameter declarations for a template set,
/// loaded from the set's schema.yml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(default)]
    pub required: Vec<ParamSpec>,

    #[serde(default)]
    pub optional: Vec<ParamSpec>,
}

impl ParamSchema {
    /// Check every required parameter is present with the declared kind.
    /// Returns the name of the first missing or mistyped parameter.
    pub fn first_violation(&self, params: &ParamMap) -> Option<String> {
        for spec in &self.required {
            match params.get(&spec.name) {
                None => return Some(spec.name.clone()),
                Some(value) if value.kind() != spec.kind => return Some(spec.name.clone()),
                Some(_) => {}
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_string() {
        assert_eq!(ParamValue::from("us-east-1").render(), "us-east-1");
    }

    #[test]
    fn test_render_list_as_json() {
        let v = ParamValue::List(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(v.render(), r#"["a","b"]"#);
    }

    #[test]
    fn test_schema_detects_missing_required() {
        let schema = ParamSchema {
            required: vec![ParamSpec {
                name: "region".to_string(),
                kind: ParamKind::String,
            }],
            optional: vec![],
        };
        let mut params = ParamMap::new();
        assert_eq!(schema.first_violation(&params), Some("region".to_string()));

        params.insert("region".to_string(), "eu-west-1".into());
        assert_eq!(schema.first_violation(&params), None);
    }

    #[test]
    fn test_from_json_lifts_shapes() {
        assert_eq!(
            ParamValue::from_json(&serde_json::json!("1.2.3.4")),
            ParamValue::from("1.2.3.4")
        );
        assert_eq!(
            ParamValue::from_json(&serde_json::json!(["a", "b"])),
            ParamValue::List(vec!["a".to_string(), "b".to_string()])
        );
        // Non-string scalars are carried as text
        assert_eq!(
            ParamValue::from_json(&serde_json::json!(8080)),
            ParamValue::from("8080")
        );
    }

    #[test]
    fn test_schema_detects_kind_mismatch() {
        let schema = ParamSchema {
            required: vec![ParamSpec {
                name: "zones".to_string(),
                kind: ParamKind::List,
            }],
            optional: vec![],
        };
        let mut params = ParamMap::new();
        params.insert("zones".to_string(), "not-a-list".into());
        assert_eq!(schema.first_violation(&params), Some("zones".to_string()));
    }
}
