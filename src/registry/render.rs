//! Parameter rendering: fill template placeholders from a typed
//! parameter set
//!
//! Rendering is pure and deterministic: the same template set and the
//! same parameters always yield byte-identical artifacts, which the
//! idempotent step-skipping depends on. Placeholders use the
//! `{{ name }}` form.

use crate::core::params::ParamMap;
use crate::error::{DeployError, Result};
use crate::registry::TemplateSet;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// A rendered, provider-ready artifact
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifact {
    pub file_name: String,
    pub body: String,
}

/// The full set of rendered artifacts for one step
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedArtifacts {
    pub artifacts: Vec<RenderedArtifact>,
}

impl RenderedArtifacts {
    /// Content fingerprint over the rendered artifacts plus the input
    /// values that fed them. Two runs with the same fingerprint are
    /// guaranteed to re-apply identical configuration.
    pub fn fingerprint(&self, inputs: &ParamMap) -> String {
        let mut hasher = blake3::Hasher::new();
        for artifact in &self.artifacts {
            hasher.update(artifact.file_name.as_bytes());
            hasher.update(&[0]);
            hasher.update(artifact.body.as_bytes());
            hasher.update(&[0]);
        }
        // ParamMap is a BTreeMap, so iteration order is stable
        for (key, value) in inputs {
            hasher.update(key.as_bytes());
            hasher.update(&[b'=']);
            hasher.update(value.render().as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    /// Write every artifact into the given working directory
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for artifact in &self.artifacts {
            std::fs::write(dir.join(&artifact.file_name), &artifact.body)?;
        }
        Ok(())
    }
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").expect("valid regex"))
}

/// Render a template set against a parameter map.
///
/// Validates the set's schema first, then substitutes placeholders.
/// Any placeholder without a corresponding parameter fails with
/// `MissingParameter` before any external tool is invoked; blanks are
/// never rendered silently.
pub fn render(set: &TemplateSet, params: &ParamMap) -> Result<RenderedArtifacts> {
    if let Some(name) = set.schema.first_violation(params) {
        return Err(DeployError::MissingParameter(name));
    }

    let mut artifacts = Vec::with_capacity(set.artifacts.len());
    for template in &set.artifacts {
        let body = substitute(&template.body, params)?;
        artifacts.push(RenderedArtifact {
            file_name: template.file_name.clone(),
            body,
        });
    }

    Ok(RenderedArtifacts { artifacts })
}

fn substitute(template: &str, params: &ParamMap) -> Result<String> {
    let re = placeholder_re();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in re.captures_iter(template) {
        let whole = caps.get(0).expect("match");
        let name = &caps[1];
        let value = params
            .get(name)
            .ok_or_else(|| DeployError::MissingParameter(name.to_string()))?;

        out.push_str(&template[last..whole.start()]);
        out.push_str(&value.render());
        last = whole.end();
    }
    out.push_str(&template[last..]);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::{ParamKind, ParamSchema, ParamSpec, ParamValue};
    use crate::core::provider::{Capability, Provider};
    use crate::registry::TemplateArtifact;

    fn set_with(body: &str, schema: ParamSchema) -> TemplateSet {
        TemplateSet {
            capability: Capability::Network,
            provider: Provider::Aws,
            artifacts: vec![TemplateArtifact {
                file_name: "main.tf".to_string(),
                body: body.to_string(),
            }],
            schema,
        }
    }

    fn params(pairs: &[(&str, &str)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), ParamValue::from(*v)))
            .collect()
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let set = set_with("region = \"{{ region }}\"", ParamSchema::default());
        let rendered = render(&set, &params(&[("region", "us-east-1")])).unwrap();
        assert_eq!(rendered.artifacts[0].body, "region = \"us-east-1\"");
    }

    #[test]
    fn test_render_is_deterministic() {
        let set = set_with("{{ a }}-{{ b }}-{{ a }}", ParamSchema::default());
        let p = params(&[("a", "x"), ("b", "y")]);
        let first = render(&set, &p).unwrap();
        let second = render(&set, &p).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fingerprint(&p), second.fingerprint(&p));
    }

    #[test]
    fn test_missing_placeholder_fails_fast() {
        let set = set_with("name = {{ app_slug }}", ParamSchema::default());
        let err = render(&set, &ParamMap::new()).unwrap_err();
        match err {
            DeployError::MissingParameter(name) => assert_eq!(name, "app_slug"),
            other => panic!("expected MissingParameter, got {other:?}"),
        }
    }

    #[test]
    fn test_schema_required_checked_before_substitution() {
        let schema = ParamSchema {
            required: vec![ParamSpec {
                name: "ssh_public_key".to_string(),
                kind: ParamKind::String,
            }],
            optional: vec![],
        };
        // Template does not even reference the parameter; the schema
        // still rejects the call.
        let set = set_with("static body", schema);
        let err = render(&set, &ParamMap::new()).unwrap_err();
        assert!(matches!(err, DeployError::MissingParameter(name) if name == "ssh_public_key"));
    }

    #[test]
    fn test_fingerprint_changes_with_inputs() {
        let set = set_with("tag = {{ image_tag }}", ParamSchema::default());
        let p1 = params(&[("image_tag", "v1")]);
        let p2 = params(&[("image_tag", "v2")]);
        let f1 = render(&set, &p1).unwrap().fingerprint(&p1);
        let f2 = render(&set, &p2).unwrap().fingerprint(&p2);
        assert_ne!(f1, f2);
    }

    #[test]
    fn test_write_to_dir() {
        let set = set_with("body", ParamSchema::default());
        let rendered = render(&set, &ParamMap::new()).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        rendered.write_to(tmp.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("main.tf")).unwrap(),
            "body"
        );
    }
}
