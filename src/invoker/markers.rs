//! Marker line protocol: the structured output channel
//!
//! External tools return machine-readable results by printing stdout
//! lines of the form `SHIPWRIGHT::<KEY>=<base64(JSON)>`. This decoder is
//! the sole contract between the orchestrator and arbitrary tooling;
//! everything else on stdout is diagnostic text and is preserved but
//! never parsed as data.

use crate::error::{DeployError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Fixed prefix identifying a marker line
pub const MARKER_PREFIX: &str = "SHIPWRIGHT::";

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Decode a single line. Returns `None` for unmarked lines, `Some(Err)`
/// for lines that carry the prefix but cannot be decoded.
pub fn parse_line(line: &str) -> Option<Result<(String, serde_json::Value)>> {
    let rest = line.trim().strip_prefix(MARKER_PREFIX)?;

    let Some((key, encoded)) = rest.split_once('=') else {
        return Some(Err(DeployError::MalformedMarker(format!(
            "no '=' separator in '{line}'"
        ))));
    };

    if !key_re().is_match(key) {
        return Some(Err(DeployError::MalformedMarker(format!(
            "invalid key '{key}'"
        ))));
    }

    let decoded = match BASE64.decode(encoded.trim()) {
        Ok(bytes) => bytes,
        Err(e) => {
            return Some(Err(DeployError::MalformedMarker(format!(
                "key '{key}': invalid base64: {e}"
            ))))
        }
    };

    match serde_json::from_slice(&decoded) {
        Ok(value) => Some(Ok((key.to_string(), value))),
        Err(e) => Some(Err(DeployError::MalformedMarker(format!(
            "key '{key}': payload is not JSON: {e}"
        )))),
    }
}

/// Collect every marker in an invocation's stdout. Multiple markers are
/// all returned; a later marker for the same key wins.
pub fn collect_outputs(stdout: &str) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut outputs = BTreeMap::new();
    for line in stdout.lines() {
        if let Some(parsed) = parse_line(line) {
            let (key, value) = parsed?;
            outputs.insert(key, value);
        }
    }
    Ok(outputs)
}

/// Encode a marker line. Used by tests and by driver playbooks that
/// report results back through the channel.
pub fn encode_marker(key: &str, value: &serde_json::Value) -> String {
    let payload = BASE64.encode(serde_json::to_vec(value).unwrap_or_default());
    format!("{MARKER_PREFIX}{key}={payload}")
}
