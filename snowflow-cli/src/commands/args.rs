//! Shared argument parsing

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+=").expect("valid env-var regex"));

/// Parse `--params` into a compact JSON string
///
/// Surrounding single quotes are ignored. Empty or falsy documents yield
/// `None`.
pub fn parse_extra_params(params: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = params.map(|p| p.trim_matches('\'')).filter(|p| !p.is_empty()) else {
        return Ok(None);
    };

    let value: JsonValue =
        serde_json::from_str(raw).map_err(|e| anyhow!("Invalid --params JSON: {}", e))?;
    let empty = match &value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(items) => items.is_empty(),
        JsonValue::String(s) => s.is_empty(),
        JsonValue::Bool(b) => !b,
        JsonValue::Number(_) => false,
    };
    if empty {
        return Ok(None);
    }
    Ok(Some(value.to_string()))
}

/// Parse repeated `--env-var KEY=VALUE` entries
pub fn parse_extra_env(entries: &[String]) -> Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    for entry in entries {
        if !ENV_VAR_RE.is_match(entry) {
            bail!("Invalid env-var: {}, expected format: KEY=VALUE", entry);
        }
        if let Some((key, value)) = entry.split_once('=') {
            env.insert(key.to_string(), value.to_string());
        }
    }
    Ok(env)
}
