//! Project configuration loading
//!
//! Configuration lives under `<project>/conf/`. The `base` environment is
//! always read first and the selected environment is merged on top of it,
//! key by key. `${VAR}` references in string values are substituted from
//! the process environment after parsing, so comments never need them set.

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use crate::domain::config::{CredentialsEntry, SnowflowConfig};
use crate::error::ConfigError;

const BASE_ENV: &str = "base";
const PLUGIN_FILE: &str = "snowflake.yml";
const CREDENTIALS_FILE: &str = "credentials.yml";

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// Expand `${VAR}` references inside the string values of a document
///
/// Keys are left alone. A value that is exactly one reference takes the
/// type of the substituted text, so `port: ${PORT}` stays a number.
///
/// # Errors
/// Returns an error listing every referenced variable that is not set.
pub fn substitute_env_vars(value: Value) -> Result<Value, ConfigError> {
    let mut missing = Vec::new();
    let value = expand(value, &mut missing);

    if !missing.is_empty() {
        return Err(ConfigError::MissingEnvVars(missing));
    }

    Ok(value)
}

fn expand(value: Value, missing: &mut Vec<String>) -> Value {
    match value {
        Value::String(text) => expand_scalar(&text, missing),
        Value::Sequence(items) => {
            Value::Sequence(items.into_iter().map(|v| expand(v, missing)).collect())
        }
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(k, v)| (k, expand(v, missing)))
                .collect(),
        ),
        Value::Tagged(mut tagged) => {
            tagged.value = expand(tagged.value, missing);
            Value::Tagged(tagged)
        }
        other => other,
    }
}

fn expand_scalar(text: &str, missing: &mut Vec<String>) -> Value {
    let expanded = ENV_VAR_RE
        .replace_all(text, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                missing.push(caps[1].to_string());
                String::new()
            })
        })
        .into_owned();

    let whole = ENV_VAR_RE
        .find(text)
        .is_some_and(|m| m.start() == 0 && m.end() == text.len());
    if whole {
        if let Ok(typed @ (Value::Bool(_) | Value::Number(_))) = serde_yaml::from_str(&expanded) {
            return typed;
        }
    }
    Value::String(expanded)
}

/// Loads plugin configuration and credentials for one environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    conf_dir: PathBuf,
    env: String,
}

impl ConfigLoader {
    /// # Arguments
    /// * `project_dir` - Project root containing `conf/`
    /// * `env` - Environment overlaid on top of `base`
    pub fn new(project_dir: impl AsRef<Path>, env: impl Into<String>) -> Self {
        Self {
            conf_dir: project_dir.as_ref().join("conf"),
            env: env.into(),
        }
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// Load and validate the merged `snowflake.yml`
    pub fn load_plugin_config(&self) -> Result<SnowflowConfig, ConfigError> {
        let merged = self.load_merged(PLUGIN_FILE)?.ok_or_else(|| {
            ConfigError::MissingSection(self.conf_dir.display().to_string())
        })?;

        let has_section = merged
            .as_mapping()
            .is_some_and(|m| m.contains_key("snowflake"));
        if !has_section {
            return Err(ConfigError::MissingSection(
                self.conf_dir.display().to_string(),
            ));
        }

        let config: SnowflowConfig = from_value(merged, PLUGIN_FILE)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the merged `credentials.yml`, empty when absent
    pub fn load_credentials(&self) -> Result<BTreeMap<String, CredentialsEntry>, ConfigError> {
        match self.load_merged(CREDENTIALS_FILE)? {
            Some(value) => from_value(value, CREDENTIALS_FILE),
            None => Ok(BTreeMap::new()),
        }
    }

    /// Read `file` from `base` and the selected environment and merge them
    fn load_merged(&self, file: &str) -> Result<Option<Value>, ConfigError> {
        let mut envs = vec![BASE_ENV];
        if self.env != BASE_ENV {
            envs.push(self.env.as_str());
        }

        let mut merged: Option<Value> = None;
        for env in envs {
            let path = self.conf_dir.join(env).join(file);
            if !path.is_file() {
                debug!("No {} in {}", file, path.display());
                continue;
            }
            let layer = read_yaml(&path)?;
            if layer.is_null() {
                continue;
            }
            merged = Some(match merged {
                Some(base) => merge(base, layer),
                None => layer,
            });
        }
        Ok(merged)
    }
}

fn read_yaml(path: &Path) -> Result<Value, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let parsed = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Yaml {
        path: path.display().to_string(),
        source: e,
    })?;
    substitute_env_vars(parsed)
}

fn from_value<T: DeserializeOwned>(value: Value, file: &str) -> Result<T, ConfigError> {
    serde_yaml::from_value(value).map_err(|e| ConfigError::Yaml {
        path: file.to_string(),
        source: e,
    })
}

/// Deep-merge two YAML documents, `overlay` wins on conflicts
fn merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}
