//! `{{name}}` placeholder substitution

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::{CompileError, Result};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("valid placeholder regex")
});

/// A source template with named placeholders
#[derive(Debug, Clone, Copy)]
pub struct Template {
    pub name: &'static str,
    pub source: &'static str,
}

impl Template {
    pub const fn new(name: &'static str, source: &'static str) -> Self {
        Self { name, source }
    }

    /// Placeholder names used by the template, sorted
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = PLACEHOLDER_RE
            .captures_iter(self.source)
            .map(|caps| caps[1].to_string())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Substitute every placeholder
    ///
    /// # Errors
    /// Returns an error listing every placeholder without a value.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> Result<String> {
        let mut missing = Vec::new();
        let rendered = PLACEHOLDER_RE.replace_all(self.source, |caps: &regex::Captures| {
            match values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => {
                    missing.push(caps[1].to_string());
                    String::new()
                }
            }
        });

        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(CompileError::UnresolvedPlaceholders {
                template: self.name.to_string(),
                missing,
            });
        }

        Ok(rendered.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GREETING: Template = Template::new("greeting", "hello {{ name }}, {{name}} from {{place}}");

    #[test]
    fn test_render() {
        let values = BTreeMap::from([("name", "ada".to_string()), ("place", "x".to_string())]);
        assert_eq!(GREETING.render(&values).unwrap(), "hello ada, ada from x");
    }

    #[test]
    fn test_missing_values_reported_once() {
        let values = BTreeMap::from([("place", "x".to_string())]);
        let err = GREETING.render(&values).unwrap_err();
        match err {
            CompileError::UnresolvedPlaceholders { template, missing } => {
                assert_eq!(template, "greeting");
                assert_eq!(missing, vec!["name"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(GREETING.placeholders(), vec!["name", "place"]);
    }

    #[test]
    fn test_values_are_not_rescanned() {
        let values = BTreeMap::from([("name", "{{place}}".to_string()), ("place", "x".to_string())]);
        assert_eq!(GREETING.render(&values).unwrap(), "hello {{place}}, {{place}} from x");
    }
}
