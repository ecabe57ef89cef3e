//! Pipeline registry parser
//!
//! Evaluates a registry file in the sandbox and extracts, for every named
//! pipeline, the list of nodes it is made of. Nothing in the file is executed
//! besides the table construction itself.

use anyhow::{Context, Result, anyhow};
use mlua::{Table, Value};
use snowflow_core::domain::graph::{Node, PipelineGraph};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::sandbox::create_sandbox;

/// Named pipelines declared by a registry file
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Vec<Node>>,
}

impl PipelineRegistry {
    /// Names of all declared pipelines, sorted
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.keys().map(String::as_str)
    }

    pub fn nodes(&self, pipeline_name: &str) -> Option<&[Node]> {
        self.pipelines.get(pipeline_name).map(Vec::as_slice)
    }

    /// Build the dependency graph of one pipeline
    ///
    /// # Errors
    /// Returns an error if the pipeline is not declared or its nodes do not
    /// form a valid graph.
    pub fn graph(&self, pipeline_name: &str) -> Result<PipelineGraph> {
        let nodes = self.nodes(pipeline_name).ok_or_else(|| {
            anyhow!(
                "Pipeline '{}' not found, available: {}",
                pipeline_name,
                self.names().collect::<Vec<_>>().join(", ")
            )
        })?;

        PipelineGraph::new(nodes.to_vec())
            .with_context(|| format!("Invalid pipeline '{}'", pipeline_name))
    }
}

/// Parse a pipeline registry from Lua source code
///
/// # Errors
/// Returns an error if:
/// - The Lua source is invalid
/// - The file does not return a table
/// - A registry entry is not a list of `pipeline.node` values
///
/// # Example
/// ```no_run
/// use snowflow_lua::parser::parse_pipeline_registry;
///
/// let source = r#"
///     local dp = {
///         pipeline.node { name = "preprocess", inputs = "raw", outputs = "clean" },
///     }
///     return pipeline.registry { __default__ = dp }
/// "#;
///
/// let registry = parse_pipeline_registry(source)?;
/// assert_eq!(registry.nodes("__default__").unwrap().len(), 1);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn parse_pipeline_registry(source: &str) -> Result<PipelineRegistry> {
    let lua = create_sandbox().context("Failed to create pipeline sandbox")?;

    let registry: Table = lua
        .load(source)
        .eval()
        .context("Failed to evaluate pipeline registry")?;

    let mut pipelines = BTreeMap::new();
    for pair in registry.pairs::<String, Table>() {
        let (name, nodes_table) =
            pair.context("Registry entries must map pipeline names to node lists")?;
        let nodes = parse_nodes(&name, &nodes_table)?;
        debug!("Pipeline '{}' declares {} node(s)", name, nodes.len());
        pipelines.insert(name, nodes);
    }

    Ok(PipelineRegistry { pipelines })
}

/// Read and parse a registry file from disk
pub fn load_pipeline_registry(path: impl AsRef<Path>) -> Result<PipelineRegistry> {
    let path = path.as_ref();
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline registry {}", path.display()))?;
    parse_pipeline_registry(&source)
        .with_context(|| format!("Failed to parse pipeline registry {}", path.display()))
}

fn parse_nodes(pipeline_name: &str, nodes_table: &Table) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();

    for entry in nodes_table.sequence_values::<Table>() {
        let node_table = entry.with_context(|| {
            format!("Pipeline '{}' must be a list of nodes", pipeline_name)
        })?;

        let name: String = node_table
            .get("name")
            .with_context(|| format!("Node in pipeline '{}' must have a 'name'", pipeline_name))?;
        let inputs = parse_datasets(&node_table, "inputs")
            .with_context(|| format!("Node '{}' has invalid inputs", name))?;
        let outputs = parse_datasets(&node_table, "outputs")
            .with_context(|| format!("Node '{}' has invalid outputs", name))?;

        nodes.push(Node::new(name, inputs, outputs));
    }

    Ok(nodes)
}

fn parse_datasets(node_table: &Table, field: &str) -> Result<Vec<String>> {
    match node_table.get::<Value>(field)? {
        Value::Nil => Ok(Vec::new()),
        Value::Table(table) => table
            .sequence_values::<String>()
            .map(|v| v.context("Dataset names must be strings"))
            .collect(),
        _ => Err(anyhow!("Field '{}' must be an array of strings", field)),
    }
}
