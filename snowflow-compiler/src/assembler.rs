//! Dependency-ordered task assembly
//!
//! Turns a pipeline graph into the ordered list of task statements: the root
//! task first, then one task per node in topological order. The dependency
//! map is only consulted for predecessor lookup.

use snowflow_core::domain::config::RuntimeConfig;
use snowflow_core::domain::graph::PipelineGraph;
use snowflow_core::naming::{sanitize, sanitize_upper};
use std::collections::HashMap;
use tracing::debug;

use crate::artifact::TaskPlan;
use crate::emit::{TaskEmitter, activation_statements, emit_root_task};
use crate::error::{CompileError, Result};

const NODE_PROCEDURE: &str = "SNOWFLOW_RUN";
const ROOT_PROCEDURE: &str = "SNOWFLOW_START_RUN";

/// Scheduler object names derived from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingPolicy {
    pub root_task_name: String,
    pub root_procedure: String,
    pub node_procedure: String,
}

impl NamingPolicy {
    /// # Arguments
    /// * `runtime` - Provides the procedure suffix and pipeline name mapping
    /// * `pipeline_name` - Logical pipeline name, mapped before use
    pub fn new(runtime: &RuntimeConfig, pipeline_name: &str) -> Self {
        let suffix = &runtime.stored_procedure_name_suffix;
        let mapped = runtime.mapped_pipeline_name(pipeline_name);
        Self {
            root_task_name: sanitize_upper(&format!("SNOWFLOW_{}_START_RUN", mapped)),
            root_procedure: sanitize_upper(&format!("{}{}", ROOT_PROCEDURE, suffix)),
            node_procedure: sanitize_upper(&format!("{}{}", NODE_PROCEDURE, suffix)),
        }
    }
}

/// Everything besides the graph that ends up in the task statements
#[derive(Debug, Clone)]
pub struct PlanSettings {
    pub environment: String,
    pub warehouse: String,
    pub schedule: String,
    pub pipeline_name: String,
    /// Serialized parameter overrides, passed verbatim to every node
    pub extra_params: Option<String>,
    pub naming: NamingPolicy,
}

/// Build the task plan for a graph
///
/// # Errors
/// Returns [`CompileError::TaskNameCollision`] when two nodes, or a node and
/// the root task, sanitize to the same task name. Nothing is emitted in that
/// case.
pub fn assemble(graph: &PipelineGraph, settings: &PlanSettings) -> Result<TaskPlan> {
    let root = settings.naming.root_task_name.as_str();
    let task_names = task_names(graph, root)?;

    let emitter = TaskEmitter {
        environment: &settings.environment,
        procedure: &settings.naming.node_procedure,
        root_task_name: root,
    };

    let mut pipeline_tasks_sql = Vec::with_capacity(graph.len() + 1);
    pipeline_tasks_sql.push(emit_root_task(
        root,
        &settings.warehouse,
        &settings.schedule,
        &settings.naming.root_procedure,
    ));

    let dependencies = graph.node_dependencies();
    let mut pipeline_task_names = Vec::with_capacity(graph.len());
    for node in graph.nodes() {
        let task_name = &task_names[node.name.as_str()];
        let after_tasks: Vec<String> = std::iter::once(root.to_string())
            .chain(
                dependencies
                    .get(&node.name)
                    .into_iter()
                    .flatten()
                    .map(|dep| sanitize(dep)),
            )
            .collect();

        debug!("Task {} after {}", task_name, after_tasks.join(","));
        pipeline_tasks_sql.push(emitter.emit_task(
            task_name,
            &settings.warehouse,
            &after_tasks,
            &settings.pipeline_name,
            std::slice::from_ref(&node.name),
            settings.extra_params.as_deref(),
        ));
        pipeline_task_names.push(task_name.clone());
    }

    Ok(TaskPlan {
        pipeline_tasks_sql,
        execute_sql: activation_statements(root),
        root_task_name: root.to_string(),
        pipeline_task_names,
    })
}

/// Sanitized task name per node, rejecting collisions
fn task_names<'g>(graph: &'g PipelineGraph, root: &str) -> Result<HashMap<&'g str, String>> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    owners.insert(root.to_string(), root);

    let mut names = HashMap::with_capacity(graph.len());
    for node in graph.nodes() {
        let task_name = sanitize(&node.name);
        // Unquoted identifiers are case-insensitive remotely
        if let Some(first) = owners.insert(task_name.to_ascii_uppercase(), &node.name) {
            return Err(CompileError::TaskNameCollision {
                task_name,
                first: first.to_string(),
                second: node.name.clone(),
            });
        }
        names.insert(node.name.as_str(), task_name);
    }
    Ok(names)
}
