//! Scheduler task SQL
//!
//! Text forms of the three statement kinds a compiled pipeline is made of:
//! the root task (the only one with a schedule), one task per node chained
//! with `after`, and the activation statements that start the graph.

/// Quote a value as a SQL string literal, doubling embedded quotes
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Emits per-node task statements
///
/// Every node task calls the same node-executor procedure and reads the run
/// identifier from the root task's return value, never from its direct
/// predecessor, so the value does not have to be forwarded down the chain.
#[derive(Debug, Clone)]
pub struct TaskEmitter<'a> {
    pub environment: &'a str,
    pub procedure: &'a str,
    pub root_task_name: &'a str,
}

impl TaskEmitter<'_> {
    /// Render one node task
    ///
    /// # Arguments
    /// * `task_name` - Sanitized task name
    /// * `warehouse` - Warehouse the task runs on
    /// * `after_tasks` - Root task first, then the direct predecessors
    /// * `pipeline_name` - Logical pipeline passed to the procedure
    /// * `nodes_to_run` - Node names passed to the procedure
    /// * `extra_params` - Serialized parameter overrides
    pub fn emit_task(
        &self,
        task_name: &str,
        warehouse: &str,
        after_tasks: &[String],
        pipeline_name: &str,
        nodes_to_run: &[String],
        extra_params: Option<&str>,
    ) -> String {
        let nodes = nodes_to_run
            .iter()
            .map(|n| quote(n))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "create or replace task {task_name}\n\
             warehouse = {warehouse}\n\
             after {after}\n\
             as \n\
             call {procedure}({environment}, system$get_predecessor_return_value({root}), {pipeline}, ARRAY_CONSTRUCT({nodes}), {extra});",
            warehouse = quote(warehouse),
            after = after_tasks.join(","),
            procedure = self.procedure,
            environment = quote(self.environment),
            root = quote(self.root_task_name),
            pipeline = quote(pipeline_name),
            extra = quote(extra_params.unwrap_or_default()),
        )
    }
}

/// Render the scheduled root task
pub fn emit_root_task(
    task_name: &str,
    warehouse: &str,
    schedule: &str,
    root_procedure: &str,
) -> String {
    format!(
        "create or replace task {task_name}\n\
         warehouse = {}\n\
         schedule = {}\n\
         as\n\
         call {root_procedure}();",
        quote(warehouse),
        quote(schedule),
    )
}

/// Enable the dependents, resume the root and fire it once
pub fn activation_statements(root_task_name: &str) -> Vec<String> {
    vec![
        format!(
            "call SYSTEM$TASK_DEPENDENTS_ENABLE({});",
            quote(root_task_name)
        ),
        format!("alter task {root_task_name} resume;"),
        format!("execute task {root_task_name};"),
    ]
}
