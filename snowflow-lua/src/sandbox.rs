//! Lua sandbox creation
//!
//! Pipeline registries are plain Lua files evaluated in a restricted sandbox.
//! Only tables, strings and math are available; there is no way to reach the
//! filesystem, the network or other processes.
//!
//! The `pipeline` module is injected into every sandbox:
//! - `pipeline.node{ name, inputs, outputs }` declares one node
//! - `pipeline.concat(a, b, ...)` joins nodes and node lists into one list
//! - `pipeline.registry{ name = nodes, ... }` marks the returned registry

use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib, Table, Value, Variadic};

/// Field set on every table produced by `pipeline.node`
pub(crate) const NODE_MARKER: &str = "__snowflow_node";

/// Create a restricted Lua sandbox with the `pipeline` module registered
///
/// # Example
/// ```no_run
/// use snowflow_lua::sandbox::create_sandbox;
///
/// let lua = create_sandbox()?;
/// let name: String = lua
///     .load(r#"return pipeline.node{ name = "a", inputs = "x", outputs = "y" }.name"#)
///     .eval()?;
/// assert_eq!(name, "a");
/// # Ok::<(), mlua::Error>(())
/// ```
pub fn create_sandbox() -> LuaResult<Lua> {
    // IO, OS, PACKAGE and DEBUG are never loaded
    let lua = unsafe {
        Lua::unsafe_new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH,
            LuaOptions::default(),
        )
    };

    lua.globals().set("require", mlua::Nil)?;
    lua.globals().set("dofile", mlua::Nil)?;
    lua.globals().set("loadfile", mlua::Nil)?;
    lua.globals().set("load", mlua::Nil)?;

    register_pipeline_module(&lua)?;

    Ok(lua)
}

fn register_pipeline_module(lua: &Lua) -> LuaResult<()> {
    let pipeline = lua.create_table()?;

    let node_fn = lua.create_function(|lua, definition: Table| create_node(lua, definition))?;
    pipeline.set("node", node_fn)?;

    let concat_fn = lua.create_function(|lua, parts: Variadic<Table>| concat_nodes(lua, parts))?;
    pipeline.set("concat", concat_fn)?;

    // The registry is returned as-is; the parser does the validation
    let registry_fn = lua.create_function(|_, registry: Table| Ok(registry))?;
    pipeline.set("registry", registry_fn)?;

    lua.globals().set("pipeline", pipeline)?;

    Ok(())
}

/// Normalize a node definition: `inputs`/`outputs` become arrays of strings
fn create_node(lua: &Lua, definition: Table) -> LuaResult<Table> {
    let name: String = definition
        .get("name")
        .map_err(|_| mlua::Error::runtime("pipeline.node requires a string 'name'"))?;

    let node = lua.create_table()?;
    node.set("name", name.as_str())?;
    node.set(
        "inputs",
        dataset_list(lua, &name, "inputs", definition.get("inputs")?)?,
    )?;
    node.set(
        "outputs",
        dataset_list(lua, &name, "outputs", definition.get("outputs")?)?,
    )?;
    node.set(NODE_MARKER, true)?;
    Ok(node)
}

/// Accepts nil, a single dataset name, an array, or a mapping of names
fn dataset_list(lua: &Lua, node: &str, field: &str, value: Value) -> LuaResult<Table> {
    let list = lua.create_table()?;
    match value {
        Value::Nil => {}
        Value::String(s) => list.push(s)?,
        Value::Table(table) => {
            for pair in table.pairs::<Value, Value>() {
                let (_, dataset) = pair?;
                match dataset {
                    Value::String(s) => list.push(s)?,
                    other => {
                        return Err(mlua::Error::runtime(format!(
                            "node '{}': every entry of '{}' must be a string, got {}",
                            node,
                            field,
                            other.type_name()
                        )));
                    }
                }
            }
        }
        other => {
            return Err(mlua::Error::runtime(format!(
                "node '{}': '{}' must be a string or a table, got {}",
                node,
                field,
                other.type_name()
            )));
        }
    }
    Ok(list)
}

fn is_node(table: &Table) -> bool {
    table.get::<bool>(NODE_MARKER).unwrap_or(false)
}

/// Flatten nodes and node lists into a single list, preserving order
fn concat_nodes(lua: &Lua, parts: Variadic<Table>) -> LuaResult<Table> {
    let joined = lua.create_table()?;
    for part in parts {
        if is_node(&part) {
            joined.push(part)?;
            continue;
        }
        for node in part.sequence_values::<Table>() {
            let node = node?;
            if !is_node(&node) {
                return Err(mlua::Error::runtime(
                    "pipeline.concat accepts only nodes and lists of nodes",
                ));
            }
            joined.push(node)?;
        }
    }
    Ok(joined)
}
