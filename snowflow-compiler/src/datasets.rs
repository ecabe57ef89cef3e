//! Intermediate datasets of a remote run
//!
//! Datasets a node produces that are not declared in the project catalog
//! are persisted between tasks by the node executor. Snowpark data frames
//! go to a transient table, any other value is pickled onto the temporary
//! stage. Both strategies are keyed by the run identifier so concurrent
//! runs do not read each other's data.
//!
//! The strategy table, the load order and the naming rule below are
//! rendered into the node executor, whose adapter classes carry the
//! `exists`/`load`/`save` side.

use std::collections::BTreeMap;

pub const TABLE_PREFIX: &str = "snowflow_tmp_";
pub const RUN_ID_COLUMN: &str = "snowflow_run_id";
pub const STORAGE_DIR: &str = "snowflow-storage";

/// Characters replaced with `_` in table names, the rule of
/// [`snowflow_core::naming::sanitize`]
pub const NON_IDENTIFIER_PATTERN: &str = "[^A-Za-z0-9_]";

/// Shape of a value produced by a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    DataFrame,
    Other,
}

impl ValueKind {
    pub const ALL: [ValueKind; 2] = [ValueKind::DataFrame, ValueKind::Other];

    /// Key the node executor computes for a value
    pub fn key(&self) -> &'static str {
        match self {
            Self::DataFrame => "DataFrame",
            Self::Other => "Other",
        }
    }
}

/// Persistence strategy for an intermediate dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    TransientTable,
    StagePickle,
}

impl Strategy {
    /// Tried in this order on load; the last one is loaded unconditionally
    pub const LOAD_ORDER: [Strategy; 2] = [Strategy::TransientTable, Strategy::StagePickle];

    /// Adapter class implementing the strategy in the node executor
    pub fn adapter(&self) -> &'static str {
        match self {
            Self::TransientTable => "TransientTableDataset",
            Self::StagePickle => "StagePickleDataset",
        }
    }
}

/// Data frames live in tables, everything else in pickles
pub fn select_strategy(kind: ValueKind) -> Strategy {
    match kind {
        ValueKind::DataFrame => Strategy::TransientTable,
        ValueKind::Other => Strategy::StagePickle,
    }
}

/// Value kind key to adapter class, used when saving
pub fn save_strategies() -> BTreeMap<&'static str, &'static str> {
    ValueKind::ALL
        .iter()
        .map(|kind| (kind.key(), select_strategy(*kind).adapter()))
        .collect()
}

/// Adapter classes in the order loads try them
pub fn load_order() -> Vec<&'static str> {
    Strategy::LOAD_ORDER.iter().map(Strategy::adapter).collect()
}
