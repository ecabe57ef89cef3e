//! Pipeline graph domain types
//!
//! A pipeline is a set of nodes connected through the datasets they consume
//! and produce. The graph keeps two views of the same relation:
//! - `nodes()`: the nodes in topological order, the only ordering source
//! - `node_dependencies()`: node name to direct predecessor names, for lookup only

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::GraphError;

/// A single named unit of computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub inputs: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
}

impl Node {
    pub fn new<I, O, S, T>(name: impl Into<String>, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = S>,
        O: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            name: name.into(),
            inputs: inputs.into_iter().map(Into::into).collect(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }
}

/// Topologically ordered pipeline graph
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    nodes: Vec<Node>,
    dependencies: HashMap<String, BTreeSet<String>>,
}

impl PipelineGraph {
    /// Build a graph from nodes in any order
    ///
    /// Node B depends on node A when one of B's inputs is an output of A.
    /// Nodes are released level by level (Kahn's algorithm), each level
    /// sorted by name, so the resulting order is deterministic.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Two nodes share a name, or a name is empty
    /// - A dataset is produced by more than one node
    /// - The dependencies contain a cycle
    pub fn new(nodes: Vec<Node>) -> Result<Self, GraphError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut producers: HashMap<&str, usize> = HashMap::new();

        for (idx, node) in nodes.iter().enumerate() {
            if node.name.is_empty() {
                return Err(GraphError::EmptyName);
            }
            if index.insert(node.name.as_str(), idx).is_some() {
                return Err(GraphError::DuplicateNode(node.name.clone()));
            }
            for output in &node.outputs {
                if let Some(&first) = producers.get(output.as_str()) {
                    return Err(GraphError::OutputNotUnique {
                        dataset: output.clone(),
                        first: nodes[first].name.clone(),
                        second: node.name.clone(),
                    });
                }
                producers.insert(output.as_str(), idx);
            }
        }

        let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nodes.len()];
        for (idx, node) in nodes.iter().enumerate() {
            for input in &node.inputs {
                if let Some(&producer) = producers.get(input.as_str()) {
                    predecessors[idx].insert(producer);
                    successors[producer].insert(idx);
                }
            }
        }

        let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
        let mut level: Vec<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(nodes.len());

        while !level.is_empty() {
            level.sort_by(|&a, &b| nodes[a].name.cmp(&nodes[b].name));
            let mut next = Vec::new();
            for &idx in &level {
                order.push(idx);
                for &succ in &successors[idx] {
                    in_degree[succ] -= 1;
                    if in_degree[succ] == 0 {
                        next.push(succ);
                    }
                }
            }
            level = next;
        }

        if order.len() != nodes.len() {
            let mut stuck: Vec<String> = (0..nodes.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| nodes[i].name.clone())
                .collect();
            stuck.sort();
            return Err(GraphError::Cycle(stuck));
        }

        let dependencies = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let deps = predecessors[idx]
                    .iter()
                    .map(|&p| nodes[p].name.clone())
                    .collect();
                (node.name.clone(), deps)
            })
            .collect();

        let mut slots: Vec<Option<Node>> = nodes.into_iter().map(Some).collect();
        let nodes = order
            .into_iter()
            .filter_map(|idx| slots[idx].take())
            .collect();

        Ok(Self {
            nodes,
            dependencies,
        })
    }

    /// Nodes in topological order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Node name to direct predecessor names
    ///
    /// Not an ordering source: iterate `nodes()` and look predecessors up here.
    pub fn node_dependencies(&self) -> &HashMap<String, BTreeSet<String>> {
        &self.dependencies
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
