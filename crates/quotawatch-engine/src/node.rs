//! Per-node capacity and usage table.
//!
//! Node notifications always carry a complete object, so each add or
//! update replaces the entry wholesale; no incremental arithmetic.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use quotawatch_state::{ArchClass, CpuMemory, NodeObject, NodeUsage, NodeView};

/// Full snapshot of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    /// `None` when the classifier drops the name.
    pub arch: Option<ArchClass>,
    pub allocatable: CpuMemory,
    pub used: CpuMemory,
}

impl NodeRecord {
    /// Build a record; a missing usage reading becomes zero.
    pub fn from_object(node: &NodeObject, arch: Option<ArchClass>, usage: Option<NodeUsage>) -> Self {
        let usage = usage.unwrap_or_default();
        Self {
            name: node.name.clone(),
            arch,
            allocatable: CpuMemory {
                cpu: node.allocatable_cpu,
                memory: node.allocatable_memory,
            },
            used: CpuMemory {
                cpu: usage.cpu,
                memory: usage.memory,
            },
        }
    }

    fn view(&self) -> Option<NodeView> {
        Some(NodeView {
            name: self.name.clone(),
            arch: self.arch?,
            allocatable: self.allocatable,
            used: self.used,
        })
    }
}

/// Node name → latest full record.
#[derive(Debug, Default)]
pub struct NodeAggregator {
    nodes: BTreeMap<String, NodeRecord>,
}

impl NodeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_node_added(&mut self, record: NodeRecord) {
        debug!(node = %record.name, arch = ?record.arch, "node tracked");
        self.upsert(record);
    }

    pub fn on_node_updated(&mut self, record: NodeRecord) {
        self.upsert(record);
    }

    /// Returns `true` if the node was tracked.
    pub fn on_node_deleted(&mut self, name: &str) -> bool {
        self.nodes.remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// One row per classified node, ordered by name.
    pub fn snapshot(&self) -> Vec<NodeView> {
        self.nodes.values().filter_map(NodeRecord::view).collect()
    }

    fn upsert(&mut self, record: NodeRecord) {
        trace!(node = %record.name, arch = ?record.arch, "node record replaced");
        self.nodes.insert(record.name.clone(), record);
    }
}
