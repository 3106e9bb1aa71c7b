//! Domain types for quotawatch.
//!
//! These types describe what the watch feed delivers (pods, nodes, quota
//! records, instantaneous usage), the per-department totals the engine
//! maintains, and the JSON views served over HTTP.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::quantity::Quantity;

// ── Architecture class ─────────────────────────────────────────────

/// Hardware/OS family of a node, and of the instances scheduled onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArchClass {
    /// Conventional (non-XC) x86 nodes.
    NonXc,
    /// XC nodes running kylin on arm.
    XcArm,
    /// XC nodes running kylin on x86 (hygon).
    XcX86,
}

impl ArchClass {
    pub const ALL: [ArchClass; 3] = [ArchClass::NonXc, ArchClass::XcArm, ArchClass::XcX86];

    /// Wire name, as used in views, config, and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchClass::NonXc => "nonXc",
            ArchClass::XcArm => "xcArm",
            ArchClass::XcX86 => "xcX86",
        }
    }

    /// Parse a wire name (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        ArchClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for ArchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Watch-feed objects ─────────────────────────────────────────────

/// Stable identity of a workload instance: `(namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub namespace: String,
    pub name: String,
}

impl InstanceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A workload instance (pod) as delivered by the watch feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodObject {
    pub namespace: String,
    pub name: String,
    /// Node the pod is scheduled on; empty while pending.
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl PodObject {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.namespace, &self.name)
    }

    /// Value of the department label, or `""` when absent.
    pub fn department<'a>(&'a self, label: &str) -> &'a str {
        self.labels.get(label).map(String::as_str).unwrap_or("")
    }
}

/// A cluster node as delivered by the watch feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeObject {
    pub name: String,
    pub allocatable_cpu: Quantity,
    pub allocatable_memory: Quantity,
}

/// Instantaneous CPU/memory reading for a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUsage {
    pub cpu: Quantity,
    pub memory: Quantity,
}

// ── Quota records and usage ────────────────────────────────────────

/// One memory amount per architecture pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolMemory {
    #[serde(default)]
    pub non_xc: Quantity,
    #[serde(default)]
    pub xc_arm: Quantity,
    #[serde(default)]
    pub xc_x86: Quantity,
}

impl PoolMemory {
    pub fn get(&self, class: ArchClass) -> Quantity {
        match class {
            ArchClass::NonXc => self.non_xc,
            ArchClass::XcArm => self.xc_arm,
            ArchClass::XcX86 => self.xc_x86,
        }
    }

    pub fn get_mut(&mut self, class: ArchClass) -> &mut Quantity {
        match class {
            ArchClass::NonXc => &mut self.non_xc,
            ArchClass::XcArm => &mut self.xc_arm,
            ArchClass::XcX86 => &mut self.xc_x86,
        }
    }
}

/// A department's quota record: static limits plus the last usage the
/// department announced. Read-only to quotawatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    pub department: String,
    #[serde(default)]
    pub limits: PoolMemory,
    #[serde(default)]
    pub announced: PoolMemory,
}

/// Tracked usage of one department. All quantities stay non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DepartmentAggregate {
    pub memory: PoolMemory,
    pub instance_count: u64,
}

// ── Views ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemoryLimit {
    pub memory: Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolLimits {
    pub limits: MemoryLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XcLimits {
    pub arm: PoolLimits,
    pub x86: PoolLimits,
}

/// Limits (or announced usage) shaped as `{nonXc, xc: {arm, x86}}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolLimitView {
    pub non_xc: PoolLimits,
    pub xc: XcLimits,
}

impl From<PoolMemory> for PoolLimitView {
    fn from(pools: PoolMemory) -> Self {
        let limits = |memory| PoolLimits {
            limits: MemoryLimit { memory },
        };
        Self {
            non_xc: limits(pools.non_xc),
            xc: XcLimits {
                arm: limits(pools.xc_arm),
                x86: limits(pools.xc_x86),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XcUsage {
    pub arm: MemoryLimit,
    pub x86: MemoryLimit,
}

/// Tracked usage shaped as `{nonXc: {memory}, xc: {arm: {memory}, x86: {memory}}}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolUsageView {
    pub non_xc: MemoryLimit,
    pub xc: XcUsage,
}

impl From<PoolMemory> for PoolUsageView {
    fn from(pools: PoolMemory) -> Self {
        Self {
            non_xc: MemoryLimit {
                memory: pools.non_xc,
            },
            xc: XcUsage {
                arm: MemoryLimit {
                    memory: pools.xc_arm,
                },
                x86: MemoryLimit {
                    memory: pools.xc_x86,
                },
            },
        }
    }
}

/// One row of the department usage view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartmentView {
    pub name: String,
    pub resources: PoolLimitView,
    pub announced: PoolLimitView,
    pub used: PoolUsageView,
    pub pods: u64,
}

impl DepartmentView {
    /// Join a quota record with the department's tracked usage.
    pub fn from_parts(quota: &QuotaRecord, usage: &DepartmentAggregate) -> Self {
        Self {
            name: quota.department.clone(),
            resources: quota.limits.into(),
            announced: quota.announced.into(),
            used: usage.memory.into(),
            pods: usage.instance_count,
        }
    }

    pub fn used_memory(&self, class: ArchClass) -> Quantity {
        match class {
            ArchClass::NonXc => self.used.non_xc.memory,
            ArchClass::XcArm => self.used.xc.arm.memory,
            ArchClass::XcX86 => self.used.xc.x86.memory,
        }
    }

    pub fn limit_memory(&self, class: ArchClass) -> Quantity {
        match class {
            ArchClass::NonXc => self.resources.non_xc.limits.memory,
            ArchClass::XcArm => self.resources.xc.arm.limits.memory,
            ArchClass::XcX86 => self.resources.xc.x86.limits.memory,
        }
    }
}

/// CPU and memory pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuMemory {
    pub cpu: Quantity,
    pub memory: Quantity,
}

impl std::ops::AddAssign for CpuMemory {
    fn add_assign(&mut self, rhs: CpuMemory) {
        self.cpu += rhs.cpu;
        self.memory += rhs.memory;
    }
}

/// One row of the node usage view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub name: String,
    #[serde(rename = "type")]
    pub arch: ArchClass,
    pub allocatable: CpuMemory,
    pub used: CpuMemory,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct XcCapacity {
    pub arm: CpuMemory,
    pub x86: CpuMemory,
}

/// Allocatable capacity of the whole cluster, per architecture class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub non_xc_limits_resources: CpuMemory,
    pub xc_limits_resources: XcCapacity,
}

impl ClusterView {
    /// Sum allocatable capacity over node rows.
    pub fn from_nodes(nodes: &[NodeView]) -> Self {
        let mut view = ClusterView::default();
        for node in nodes {
            let slot = match node.arch {
                ArchClass::NonXc => &mut view.non_xc_limits_resources,
                ArchClass::XcArm => &mut view.xc_limits_resources.arm,
                ArchClass::XcX86 => &mut view.xc_limits_resources.x86,
            };
            *slot += node.allocatable;
        }
        view
    }
}
