//! Per-department usage aggregation.
//!
//! Totals are maintained incrementally: every contribution is recorded in
//! an instance-record table keyed by `(namespace, name)`, because later
//! update and delete notifications do not repeat the instance's earlier
//! classification or memory reading. Reversing a contribution always goes
//! through the stored record.
//!
//! Invariant: for every department `D` and pool `P`, the aggregate of `D`
//! in `P` equals the sum of the memory of records with department `D` and
//! class `P`, and the instance count of `D` equals the number of such
//! records. It holds after every call, not just eventually.

use std::collections::HashMap;

use tracing::{debug, trace};

use quotawatch_state::{
    ArchClass, DepartmentAggregate, DepartmentView, InstanceKey, Quantity, QuotaRecord,
};

/// What one tracked instance contributes, and to which pool.
#[derive(Debug, Clone, PartialEq)]
struct InstanceRecord {
    department: String,
    arch: ArchClass,
    memory: Quantity,
}

/// Incremental department totals plus the reverse-lookup table.
#[derive(Debug, Default)]
pub struct DepartmentAggregator {
    aggregates: HashMap<String, DepartmentAggregate>,
    records: HashMap<InstanceKey, InstanceRecord>,
}

impl DepartmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an instance. No-op for an empty department.
    ///
    /// A repeated add for a key that is already tracked replaces the earlier
    /// contribution instead of counting the instance twice.
    pub fn on_instance_added(
        &mut self,
        key: InstanceKey,
        department: &str,
        arch: ArchClass,
        memory: Quantity,
    ) {
        if department.is_empty() {
            return;
        }
        if let Some(prior) = self.records.remove(&key) {
            self.retract(&prior);
        }

        let record = InstanceRecord {
            department: department.to_string(),
            arch,
            memory,
        };
        self.contribute(&record);
        trace!(instance = %key, %department, %arch, %memory, "instance tracked");
        self.records.insert(key, record);
    }

    /// Apply an update notification.
    ///
    /// A missing memory reading counts as zero; the bookkeeping still runs.
    pub fn on_instance_updated(
        &mut self,
        key: InstanceKey,
        department: &str,
        arch: ArchClass,
        memory: Option<Quantity>,
    ) {
        let memory = memory.unwrap_or_default();

        let Some(prior) = self.records.remove(&key) else {
            self.on_instance_added(key, department, arch, memory);
            return;
        };

        self.retract(&prior);
        if department.is_empty() {
            debug!(instance = %key, department = %prior.department, "department label removed");
            return;
        }

        let record = InstanceRecord {
            department: department.to_string(),
            arch,
            memory,
        };
        self.contribute(&record);
        if prior.department != record.department {
            debug!(
                instance = %key,
                from = %prior.department,
                to = %record.department,
                "instance moved between departments"
            );
        }
        self.records.insert(key, record);
    }

    /// Stop tracking an instance. No-op if it was never tracked.
    pub fn on_instance_removed(&mut self, key: &InstanceKey) {
        if let Some(prior) = self.records.remove(key) {
            self.retract(&prior);
            trace!(instance = %key, department = %prior.department, "instance untracked");
        }
    }

    /// Current totals of one department (all zero if never seen).
    pub fn aggregate(&self, department: &str) -> DepartmentAggregate {
        self.aggregates
            .get(department)
            .copied()
            .unwrap_or_default()
    }

    /// Every department that has ever had a contributing instance.
    pub fn aggregates(&self) -> impl Iterator<Item = (&str, &DepartmentAggregate)> {
        self.aggregates.iter().map(|(name, agg)| (name.as_str(), agg))
    }

    /// Number of instances currently tracked.
    pub fn tracked_instances(&self) -> usize {
        self.records.len()
    }

    /// One view row per quota record, joined with tracked usage.
    ///
    /// Departments with usage but no quota record produce no row.
    pub fn snapshot(&self, quotas: &[QuotaRecord]) -> Vec<DepartmentView> {
        quotas
            .iter()
            .map(|quota| DepartmentView::from_parts(quota, &self.aggregate(&quota.department)))
            .collect()
    }

    /// Tracked departments that have no quota record.
    pub fn unquoted_departments<'a>(&'a self, quotas: &[QuotaRecord]) -> Vec<&'a str> {
        let mut names: Vec<&str> = self
            .aggregates
            .keys()
            .map(String::as_str)
            .filter(|name| !quotas.iter().any(|q| q.department == *name))
            .collect();
        names.sort_unstable();
        names
    }

    fn contribute(&mut self, record: &InstanceRecord) {
        let aggregate = self
            .aggregates
            .entry(record.department.clone())
            .or_default();
        *aggregate.memory.get_mut(record.arch) += record.memory;
        aggregate.instance_count += 1;
    }

    fn retract(&mut self, record: &InstanceRecord) {
        if let Some(aggregate) = self.aggregates.get_mut(&record.department) {
            let pool = aggregate.memory.get_mut(record.arch);
            *pool = pool.sub_clamped(record.memory);
            aggregate.instance_count = aggregate.instance_count.saturating_sub(1);
        }
    }
}
