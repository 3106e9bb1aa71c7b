//! The engine object.
//!
//! Built once at startup and shared by every handler. Owns the aggregator
//! state behind one mutex, the two response caches, and the signal senders
//! of the two invalidation workers.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use quotawatch_state::{
    DepartmentAggregate, DepartmentView, InstanceKey, NodeObject, NodeView, PodObject, Quantity,
};

use crate::admission::{self, AdmissionRequest};
use crate::cache::{CacheSnapshot, CacheStatus, CachedRead, ReadOptions, ResponseCache};
use crate::config::EngineConfig;
use crate::department::DepartmentAggregator;
use crate::error::EngineResult;
use crate::feed::{FeedEvents, WatchEvent, WatchFeed};
use crate::node::{NodeAggregator, NodeRecord};
use crate::pipeline::{InvalidationPipeline, RebuildFn, Signal};

/// All mutable aggregator state; guarded by a single lock.
#[derive(Debug, Default)]
struct AggregatorState {
    departments: DepartmentAggregator,
    nodes: NodeAggregator,
}

/// State shared between request handlers and the invalidation workers.
struct Shared {
    feed: Arc<dyn WatchFeed>,
    config: EngineConfig,
    state: Mutex<AggregatorState>,
    department_cache: ResponseCache<DepartmentView>,
    node_cache: ResponseCache<NodeView>,
}

impl Shared {
    /// A failed quota listing is logged and treated as empty.
    async fn rebuild_departments(&self) -> Arc<CacheSnapshot<DepartmentView>> {
        let quotas = match self.feed.list_quotas().await {
            Ok(quotas) => quotas,
            Err(e) => {
                warn!(error = %e, "quota listing failed; rebuilding with no quota records");
                Vec::new()
            }
        };

        let state = self.state.lock().await;
        let rows = state.departments.snapshot(&quotas);
        let unquoted = state.departments.unquoted_departments(&quotas);
        if !unquoted.is_empty() {
            debug!(departments = ?unquoted, "tracked departments without a quota record");
        }
        self.department_cache.publish(rows).await
    }

    async fn rebuild_nodes(&self) -> Arc<CacheSnapshot<NodeView>> {
        let state = self.state.lock().await;
        let rows = state.nodes.snapshot();
        self.node_cache.publish(rows).await
    }
}

/// Shared handle to the aggregation engine.
///
/// The invalidation workers stop once every clone is dropped.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
    department_signal: Signal,
    node_signal: Signal,
}

/// The two invalidation workers, ready to be spawned.
pub struct Pipelines {
    departments: InvalidationPipeline,
    nodes: InvalidationPipeline,
}

impl Pipelines {
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        [self.departments, self.nodes]
            .into_iter()
            .map(|pipeline| {
                debug!(kind = pipeline.kind(), "spawning invalidation worker");
                tokio::spawn(pipeline.run(shutdown.clone()))
            })
            .collect()
    }
}

impl Engine {
    pub fn new(feed: Arc<dyn WatchFeed>, config: EngineConfig) -> (Self, Pipelines) {
        let shared = Arc::new(Shared {
            feed,
            department_cache: ResponseCache::new("departments", config.cache_ttl),
            node_cache: ResponseCache::new("nodes", config.cache_ttl),
            state: Mutex::new(AggregatorState::default()),
            config,
        });

        let rebuild_departments: RebuildFn = {
            let shared = Arc::clone(&shared);
            Arc::new(move || {
                let shared = Arc::clone(&shared);
                Box::pin(async move {
                    shared.rebuild_departments().await;
                })
            })
        };
        let rebuild_nodes: RebuildFn = {
            let shared = Arc::clone(&shared);
            Arc::new(move || {
                let shared = Arc::clone(&shared);
                Box::pin(async move {
                    shared.rebuild_nodes().await;
                })
            })
        };

        let config = &shared.config;
        let (department_signal, departments) = InvalidationPipeline::new(
            "departments",
            config.quiet_period,
            config.department_refresh,
            rebuild_departments,
        );
        let (node_signal, nodes) = InvalidationPipeline::new(
            "nodes",
            config.quiet_period,
            config.node_refresh,
            rebuild_nodes,
        );

        let engine = Self {
            shared,
            department_signal,
            node_signal,
        };
        (engine, Pipelines { departments, nodes })
    }

    // ── Notifications ──────────────────────────────────────────────

    /// Apply one pod notification.
    ///
    /// The memory reading is fetched before the aggregator lock is taken.
    pub async fn handle_pod_event(&self, event: WatchEvent<PodObject>) {
        let config = &self.shared.config;
        let (pod, is_update) = match event {
            WatchEvent::Added(pod) => (pod, false),
            WatchEvent::Updated(pod) => (pod, true),
            WatchEvent::Deleted(pod) => {
                let mut state = self.shared.state.lock().await;
                state.departments.on_instance_removed(&pod.key());
                drop(state);
                self.department_signal.notify();
                return;
            }
        };

        let key = pod.key();
        let Some(arch) = config.classifier.classify(&pod.node_name) else {
            debug!(pod = %key, node = %pod.node_name, "unclassified node; instance not tracked");
            self.shared.state.lock().await.departments.on_instance_removed(&key);
            self.department_signal.notify();
            return;
        };

        let memory = self.pod_memory(&key).await;
        let department = pod.department(&config.department_label);

        let mut state = self.shared.state.lock().await;
        if is_update {
            state
                .departments
                .on_instance_updated(key, department, arch, memory);
        } else {
            state
                .departments
                .on_instance_added(key, department, arch, memory.unwrap_or_default());
        }
        drop(state);
        self.department_signal.notify();
    }

    /// Apply one node notification.
    pub async fn handle_node_event(&self, event: WatchEvent<NodeObject>) {
        match event {
            WatchEvent::Added(node) => {
                let record = self.node_record(&node).await;
                self.shared.state.lock().await.nodes.on_node_added(record);
            }
            WatchEvent::Updated(node) => {
                let record = self.node_record(&node).await;
                self.shared.state.lock().await.nodes.on_node_updated(record);
            }
            WatchEvent::Deleted(node) => {
                self.shared.state.lock().await.nodes.on_node_deleted(&node.name);
            }
        }
        self.node_signal.notify();
    }

    /// Full record for a node; the usage reading is fetched unlocked.
    async fn node_record(&self, node: &NodeObject) -> NodeRecord {
        let usage = match self.shared.feed.node_usage(&node.name).await {
            Ok(usage) => usage,
            Err(e) => {
                warn!(node = %node.name, error = %e, "node usage lookup failed; using zero");
                None
            }
        };
        let arch = self.shared.config.classifier.classify(&node.name);
        NodeRecord::from_object(node, arch, usage)
    }

    async fn pod_memory(&self, key: &InstanceKey) -> Option<Quantity> {
        match self.shared.feed.pod_memory(key).await {
            Ok(memory) => memory,
            Err(e) => {
                warn!(pod = %key, error = %e, "pod memory lookup failed; using zero");
                None
            }
        }
    }

    /// Spawn one consumer task per notification stream.
    pub fn spawn_consumers(
        &self,
        events: FeedEvents,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let FeedEvents { mut pods, mut nodes } = events;

        let engine = self.clone();
        let mut pod_shutdown = shutdown.clone();
        let pod_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = pods.recv() => match event {
                        Some(event) => engine.handle_pod_event(event).await,
                        None => break,
                    },
                    _ = pod_shutdown.changed() => break,
                }
            }
            debug!("pod consumer stopped");
        });

        let engine = self.clone();
        let mut node_shutdown = shutdown;
        let node_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = nodes.recv() => match event {
                        Some(event) => engine.handle_node_event(event).await,
                        None => break,
                    },
                    _ = node_shutdown.changed() => break,
                }
            }
            debug!("node consumer stopped");
        });

        vec![pod_task, node_task]
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Department view, served from cache when the options allow.
    pub async fn departments(&self, options: &ReadOptions) -> CachedRead<DepartmentView> {
        if let Some(snapshot) = self.shared.department_cache.servable(options).await {
            return CachedRead {
                snapshot,
                status: CacheStatus::Hit,
            };
        }
        CachedRead {
            snapshot: self.shared.rebuild_departments().await,
            status: CacheStatus::Miss,
        }
    }

    /// Node view, served from cache when the options allow.
    pub async fn nodes(&self, options: &ReadOptions) -> CachedRead<NodeView> {
        if let Some(snapshot) = self.shared.node_cache.servable(options).await {
            return CachedRead {
                snapshot,
                status: CacheStatus::Hit,
            };
        }
        CachedRead {
            snapshot: self.shared.rebuild_nodes().await,
            status: CacheStatus::Miss,
        }
    }

    /// Recompute and publish the department view now.
    pub async fn rebuild_departments(&self) -> Arc<CacheSnapshot<DepartmentView>> {
        self.shared.rebuild_departments().await
    }

    /// Recompute and publish the node view now.
    pub async fn rebuild_nodes(&self) -> Arc<CacheSnapshot<NodeView>> {
        self.shared.rebuild_nodes().await
    }

    // ── Admission and usage ────────────────────────────────────────

    /// Check a reservation against the department's quota. Read-only.
    pub async fn check_admission(&self, request: &AdmissionRequest) -> EngineResult<()> {
        let quota = self.shared.feed.get_quota(&request.department).await?;
        let tracked = self.department_aggregate(&request.department).await;
        admission::check(quota.as_ref(), &tracked, request)?;
        info!(department = %request.department, "reservation admitted");
        Ok(())
    }

    /// Tracked totals of one department.
    pub async fn department_aggregate(&self, department: &str) -> DepartmentAggregate {
        self.shared.state.lock().await.departments.aggregate(department)
    }

    /// Every tracked department, including those without a quota record,
    /// ordered by name.
    pub async fn department_usage(&self) -> Vec<(String, DepartmentAggregate)> {
        let state = self.shared.state.lock().await;
        let mut usage: Vec<(String, DepartmentAggregate)> = state
            .departments
            .aggregates()
            .map(|(name, agg)| (name.to_string(), *agg))
            .collect();
        usage.sort_by(|a, b| a.0.cmp(&b.0));
        usage
    }

    /// Number of instances and nodes currently tracked.
    pub async fn tracked_counts(&self) -> (usize, usize) {
        let state = self.shared.state.lock().await;
        (state.departments.tracked_instances(), state.nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use quotawatch_state::{ArchClass, NodeUsage, PoolMemory, QuotaRecord};

    use super::*;
    use crate::admission::AdmissionError;
    use crate::classifier::Classifier;
    use crate::error::EngineError;
    use crate::memory_feed::MemoryFeed;

    fn q(s: &str) -> Quantity {
        Quantity::parse(s).unwrap()
    }

    fn pod(namespace: &str, name: &str, node: &str, department: &str) -> PodObject {
        let mut labels = HashMap::new();
        if !department.is_empty() {
            labels.insert("department".to_string(), department.to_string());
        }
        PodObject {
            namespace: namespace.into(),
            name: name.into(),
            node_name: node.into(),
            labels,
        }
    }

    fn quota(department: &str, non_xc: &str, xc_arm: &str) -> QuotaRecord {
        QuotaRecord {
            department: department.into(),
            limits: PoolMemory {
                non_xc: q(non_xc),
                xc_arm: q(xc_arm),
                xc_x86: Quantity::zero(),
            },
            announced: PoolMemory::default(),
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            quiet_period: Duration::from_millis(20),
            ..EngineConfig::default()
        }
    }

    fn engine_with(config: EngineConfig) -> (Engine, Pipelines, Arc<MemoryFeed>, FeedEvents) {
        let (feed, events) = MemoryFeed::new();
        let (engine, pipelines) = Engine::new(feed.clone(), config);
        (engine, pipelines, feed, events)
    }

    #[tokio::test]
    async fn first_read_misses_then_hits_with_same_stamp() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        feed.put_quota(quota("risk", "1Gi", "0")).await;

        let first = engine.departments(&ReadOptions::default()).await;
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(first.snapshot.payload.len(), 1);

        let second = engine.departments(&ReadOptions::default()).await;
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(
            second.snapshot.generated_at_rfc3339(),
            first.snapshot.generated_at_rfc3339()
        );

        tokio::time::sleep(Duration::from_millis(2)).await;
        let forced = engine.departments(&ReadOptions::refresh()).await;
        assert_eq!(forced.status, CacheStatus::Miss);
        assert!(forced.snapshot.generated_at > first.snapshot.generated_at);
    }

    #[tokio::test]
    async fn instance_migration_moves_contribution() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        feed.put_quota(quota("alpha", "4Gi", "4Gi")).await;
        feed.put_quota(quota("beta", "4Gi", "4Gi")).await;
        feed.set_pod_memory(InstanceKey::new("ns", "web-0"), q("512Mi")).await;

        engine
            .handle_pod_event(WatchEvent::Added(pod("ns", "web-0", "b-01", "alpha")))
            .await;
        let alpha = engine.department_aggregate("alpha").await;
        assert_eq!(alpha.memory.non_xc, q("512Mi"));
        assert_eq!(alpha.instance_count, 1);

        engine
            .handle_pod_event(WatchEvent::Updated(pod("ns", "web-0", "kk-07", "beta")))
            .await;
        let alpha = engine.department_aggregate("alpha").await;
        let beta = engine.department_aggregate("beta").await;
        assert_eq!(alpha.memory.non_xc, q("0Mi"));
        assert_eq!(alpha.instance_count, 0);
        assert_eq!(beta.memory.xc_arm, q("512Mi"));
        assert_eq!(beta.instance_count, 1);

        let view = engine.departments(&ReadOptions::refresh()).await;
        let beta_row = view
            .snapshot
            .payload
            .iter()
            .find(|row| row.name == "beta")
            .unwrap();
        assert_eq!(beta_row.used_memory(ArchClass::XcArm), q("512Mi"));
        assert_eq!(beta_row.pods, 1);
    }

    #[tokio::test]
    async fn missing_memory_reading_counts_as_zero() {
        let (engine, _pipelines, _feed, _events) = engine_with(test_config());
        engine
            .handle_pod_event(WatchEvent::Added(pod("ns", "job-1", "kkh-01", "ops")))
            .await;
        let ops = engine.department_aggregate("ops").await;
        assert!(ops.memory.xc_x86.is_zero());
        assert_eq!(ops.instance_count, 1);
    }

    #[tokio::test]
    async fn update_without_reading_reverses_prior_memory() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        let key = InstanceKey::new("ns", "cache-0");
        feed.set_pod_memory(key.clone(), q("1Gi")).await;
        engine
            .handle_pod_event(WatchEvent::Added(pod("ns", "cache-0", "b-02", "ops")))
            .await;
        assert_eq!(engine.department_aggregate("ops").await.memory.non_xc, q("1Gi"));

        feed.clear_pod_memory(&key).await;
        engine
            .handle_pod_event(WatchEvent::Updated(pod("ns", "cache-0", "b-02", "ops")))
            .await;
        let ops = engine.department_aggregate("ops").await;
        assert!(ops.memory.non_xc.is_zero());
        assert_eq!(ops.instance_count, 1);
    }

    #[tokio::test]
    async fn removed_quota_drops_its_row_on_rebuild() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        feed.put_quota(quota("alpha", "1Gi", "0")).await;
        feed.put_quota(quota("beta", "1Gi", "0")).await;
        assert_eq!(engine.departments(&ReadOptions::default()).await.snapshot.payload.len(), 2);

        let removed = feed.remove_quota("beta").await;
        assert_eq!(removed.map(|r| r.department), Some("beta".to_string()));
        assert!(feed.remove_quota("beta").await.is_none());

        // The published snapshot is unchanged until the next rebuild.
        assert_eq!(engine.departments(&ReadOptions::default()).await.snapshot.payload.len(), 2);
        let rows = engine.rebuild_departments().await;
        let names: Vec<&str> = rows.payload.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_events_and_reads_keep_totals_consistent() {
        const WRITERS: usize = 8;
        const PODS_PER_WRITER: usize = 12;
        let departments = ["d0", "d1", "d2"];

        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        for department in departments {
            feed.put_quota(quota(department, "1Ti", "1Ti")).await;
        }
        for writer in 0..WRITERS {
            for j in 0..PODS_PER_WRITER {
                feed.set_pod_memory(
                    InstanceKey::new(format!("w{writer}"), format!("p{j}")),
                    q(&format!("{}Mi", j + 1)),
                )
                .await;
            }
        }

        let mut tasks = Vec::new();
        for writer in 0..WRITERS {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                let ns = format!("w{writer}");
                for j in 0..PODS_PER_WRITER {
                    let name = format!("p{j}");
                    let first = format!("d{}", j % 3);
                    let second = format!("d{}", (j + 1) % 3);
                    engine
                        .handle_pod_event(WatchEvent::Added(pod(&ns, &name, "b-01", &first)))
                        .await;
                    tokio::task::yield_now().await;
                    engine
                        .handle_pod_event(WatchEvent::Updated(pod(&ns, &name, "kk-01", &second)))
                        .await;
                    if j % 4 == 0 {
                        engine
                            .handle_pod_event(WatchEvent::Deleted(pod(&ns, &name, "kk-01", &second)))
                            .await;
                    }
                }
            }));
        }
        for _ in 0..2 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..20 {
                    let read = engine.departments(&ReadOptions::refresh()).await;
                    assert_eq!(read.status, CacheStatus::Miss);
                    let pods: u64 = read.snapshot.payload.iter().map(|row| row.pods).sum();
                    assert!(pods <= (WRITERS * PODS_PER_WRITER) as u64);
                    tokio::task::yield_now().await;
                }
            }));
        }
        {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                for i in 0..20 {
                    let node = NodeObject {
                        name: format!("kk-{:02}", i % 4),
                        allocatable_cpu: q("64"),
                        allocatable_memory: q("256Gi"),
                    };
                    engine.handle_node_event(WatchEvent::Added(node.clone())).await;
                    engine.handle_node_event(WatchEvent::Updated(node)).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut expected: HashMap<String, (Quantity, u64)> = HashMap::new();
        for _ in 0..WRITERS {
            for j in (0..PODS_PER_WRITER).filter(|j| j % 4 != 0) {
                let entry = expected
                    .entry(format!("d{}", (j + 1) % 3))
                    .or_insert((Quantity::zero(), 0));
                entry.0 += q(&format!("{}Mi", j + 1));
                entry.1 += 1;
            }
        }

        let view = engine.departments(&ReadOptions::refresh()).await;
        for department in departments {
            let (memory, count) = expected
                .get(department)
                .copied()
                .unwrap_or((Quantity::zero(), 0));
            let aggregate = engine.department_aggregate(department).await;
            assert_eq!(aggregate.memory.xc_arm, memory, "{department}");
            assert!(aggregate.memory.non_xc.is_zero(), "{department}");
            assert!(aggregate.memory.xc_x86.is_zero(), "{department}");
            assert_eq!(aggregate.instance_count, count, "{department}");

            let row = view
                .snapshot
                .payload
                .iter()
                .find(|row| row.name == department)
                .unwrap();
            assert_eq!(row.used_memory(ArchClass::XcArm), memory);
            assert_eq!(row.pods, count);
        }
        assert_eq!(
            engine.tracked_counts().await,
            (WRITERS * PODS_PER_WRITER * 3 / 4, 4)
        );
    }

    #[tokio::test]
    async fn dropped_nodes_exclude_instances() {
        let config = EngineConfig {
            classifier: Classifier::new(Classifier::default_rules(), None),
            ..test_config()
        };
        let (engine, _pipelines, feed, _events) = engine_with(config);
        feed.set_pod_memory(InstanceKey::new("ns", "gpu-job"), q("1Gi")).await;

        engine
            .handle_pod_event(WatchEvent::Added(pod("ns", "gpu-job", "b-01", "ml")))
            .await;
        assert_eq!(engine.department_aggregate("ml").await.instance_count, 1);

        // Rescheduled onto a node matching no rule.
        engine
            .handle_pod_event(WatchEvent::Updated(pod("ns", "gpu-job", "gpu-01", "ml")))
            .await;
        let ml = engine.department_aggregate("ml").await;
        assert_eq!(ml.instance_count, 0);
        assert!(ml.memory.non_xc.is_zero());

        engine
            .handle_node_event(WatchEvent::Added(NodeObject {
                name: "gpu-01".into(),
                allocatable_cpu: q("8"),
                allocatable_memory: q("64Gi"),
            }))
            .await;
        assert!(engine.nodes(&ReadOptions::refresh()).await.snapshot.payload.is_empty());
    }

    #[tokio::test]
    async fn node_events_replace_and_delete() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        feed.set_node_usage(
            "kk-01",
            NodeUsage {
                cpu: q("2"),
                memory: q("10Gi"),
            },
        )
        .await;
        let node = NodeObject {
            name: "kk-01".into(),
            allocatable_cpu: q("64"),
            allocatable_memory: q("256Gi"),
        };

        engine.handle_node_event(WatchEvent::Added(node.clone())).await;
        let rows = engine.nodes(&ReadOptions::default()).await.snapshot.payload.clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].arch, ArchClass::XcArm);
        assert_eq!(rows[0].used.memory, q("10Gi"));

        // An update is a full replace with a fresh usage reading.
        feed.set_node_usage(
            "kk-01",
            NodeUsage {
                cpu: q("3"),
                memory: q("12Gi"),
            },
        )
        .await;
        let resized = NodeObject {
            allocatable_memory: q("512Gi"),
            ..node.clone()
        };
        engine.handle_node_event(WatchEvent::Updated(resized)).await;
        let rows = engine.nodes(&ReadOptions::refresh()).await.snapshot.payload.clone();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].allocatable.memory, q("512Gi"));
        assert_eq!(rows[0].used.cpu, q("3"));
        assert_eq!(rows[0].used.memory, q("12Gi"));

        engine.handle_node_event(WatchEvent::Deleted(node)).await;
        assert_eq!(engine.tracked_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn quota_listing_failure_degrades_to_empty_view() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        feed.put_quota(quota("risk", "1Gi", "0")).await;
        feed.set_unavailable(true);

        let read = engine.departments(&ReadOptions::default()).await;
        assert_eq!(read.status, CacheStatus::Miss);
        assert!(read.snapshot.payload.is_empty());
    }

    #[tokio::test]
    async fn admission_uses_tracked_usage() {
        let (engine, _pipelines, feed, _events) = engine_with(test_config());
        feed.put_quota(quota("risk", "1Gi", "0")).await;
        feed.set_pod_memory(InstanceKey::new("risk", "db-0"), q("512Mi")).await;
        engine
            .handle_pod_event(WatchEvent::Added(pod("risk", "db-0", "b-03", "risk")))
            .await;

        let at_limit = AdmissionRequest::parse("risk", "512Mi", "", "").unwrap();
        assert!(matches!(
            engine.check_admission(&at_limit).await,
            Err(EngineError::Admission(AdmissionError::Exceeded { .. }))
        ));

        let below = AdmissionRequest::parse("risk", "511Mi", "", "").unwrap();
        assert!(engine.check_admission(&below).await.is_ok());

        let unknown = AdmissionRequest::parse("nobody", "1Mi", "", "").unwrap();
        assert!(matches!(
            engine.check_admission(&unknown).await,
            Err(EngineError::Admission(AdmissionError::QuotaNotFound(_)))
        ));

        feed.set_unavailable(true);
        assert!(matches!(
            engine.check_admission(&below).await,
            Err(EngineError::Feed(_))
        ));
        // The check never mutates tracked usage.
        assert_eq!(engine.department_aggregate("risk").await.memory.non_xc, q("512Mi"));
    }

    #[tokio::test]
    async fn usage_includes_departments_without_quota() {
        let (engine, _pipelines, _feed, _events) = engine_with(test_config());
        engine
            .handle_pod_event(WatchEvent::Added(pod("a", "x", "b-01", "zeta")))
            .await;
        engine
            .handle_pod_event(WatchEvent::Added(pod("a", "y", "b-01", "alpha")))
            .await;

        let names: Vec<String> = engine.department_usage().await.into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert!(engine.departments(&ReadOptions::default()).await.snapshot.payload.is_empty());
    }

    #[tokio::test]
    async fn consumers_and_pipelines_publish_in_background() {
        let (engine, pipelines, feed, events) = engine_with(test_config());
        feed.put_quota(quota("risk", "8Gi", "0")).await;
        feed.set_pod_memory(InstanceKey::new("risk", "api-0"), q("1Gi")).await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = engine.spawn_consumers(events, shutdown_rx.clone());
        handles.extend(pipelines.spawn(shutdown_rx));

        feed.emit_pod(WatchEvent::Added(pod("risk", "api-0", "b-01", "risk")))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        // The debounce worker published; the read is served from cache.
        let read = engine.departments(&ReadOptions::default()).await;
        assert_eq!(read.status, CacheStatus::Hit);
        assert_eq!(read.snapshot.payload[0].used_memory(ArchClass::NonXc), q("1Gi"));

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
