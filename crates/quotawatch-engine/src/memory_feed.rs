//! In-process watch feed.
//!
//! Holds quota records and usage readings behind locks and pushes change
//! notifications into its [`FeedEvents`]. The daemon seeds it from a JSON
//! file in standalone mode; tests drive it directly.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};

use quotawatch_state::{InstanceKey, NodeObject, NodeUsage, PodObject, Quantity, QuotaRecord};

use crate::error::FeedError;
use crate::feed::{EVENT_CHANNEL_CAPACITY, FeedEvents, WatchEvent, WatchFeed};

/// Memory reading of one pod in a seed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodMemorySample {
    pub namespace: String,
    pub name: String,
    pub memory: Quantity,
}

/// Initial cluster contents.
///
/// ```json
/// {
///   "quotas": [{"department": "risk", "limits": {"nonXc": "64Gi"}}],
///   "nodes": [{"name": "b-01", "allocatableCpu": "32", "allocatableMemory": "128Gi"}],
///   "pods": [{"namespace": "risk", "name": "api-0", "nodeName": "b-01",
///             "labels": {"department": "risk"}}],
///   "podMemory": [{"namespace": "risk", "name": "api-0", "memory": "2Gi"}],
///   "nodeUsage": {"b-01": {"cpu": "4", "memory": "40Gi"}}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSeed {
    pub quotas: Vec<QuotaRecord>,
    pub nodes: Vec<NodeObject>,
    pub pods: Vec<PodObject>,
    pub pod_memory: Vec<PodMemorySample>,
    pub node_usage: BTreeMap<String, NodeUsage>,
}

impl FeedSeed {
    pub fn from_json(text: &str) -> Result<Self, FeedError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, FeedError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

/// A [`WatchFeed`] backed by in-process state.
pub struct MemoryFeed {
    quotas: RwLock<BTreeMap<String, QuotaRecord>>,
    pod_memory: RwLock<HashMap<InstanceKey, Quantity>>,
    node_usage: RwLock<HashMap<String, NodeUsage>>,
    pods_tx: mpsc::Sender<WatchEvent<PodObject>>,
    nodes_tx: mpsc::Sender<WatchEvent<NodeObject>>,
    unavailable: AtomicBool,
}

impl MemoryFeed {
    /// Create an empty feed and the receiving ends of its notifications.
    pub fn new() -> (Arc<Self>, FeedEvents) {
        let (pods_tx, pods) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (nodes_tx, nodes) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let feed = Arc::new(Self {
            quotas: RwLock::new(BTreeMap::new()),
            pod_memory: RwLock::new(HashMap::new()),
            node_usage: RwLock::new(HashMap::new()),
            pods_tx,
            nodes_tx,
            unavailable: AtomicBool::new(false),
        });
        (feed, FeedEvents { pods, nodes })
    }

    pub async fn put_quota(&self, quota: QuotaRecord) {
        self.quotas
            .write()
            .await
            .insert(quota.department.clone(), quota);
    }

    pub async fn remove_quota(&self, department: &str) -> Option<QuotaRecord> {
        self.quotas.write().await.remove(department)
    }

    pub async fn set_pod_memory(&self, key: InstanceKey, memory: Quantity) {
        self.pod_memory.write().await.insert(key, memory);
    }

    pub async fn clear_pod_memory(&self, key: &InstanceKey) {
        self.pod_memory.write().await.remove(key);
    }

    pub async fn set_node_usage(&self, node: impl Into<String>, usage: NodeUsage) {
        self.node_usage.write().await.insert(node.into(), usage);
    }

    /// Make quota listing fail, as when the backing store is unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn emit_pod(&self, event: WatchEvent<PodObject>) -> Result<(), FeedError> {
        debug!(pod = %event.object().key(), verb = event.verb(), "pod event");
        self.pods_tx
            .send(event)
            .await
            .map_err(|_| FeedError::Unavailable("pod event stream closed".into()))
    }

    pub async fn emit_node(&self, event: WatchEvent<NodeObject>) -> Result<(), FeedError> {
        debug!(node = %event.object().name, verb = event.verb(), "node event");
        self.nodes_tx
            .send(event)
            .await
            .map_err(|_| FeedError::Unavailable("node event stream closed".into()))
    }

    /// Install the seed's quota records and usage readings.
    pub async fn load_seed(&self, seed: &FeedSeed) {
        for quota in &seed.quotas {
            self.put_quota(quota.clone()).await;
        }
        for sample in &seed.pod_memory {
            self.set_pod_memory(InstanceKey::new(&sample.namespace, &sample.name), sample.memory)
                .await;
        }
        for (node, usage) in &seed.node_usage {
            self.set_node_usage(node.clone(), *usage).await;
        }
    }

    /// Load the seed, then announce its nodes and pods as additions.
    ///
    /// Readings are installed first so that the handlers find them.
    pub async fn replay_seed(&self, seed: &FeedSeed) -> Result<(), FeedError> {
        self.load_seed(seed).await;
        for node in &seed.nodes {
            self.emit_node(WatchEvent::Added(node.clone())).await?;
        }
        for pod in &seed.pods {
            self.emit_pod(WatchEvent::Added(pod.clone())).await?;
        }
        info!(
            quotas = seed.quotas.len(),
            nodes = seed.nodes.len(),
            pods = seed.pods.len(),
            "feed seed replayed"
        );
        Ok(())
    }

    fn check_available(&self) -> Result<(), FeedError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(FeedError::Unavailable("memory feed marked unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WatchFeed for MemoryFeed {
    async fn list_quotas(&self) -> Result<Vec<QuotaRecord>, FeedError> {
        self.check_available()?;
        Ok(self.quotas.read().await.values().cloned().collect())
    }

    async fn get_quota(&self, department: &str) -> Result<Option<QuotaRecord>, FeedError> {
        self.check_available()?;
        Ok(self.quotas.read().await.get(department).cloned())
    }

    async fn pod_memory(&self, key: &InstanceKey) -> Result<Option<Quantity>, FeedError> {
        Ok(self.pod_memory.read().await.get(key).copied())
    }

    async fn node_usage(&self, node: &str) -> Result<Option<NodeUsage>, FeedError> {
        Ok(self.node_usage.read().await.get(node).copied())
    }
}
