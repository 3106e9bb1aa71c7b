//! The watch-feed boundary.
//!
//! A feed delivers add/update/delete notifications for pods and nodes in
//! per-kind order, and answers point lookups for quota records and usage
//! readings. Notifications are pushed through bounded channels; lookups
//! go through the [`WatchFeed`] trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use quotawatch_state::{InstanceKey, NodeObject, NodeUsage, PodObject, Quantity, QuotaRecord};

use crate::error::FeedError;

/// Capacity of each notification channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// One change notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    Added(T),
    Updated(T),
    Deleted(T),
}

impl<T> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Updated(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "added",
            WatchEvent::Updated(_) => "updated",
            WatchEvent::Deleted(_) => "deleted",
        }
    }
}

/// Receiving ends of a feed's notification streams.
pub struct FeedEvents {
    pub pods: mpsc::Receiver<WatchEvent<PodObject>>,
    pub nodes: mpsc::Receiver<WatchEvent<NodeObject>>,
}

/// Lookups the engine issues against the cluster.
#[async_trait]
pub trait WatchFeed: Send + Sync {
    /// Every department quota record.
    async fn list_quotas(&self) -> Result<Vec<QuotaRecord>, FeedError>;

    /// The quota record of one department, if any.
    async fn get_quota(&self, department: &str) -> Result<Option<QuotaRecord>, FeedError> {
        Ok(self
            .list_quotas()
            .await?
            .into_iter()
            .find(|quota| quota.department == department))
    }

    /// Current memory usage of one pod; `Ok(None)` when no reading exists.
    async fn pod_memory(&self, key: &InstanceKey) -> Result<Option<Quantity>, FeedError>;

    /// Current usage of one node; `Ok(None)` when no reading exists.
    async fn node_usage(&self, node: &str) -> Result<Option<NodeUsage>, FeedError>;
}
