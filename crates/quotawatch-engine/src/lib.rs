//! quotawatch-engine: the incremental resource-aggregation and caching core.
//!
//! Keeps per-department memory usage and per-node capacity/usage current
//! under a stream of watch-feed notifications, and serves coherent
//! snapshots of both with bounded staleness.
//!
//! # Architecture
//!
//! ```text
//! WatchFeed ── FeedEvents (mpsc) ──► Engine consumers
//!                                      │  fetch reading (no lock)
//!                                      ▼
//!                      Mutex<AggregatorState>
//!                        ├── DepartmentAggregator (instance records)
//!                        └── NodeAggregator
//!                                      │  Signal (capacity 1)
//!                                      ▼
//!                      InvalidationPipeline (debounce + periodic refresh)
//!                                      │  snapshot + publish
//!                                      ▼
//!                      ResponseCache<DepartmentView | NodeView>
//!                                      │
//!                                      ▼
//!                      departments() / nodes()  (HIT / MISS)
//! ```
//!
//! The admission check reads quota records through the feed and tracked
//! usage under the aggregator lock; it never mutates either.

pub mod admission;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod department;
pub mod engine;
pub mod error;
pub mod feed;
pub mod memory_feed;
pub mod node;
pub mod pipeline;

pub use admission::{AdmissionError, AdmissionRequest};
pub use cache::{CacheSnapshot, CacheStatus, CachedRead, ReadOptions, ResponseCache};
pub use classifier::{ArchRule, Classifier};
pub use config::{EngineConfig, parse_duration};
pub use department::DepartmentAggregator;
pub use engine::{Engine, Pipelines};
pub use error::{ConfigError, EngineError, EngineResult, FeedError};
pub use feed::{FeedEvents, WatchEvent, WatchFeed};
pub use memory_feed::{FeedSeed, MemoryFeed, PodMemorySample};
pub use node::{NodeAggregator, NodeRecord};
pub use pipeline::{InvalidationPipeline, Signal};
