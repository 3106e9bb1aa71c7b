//! quotawatch-metrics: Prometheus exposition for quotawatch.
//!
//! Renders the department and node views, plus raw per-department usage,
//! into the Prometheus text format for the `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! Engine
//!   ├── departments() → DepartmentView rows (limits, announced)
//!   ├── department_usage() → every tracked department (used, pods)
//!   └── nodes() → NodeView rows
//!            │
//!            ▼
//!   render_prometheus() → text/plain
//! ```

pub mod prometheus;

pub use prometheus::{MetricsInput, render_prometheus};
