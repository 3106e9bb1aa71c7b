//! quotawatch-state: data model for quotawatch.
//!
//! Holds the value types shared by the aggregation engine, the metrics
//! exporter, and the HTTP layer: Kubernetes-style resource quantities,
//! architecture classes, the object shapes delivered by the watch feed,
//! department quota records, and the JSON views served to clients.
//!
//! # Architecture
//!
//! All wire types serialize with camelCase field names. [`Quantity`]
//! serializes as its canonical text form (`"512Mi"`, `"250m"`), so views can
//! be emitted directly as response bodies.

pub mod error;
pub mod quantity;
pub mod types;

pub use error::{QuantityError, QuantityResult};
pub use quantity::Quantity;
pub use types::*;
