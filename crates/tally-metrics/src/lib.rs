//! Metric plumbing for tally.
//!
//! The reconciler never talks to Prometheus directly. It declares gauge
//! families, sets series, and retracts them by partial label match through
//! the [`MetricRegistry`] trait. [`InMemoryMetricRegistry`] implements it
//! for tests.
//!
//! - [`PrometheusRegistry`]: production backend, exposed in text format
//! - [`LabelSchema`]: which report fields can become labels, by scope and group
//! - [`ExporterMetrics`]: the exporter's own counters and gauges

pub mod error;
pub mod memory;
pub mod prom;
pub mod registry;
pub mod schema;
pub mod telemetry;

pub use error::{MetricsError, MetricsResult};
pub use memory::InMemoryMetricRegistry;
pub use prom::PrometheusRegistry;
pub use registry::{labels, FamilySpec, LabelValues, MetricRegistry};
pub use schema::{FieldScope, LabelDescriptor, LabelSchema, ALL_GROUP};
pub use telemetry::{ExporterMetrics, Outcome};
