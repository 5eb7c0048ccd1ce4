//! Render execution and pyramid scheduling.

pub mod executor;
pub mod metrics;
pub mod scheduler;

#[cfg(test)]
mod scheduler_integration_tests;

pub use executor::{JobSource, RenderExecutor, RenderJob, RenderStats, TraversalOrder};
pub use metrics::{Metrics, MetricsReporter, MetricsSnapshot};
pub use scheduler::{PyramidScheduler, RunStats, SchedulerConfig};
