//! # Utility Modules
//!
//! Supporting utilities for logging and observability.
//!
//! ## Components
//! - **Logging**: `tracing-subscriber` setup driven by `LoggingConfig`
//! - **Metrics**: per-server atomic counters and a callback timer

pub mod logging;
pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
