//! Metric sources for the telemon agent.
//!
//! Each [`Collector`] samples one category of host or process statistics
//! (runtime, virtual memory, per-CPU utilisation) and returns them as
//! [`Reading`]s. The agent schedules every collector on its own task and
//! applies the readings to its local metric store.

pub mod cpu;
pub mod memory;
pub mod runtime;

use anyhow::Result;

/// Counter incremented once per runtime poll.
pub const POLL_COUNT: &str = "PollCount";

/// Gauge refreshed with a uniform `[0, 1)` sample on every runtime poll.
pub const RANDOM_VALUE: &str = "RandomValue";

/// A single sampled value.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Replace the gauge with this value.
    Gauge(String, f64),
    /// Add this amount to the counter's running total.
    Increment(String, i64),
}

impl Reading {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Reading::Gauge(name.into(), value)
    }

    pub fn name(&self) -> &str {
        match self {
            Reading::Gauge(name, _) | Reading::Increment(name, _) => name,
        }
    }
}

/// A metric source polled by the agent.
///
/// The trait requires `Send` so a collector can be moved onto its own task.
pub trait Collector: Send {
    /// Returns the collector name (e.g., `"runtime"`, `"cpu"`), used for logging.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system statistics are unavailable.
    fn collect(&mut self) -> Result<Vec<Reading>>;
}
