use crate::{Collector, Reading};
use anyhow::{bail, Result};
use sysinfo::{CpuRefreshKind, RefreshKind, System};

/// Per logical CPU utilisation, reported as `CpuUtilization1..=N`.
pub struct CpuCollector {
    system: System,
}

impl CpuCollector {
    pub fn new() -> Self {
        let mut system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage()),
        );
        // usage is a delta between two refreshes
        system.refresh_cpu_usage();
        Self { system }
    }
}

impl Default for CpuCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for CpuCollector {
    fn name(&self) -> &str {
        "cpu"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_cpu_usage();

        let cpus = self.system.cpus();
        if cpus.is_empty() {
            bail!("no logical CPUs reported");
        }

        Ok(cpus
            .iter()
            .enumerate()
            .map(|(i, cpu)| Reading::gauge(format!("CpuUtilization{}", i + 1), cpu.cpu_usage() as f64))
            .collect())
    }
}
