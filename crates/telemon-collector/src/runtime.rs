use crate::{Collector, Reading, POLL_COUNT, RANDOM_VALUE};
use anyhow::{anyhow, Result};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Statistics of the agent process itself.
///
/// Besides the process gauges every poll bumps [`POLL_COUNT`] by one and
/// refreshes [`RANDOM_VALUE`].
pub struct RuntimeCollector {
    system: System,
    pid: Pid,
}

impl RuntimeCollector {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("cannot resolve own pid: {e}"))?;
        Ok(Self {
            system: System::new(),
            pid,
        })
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not visible", self.pid))?;
        let disk = process.disk_usage();

        Ok(vec![
            Reading::gauge("Alloc", process.memory() as f64),
            Reading::gauge("Sys", process.virtual_memory() as f64),
            Reading::gauge("CpuUsage", process.cpu_usage() as f64),
            Reading::gauge("DiskReadBytes", disk.total_read_bytes as f64),
            Reading::gauge("DiskWrittenBytes", disk.total_written_bytes as f64),
            Reading::gauge("RunTime", process.run_time() as f64),
            Reading::gauge(RANDOM_VALUE, rand::random::<f64>()),
            Reading::Increment(POLL_COUNT.to_string(), 1),
        ])
    }
}
