use crate::{Collector, Reading};
use anyhow::{bail, Result};
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

pub struct MemoryCollector {
    system: System,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self {
            system: System::new_with_specifics(
                RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
            ),
        }
    }
}

impl Default for MemoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for MemoryCollector {
    fn name(&self) -> &str {
        "memory"
    }

    fn collect(&mut self) -> Result<Vec<Reading>> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            bail!("virtual memory statistics unavailable");
        }

        Ok(vec![
            Reading::gauge("TotalMemory", total as f64),
            Reading::gauge("FreeMemory", self.system.free_memory() as f64),
        ])
    }
}
