//! Node load sampling for status reports.

use std::path::Path;

use sysinfo::{Disks, System};

use crate::types::{NodeStatus, ResourceUsage};

/// Samples CPU, memory, swap and root-disk usage.
///
/// Keeps its `System` across samples so CPU usage is measured against the
/// previous refresh instead of reading zero every time.
pub struct StatusSampler {
    sys: System,
}

impl StatusSampler {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }

    pub fn sample(&mut self) -> NodeStatus {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| disks.list().first())
            .map(|d| ResourceUsage {
                total: d.total_space(),
                used: d.total_space().saturating_sub(d.available_space()),
            })
            .unwrap_or_default();

        NodeStatus {
            cpu: f64::from(self.sys.global_cpu_info().cpu_usage()),
            mem: ResourceUsage {
                total: self.sys.total_memory(),
                used: self.sys.used_memory(),
            },
            swap: ResourceUsage {
                total: self.sys.total_swap(),
                used: self.sys.used_swap(),
            },
            disk,
        }
    }
}

impl Default for StatusSampler {
    fn default() -> Self {
        Self::new()
    }
}
