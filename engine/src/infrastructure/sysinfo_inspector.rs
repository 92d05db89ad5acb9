//! Process table access backed by sysinfo

use crate::domain::ports::ProcessInspector;
use crate::domain::value_objects::{ProcessSample, SystemUsage};
use parking_lot::Mutex;
use sysinfo::{Disks, Pid, Process, ProcessesToUpdate, System};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Keeps one `System` around so CPU usage has a previous reading to diff against
pub struct SysinfoInspector {
    system: Mutex<System>,
}

impl SysinfoInspector {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoInspector {
    fn default() -> Self {
        Self::new()
    }
}

fn to_sample(pid: Pid, process: &Process) -> ProcessSample {
    ProcessSample {
        pid: pid.as_u32(),
        name: process.name().to_string_lossy().into_owned(),
        cpu_percent: f64::from(process.cpu_usage()),
        memory_mb: process.memory() as f64 / BYTES_PER_MB,
    }
}

fn memory_percent_of(system: &System) -> f64 {
    let total = system.total_memory();
    if total == 0 {
        return 0.0;
    }
    system.used_memory() as f64 / total as f64 * 100.0
}

impl ProcessInspector for SysinfoInspector {
    fn sample(&self, pid: u32) -> Option<ProcessSample> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|process| to_sample(pid, process))
    }

    fn find_by_name(&self, pattern: &str) -> Option<ProcessSample> {
        let mut system = self.system.lock();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .find(|(_, process)| process.name().to_string_lossy().contains(pattern))
            .map(|(pid, process)| to_sample(*pid, process))
    }

    fn memory_percent(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        memory_percent_of(&system)
    }

    fn system_usage(&self) -> SystemUsage {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu_usage();
            system.refresh_memory();
            (f64::from(system.global_cpu_usage()), memory_percent_of(&system))
        };

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .iter()
            .find(|disk| disk.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.iter().next());
        let disk_usage = root
            .filter(|disk| disk.total_space() > 0)
            .map(|disk| {
                let used = disk.total_space().saturating_sub(disk.available_space());
                used as f64 / disk.total_space() as f64 * 100.0
            })
            .unwrap_or(0.0);

        SystemUsage {
            cpu_percent,
            memory_percent,
            disk_usage,
        }
    }
}
