//! Host metrics capability provider.

use async_trait::async_trait;
use healthlink_client::{CapabilityError, CapabilityProvider, CaptureKind, SessionKind};
use parking_lot::Mutex;
use serde_json::{Value, json};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Answers host and process captures from `sysinfo`.
///
/// Profiling sessions, heap snapshots and dependency listings need an
/// in-process runtime hook and are reported as unsupported.
pub struct HostProvider {
    system: Mutex<System>,
}

impl HostProvider {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn current_pid() -> Result<Pid, CapabilityError> {
        sysinfo::get_current_pid().map_err(|e| CapabilityError::Failed(e.to_string()))
    }

    fn memory_cpu_usage(&self) -> Result<Value, CapabilityError> {
        let pid = Self::current_pid()?;
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu_all();
        let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);

        let cpus: Vec<Value> = system
            .cpus()
            .iter()
            .map(|cpu| {
                json!({
                    "model": cpu.brand(),
                    "speed": cpu.frequency(),
                    "usage": cpu.cpu_usage(),
                })
            })
            .collect();
        let load = System::load_average();
        let process = system.process(pid);

        Ok(json!({
            "totalmem": system.total_memory(),
            "freemem": system.free_memory(),
            "cpus": cpus,
            "loadavg": [load.one, load.five, load.fifteen],
            "uptime": System::uptime(),
            "memoryUsage": {
                "rss": process.map_or(0, sysinfo::Process::memory),
                "virtual": process.map_or(0, sysinfo::Process::virtual_memory),
            },
        }))
    }

    fn diagnosis_report(&self) -> Result<Value, CapabilityError> {
        let pid = Self::current_pid()?;
        let mut system = self.system.lock();
        let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
        let process = system
            .process(pid)
            .ok_or_else(|| CapabilityError::Failed(format!("process {pid} not found")))?;

        Ok(json!({
            "header": {
                "hostname": System::host_name(),
                "osName": System::name(),
                "osVersion": System::os_version(),
                "kernelVersion": System::kernel_version(),
                "arch": std::env::consts::ARCH,
                "pid": pid.as_u32(),
                "agentVersion": env!("CARGO_PKG_VERSION"),
            },
            "process": {
                "name": process.name().to_string_lossy(),
                "startTime": process.start_time(),
                "runTime": process.run_time(),
                "rss": process.memory(),
                "virtual": process.virtual_memory(),
            },
        }))
    }
}

impl Default for HostProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityProvider for HostProvider {
    async fn start(&self, _kind: SessionKind) -> Result<(), CapabilityError> {
        Err(CapabilityError::Unsupported)
    }

    async fn stop(&self, _kind: SessionKind) -> Result<Value, CapabilityError> {
        Err(CapabilityError::Unsupported)
    }

    async fn capture(&self, kind: CaptureKind) -> Result<Value, CapabilityError> {
        match kind {
            CaptureKind::MemoryCpuUsage => self.memory_cpu_usage(),
            CaptureKind::DiagnosisReport => self.diagnosis_report(),
            CaptureKind::HeapSnapshot | CaptureKind::Dependencies => {
                Err(CapabilityError::Unsupported)
            }
        }
    }
}
