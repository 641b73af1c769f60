//! Capability kinds and the event names that drive them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stateful start/stop capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    CpuProfiling,
    HeapSampling,
    Coverage,
}

impl SessionKind {
    pub const ALL: [SessionKind; 3] = [
        SessionKind::CpuProfiling,
        SessionKind::HeapSampling,
        SessionKind::Coverage,
    ];

    /// Stable name, used as the event prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionKind::CpuProfiling => "cpu_profiling",
            SessionKind::HeapSampling => "heap_sampling",
            SessionKind::Coverage => "coverage",
        }
    }

    /// Event that starts a session of this kind.
    pub fn start_event(self) -> String {
        format!("{}_start", self.as_str())
    }

    /// Event that stops a session of this kind.
    pub fn stop_event(self) -> String {
        format!("{}_stop", self.as_str())
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-shot capture capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureKind {
    HeapSnapshot,
    DiagnosisReport,
    MemoryCpuUsage,
    Dependencies,
}

impl CaptureKind {
    pub const ALL: [CaptureKind; 4] = [
        CaptureKind::HeapSnapshot,
        CaptureKind::DiagnosisReport,
        CaptureKind::MemoryCpuUsage,
        CaptureKind::Dependencies,
    ];

    /// Event name, identical to the stable name.
    pub fn as_str(self) -> &'static str {
        match self {
            CaptureKind::HeapSnapshot => "heap_snapshot",
            CaptureKind::DiagnosisReport => "diagnosis_report",
            CaptureKind::MemoryCpuUsage => "memory_cpu_usage",
            CaptureKind::Dependencies => "dependencies",
        }
    }
}

impl fmt::Display for CaptureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
