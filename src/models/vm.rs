use serde::{Deserialize, Serialize};

use crate::hypervisor::types::RrdSample;

/// Power-control commands a user may issue against an allow-listed VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerAction {
    Start,
    Stop,
    Shutdown,
    Reset,
}

impl PowerAction {
    /// Path segment of `POST .../status/{action}`.
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop => "stop",
            PowerAction::Shutdown => "shutdown",
            PowerAction::Reset => "reset",
        }
    }

    pub fn success_message(&self) -> &'static str {
        match self {
            PowerAction::Start => "Start initiated successfully",
            PowerAction::Stop => "Stop initiated successfully",
            PowerAction::Shutdown => "Shutdown initiated successfully",
            PowerAction::Reset => "Reset initiated successfully",
        }
    }

    pub fn failure_message(&self) -> String {
        format!("Failed to {} VM. Please try again.", self.as_str())
    }
}

impl std::fmt::Display for PowerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    #[serde(rename = "used")]
    pub used_bytes: u64,
    #[serde(rename = "total")]
    pub total_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    #[serde(rename = "used")]
    pub used_bytes: u64,
    #[serde(rename = "total")]
    pub total_bytes: u64,
}

/// Normalized VM status as served by `GET /vms/{vmid}/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmStatus {
    pub status: String,
    #[serde(rename = "cpu")]
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
    pub disk: DiskUsage,
    #[serde(rename = "uptime")]
    pub uptime_seconds: u64,
}

/// Richer status: config-derived disk size plus the last hour of samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedVmStatus {
    #[serde(flatten)]
    pub base: VmStatus,
    pub name: String,
    pub netin: f64,
    pub netout: f64,
    pub historical: Vec<RrdSample>,
}

/// One VM from a node's inventory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VmSummary {
    pub vmid: String,
    pub name: String,
    pub status: String,
    /// Raw CPU fraction as reported by the hypervisor.
    pub cpu: f64,
    pub memory: MemoryUsage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub message: String,
}
