//! Hypervisor management API: the collaborator interface, its Proxmox
//! implementation, and the adapter that turns raw responses into the
//! gateway's own VM shapes.

pub mod client;
pub mod locator;
pub mod service;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::vm::PowerAction;
use types::{Consolidation, NodeListItem, RrdSample, RrdTimeframe, VmConfig, VmCurrentStatus, VmListItem};

#[derive(Debug, Clone, Error)]
pub enum HypervisorError {
    #[error("hypervisor request failed: {0}")]
    Transport(String),

    #[error("hypervisor returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected hypervisor response: {0}")]
    Decode(String),
}

/// The fixed query/command surface the gateway needs from the hypervisor.
/// Every call is a single attempt; implementations must not retry.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<NodeListItem>, HypervisorError>;

    async fn vm_status(&self, node: &str, vmid: &str) -> Result<VmCurrentStatus, HypervisorError>;

    async fn vm_config(&self, node: &str, vmid: &str) -> Result<VmConfig, HypervisorError>;

    async fn vm_rrd(
        &self,
        node: &str,
        vmid: &str,
        timeframe: RrdTimeframe,
        cf: Consolidation,
    ) -> Result<Vec<RrdSample>, HypervisorError>;

    /// Issue a power action; returns the task id (UPID) if the hypervisor gave one.
    async fn vm_power(&self, node: &str, vmid: &str, action: PowerAction) -> Result<String, HypervisorError>;

    async fn list_vms(&self, node: &str) -> Result<Vec<VmListItem>, HypervisorError>;
}
