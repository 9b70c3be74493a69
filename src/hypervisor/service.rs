//! VM operations on top of the raw hypervisor API.
//!
//! Node resolution:
//! - `get_status` always probes every node in order; the first node that
//!   answers for the VM wins and per-node failures are skipped.
//! - Everything else resolves the node with the configured strategy: the
//!   same scan (with the location cached), or the first enumerated node.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::locator::NodeLocator;
use super::types::{Consolidation, RrdSample, RrdTimeframe, VmConfig, VmCurrentStatus};
use super::{Hypervisor, HypervisorError};
use crate::config::NodeResolution;
use crate::models::vm::{DetailedVmStatus, DiskUsage, MemoryUsage, PowerAction, VmStatus, VmSummary};

const DISK_PREFIXES: &[&str] = &["scsi", "virtio", "ide", "sata"];

#[derive(Debug, Error)]
pub enum VmError {
    #[error("VM {0} not found")]
    NotFound(String),

    #[error("cluster reported no nodes")]
    NoNodes,

    #[error(transparent)]
    Upstream(#[from] HypervisorError),

    #[error("failed to {action} VM: {source}")]
    Action {
        action: PowerAction,
        #[source]
        source: HypervisorError,
    },
}

pub struct VmService {
    hypervisor: Arc<dyn Hypervisor>,
    locator: NodeLocator,
}

impl VmService {
    pub fn new(hypervisor: Arc<dyn Hypervisor>, strategy: NodeResolution) -> Self {
        Self {
            hypervisor,
            locator: NodeLocator::new(strategy),
        }
    }

    /// Current status, searching every node for the VM.
    pub async fn get_status(&self, vmid: &str) -> Result<VmStatus, VmError> {
        let (node, raw) = self.probe(vmid).await?;
        debug!(vmid, node = %node, "VM status fetched");
        Ok(normalize_status(&raw))
    }

    /// Status plus config-derived disk size and the last hour of samples.
    pub async fn get_detailed_status(&self, vmid: &str) -> Result<DetailedVmStatus, VmError> {
        let (node, raw) = match self.locator.strategy() {
            NodeResolution::Scan => self.probe(vmid).await?,
            NodeResolution::FirstNode => {
                let node = self.first_node().await?;
                let raw = self.hypervisor.vm_status(&node, vmid).await?;
                (node, raw)
            }
        };

        let (config, history) = match self.config_and_history(&node, vmid).await {
            Ok(found) => found,
            Err(e) => {
                self.locator.forget(vmid);
                return Err(e.into());
            }
        };
        let latest = history.last().cloned().unwrap_or_default();

        let mut base = normalize_status(&raw);
        if let Some(cpu) = latest.cpu {
            base.cpu_percent = cpu * 100.0;
        }
        if let Some(mem) = latest.mem {
            base.memory.used_bytes = mem.max(0.0) as u64;
        }
        base.disk.total_bytes = disk_total_from_config(&config);

        Ok(DetailedVmStatus {
            base,
            name: raw.name.clone().unwrap_or_else(|| format!("VM {}", vmid)),
            netin: latest.netin.unwrap_or(0.0),
            netout: latest.netout.unwrap_or(0.0),
            historical: history,
        })
    }

    pub async fn start(&self, vmid: &str) -> Result<String, VmError> {
        self.power(vmid, PowerAction::Start).await
    }

    pub async fn stop(&self, vmid: &str) -> Result<String, VmError> {
        self.power(vmid, PowerAction::Stop).await
    }

    pub async fn shutdown(&self, vmid: &str) -> Result<String, VmError> {
        self.power(vmid, PowerAction::Shutdown).await
    }

    pub async fn reset(&self, vmid: &str) -> Result<String, VmError> {
        self.power(vmid, PowerAction::Reset).await
    }

    /// Issue `action` against the node hosting `vmid`. No idempotency check:
    /// starting a running VM is the hypervisor's call to make.
    pub async fn power(&self, vmid: &str, action: PowerAction) -> Result<String, VmError> {
        let node = match self.resolve_node(vmid).await {
            Ok(node) => node,
            Err(VmError::Upstream(source)) => return Err(VmError::Action { action, source }),
            Err(e) => return Err(e),
        };

        match self.hypervisor.vm_power(&node, vmid, action).await {
            Ok(upid) => {
                info!(vmid, node = %node, %action, upid = %upid, "power action submitted");
                Ok(upid)
            }
            Err(source) => {
                self.locator.forget(vmid);
                Err(VmError::Action { action, source })
            }
        }
    }

    /// Inventory of one node; the first enumerated node when none is given.
    pub async fn list_vms_on_node(&self, node: Option<&str>) -> Result<Vec<VmSummary>, VmError> {
        let node = match node {
            Some(n) => n.to_string(),
            None => self.first_node().await?,
        };
        let vms = self.hypervisor.list_vms(&node).await?;
        Ok(vms
            .into_iter()
            .map(|vm| VmSummary {
                name: vm.name.unwrap_or_else(|| format!("VM {}", vm.vmid)),
                status: vm.status.unwrap_or_else(|| "unknown".to_string()),
                cpu: vm.cpu.unwrap_or(0.0),
                memory: MemoryUsage {
                    used_bytes: vm.mem.unwrap_or(0),
                    total_bytes: vm.maxmem.unwrap_or(0),
                },
                vmid: vm.vmid,
            })
            .collect())
    }

    async fn resolve_node(&self, vmid: &str) -> Result<String, VmError> {
        match self.locator.strategy() {
            NodeResolution::FirstNode => self.first_node().await,
            NodeResolution::Scan => self.probe(vmid).await.map(|(node, _)| node),
        }
    }

    async fn config_and_history(
        &self,
        node: &str,
        vmid: &str,
    ) -> Result<(VmConfig, Vec<RrdSample>), HypervisorError> {
        let config = self.hypervisor.vm_config(node, vmid).await?;
        let history = self
            .hypervisor
            .vm_rrd(node, vmid, RrdTimeframe::Hour, Consolidation::Average)
            .await?;
        Ok((config, history))
    }

    async fn first_node(&self) -> Result<String, VmError> {
        let nodes = self.hypervisor.list_nodes().await?;
        nodes.into_iter().next().map(|n| n.node).ok_or(VmError::NoNodes)
    }

    /// Find the node answering for `vmid`, trying the remembered node first.
    async fn probe(&self, vmid: &str) -> Result<(String, VmCurrentStatus), VmError> {
        let cached = self.locator.cached(vmid);
        if let Some(node) = &cached {
            match self.hypervisor.vm_status(node, vmid).await {
                Ok(raw) => return Ok((node.clone(), raw)),
                Err(e) => {
                    debug!(vmid, node = %node, error = %e, "cached node no longer answers, rescanning");
                    self.locator.forget(vmid);
                }
            }
        }

        let nodes = self.hypervisor.list_nodes().await?;
        for node in nodes {
            if cached.as_deref() == Some(node.node.as_str()) {
                continue;
            }
            match self.hypervisor.vm_status(&node.node, vmid).await {
                Ok(raw) => {
                    self.locator.remember(vmid, &node.node);
                    return Ok((node.node, raw));
                }
                Err(e) => {
                    warn!(vmid, node = %node.node, error = %e, "VM status probe failed, trying next node");
                }
            }
        }

        Err(VmError::NotFound(vmid.to_string()))
    }
}

fn normalize_status(raw: &VmCurrentStatus) -> VmStatus {
    VmStatus {
        status: raw.status.clone().unwrap_or_else(|| "unknown".to_string()),
        cpu_percent: raw.cpu.unwrap_or(0.0) * 100.0,
        memory: MemoryUsage {
            used_bytes: raw.mem.unwrap_or(0),
            total_bytes: raw.maxmem.unwrap_or(0),
        },
        // not derivable from the status call
        disk: DiskUsage::default(),
        uptime_seconds: raw.uptime.unwrap_or(0),
    }
}

/// Sum of `size=` over the VM's disk entries (`scsi0`, `virtio1`, ...).
/// CD-ROM drives are not disks and are skipped.
pub fn disk_total_from_config(config: &VmConfig) -> u64 {
    config
        .iter()
        .filter(|(key, _)| is_disk_key(key))
        .filter_map(|(_, value)| value.as_str())
        .filter(|value| !value.split(',').any(|opt| opt.trim() == "media=cdrom"))
        .filter_map(|value| {
            value
                .split(',')
                .find_map(|opt| opt.trim().strip_prefix("size="))
                .and_then(parse_disk_size)
        })
        .sum()
}

fn is_disk_key(key: &str) -> bool {
    DISK_PREFIXES.iter().any(|prefix| {
        key.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
    })
}

/// `32G`, `512M`, `1.5T`, `100K`, or plain bytes.
pub fn parse_disk_size(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let (number, multiplier) = match raw.chars().last()? {
        'T' | 't' => (&raw[..raw.len() - 1], 1024u64.pow(4)),
        'G' | 'g' => (&raw[..raw.len() - 1], 1024u64.pow(3)),
        'M' | 'm' => (&raw[..raw.len() - 1], 1024u64.pow(2)),
        'K' | 'k' => (&raw[..raw.len() - 1], 1024),
        c if c.is_ascii_digit() => (raw, 1),
        _ => return None,
    };
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64) as u64)
}
