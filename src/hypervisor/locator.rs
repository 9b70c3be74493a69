//! VM -> node location memory.
//!
//! Locations are hints, not truth: a VM can migrate between nodes, so a
//! cached node that stops answering for the VM is forgotten and the caller
//! falls back to a full scan.

use dashmap::DashMap;

use crate::config::NodeResolution;

pub struct NodeLocator {
    strategy: NodeResolution,
    known: DashMap<String, String>,
}

impl NodeLocator {
    pub fn new(strategy: NodeResolution) -> Self {
        Self {
            strategy,
            known: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> NodeResolution {
        self.strategy
    }

    pub fn cached(&self, vmid: &str) -> Option<String> {
        self.known.get(vmid).map(|node| node.value().clone())
    }

    pub fn remember(&self, vmid: &str, node: &str) {
        self.known.insert(vmid.to_string(), node.to_string());
    }

    pub fn forget(&self, vmid: &str) {
        self.known.remove(vmid);
    }
}
