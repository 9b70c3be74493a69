//! Shared fixtures: an in-memory hypervisor, a static credential verifier,
//! and a config builder.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use vmgate::auth::credentials::CredentialVerifier;
use vmgate::config::Config;
use vmgate::hypervisor::types::{
    Consolidation, NodeListItem, RrdSample, RrdTimeframe, VmConfig, VmCurrentStatus, VmListItem,
};
use vmgate::hypervisor::{Hypervisor, HypervisorError};
use vmgate::models::vm::PowerAction;
use vmgate::AppState;

pub const JWT_SECRET: &str = "integration-test-secret";

/// In-memory cluster. VMs live on exactly the nodes they were added to;
/// probing any other node fails the way Proxmox does (HTTP 500).
#[derive(Default)]
pub struct FakeHypervisor {
    nodes: Vec<String>,
    vms: Mutex<HashMap<(String, String), VmCurrentStatus>>,
    configs: HashMap<String, VmConfig>,
    rrd: HashMap<String, Vec<RrdSample>>,
    broken_nodes: HashSet<String>,
    nodes_down: bool,
    power_fails: bool,
    config_fails: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeHypervisor {
    pub fn new(nodes: &[&str]) -> Self {
        Self {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_vm(mut self, node: &str, vmid: &str, status: VmCurrentStatus) -> Self {
        self.vms
            .get_mut()
            .unwrap()
            .insert((node.to_string(), vmid.to_string()), status);
        self
    }

    pub fn with_config(mut self, vmid: &str, config: serde_json::Value) -> Self {
        self.configs
            .insert(vmid.to_string(), serde_json::from_value(config).unwrap());
        self
    }

    pub fn with_rrd(mut self, vmid: &str, samples: Vec<RrdSample>) -> Self {
        self.rrd.insert(vmid.to_string(), samples);
        self
    }

    /// Every VM call against this node fails with a transport error.
    pub fn with_broken_node(mut self, node: &str) -> Self {
        self.broken_nodes.insert(node.to_string());
        self
    }

    pub fn with_nodes_down(mut self) -> Self {
        self.nodes_down = true;
        self
    }

    pub fn with_failing_power(mut self) -> Self {
        self.power_fails = true;
        self
    }

    pub fn with_failing_config(mut self) -> Self {
        self.config_fails = true;
        self
    }

    /// Move a VM to another node, as a live migration would.
    pub fn migrate(&self, vmid: &str, from: &str, to: &str) {
        let mut vms = self.vms.lock().unwrap();
        if let Some(status) = vms.remove(&(from.to_string(), vmid.to_string())) {
            vms.insert((to.to_string(), vmid.to_string()), status);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, node: &str, vmid: &str) -> Result<(), HypervisorError> {
        if self.broken_nodes.contains(node) {
            return Err(HypervisorError::Transport(format!("connection to {} refused", node)));
        }
        if !self.vms.lock().unwrap().contains_key(&(node.to_string(), vmid.to_string())) {
            return Err(HypervisorError::Status {
                status: 500,
                body: format!(
                    "Configuration file 'nodes/{}/qemu-server/{}.conf' does not exist",
                    node, vmid
                ),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn list_nodes(&self) -> Result<Vec<NodeListItem>, HypervisorError> {
        self.record("nodes".to_string());
        if self.nodes_down {
            return Err(HypervisorError::Status {
                status: 401,
                body: "authentication failure".to_string(),
            });
        }
        Ok(self
            .nodes
            .iter()
            .map(|n| NodeListItem {
                node: n.clone(),
                status: Some("online".to_string()),
            })
            .collect())
    }

    async fn vm_status(&self, node: &str, vmid: &str) -> Result<VmCurrentStatus, HypervisorError> {
        self.record(format!("status:{}:{}", node, vmid));
        self.check(node, vmid)?;
        Ok(self.vms.lock().unwrap()[&(node.to_string(), vmid.to_string())].clone())
    }

    async fn vm_config(&self, node: &str, vmid: &str) -> Result<VmConfig, HypervisorError> {
        self.record(format!("config:{}:{}", node, vmid));
        self.check(node, vmid)?;
        if self.config_fails {
            return Err(HypervisorError::Transport("connection reset by peer".to_string()));
        }
        Ok(self.configs.get(vmid).cloned().unwrap_or_default())
    }

    async fn vm_rrd(
        &self,
        node: &str,
        vmid: &str,
        timeframe: RrdTimeframe,
        cf: Consolidation,
    ) -> Result<Vec<RrdSample>, HypervisorError> {
        self.record(format!("rrd:{}:{}:{}:{}", node, vmid, timeframe.as_str(), cf.as_str()));
        self.check(node, vmid)?;
        Ok(self.rrd.get(vmid).cloned().unwrap_or_default())
    }

    async fn vm_power(&self, node: &str, vmid: &str, action: PowerAction) -> Result<String, HypervisorError> {
        self.record(format!("power:{}:{}:{}", node, vmid, action));
        self.check(node, vmid)?;
        if self.power_fails {
            return Err(HypervisorError::Status {
                status: 500,
                body: "VM is locked (backup)".to_string(),
            });
        }
        Ok(format!("UPID:{}:0000ABCD:qm{}:{}:root@pam:", node, action, vmid))
    }

    async fn list_vms(&self, node: &str) -> Result<Vec<VmListItem>, HypervisorError> {
        self.record(format!("list:{}", node));
        let vms = self.vms.lock().unwrap();
        let mut items: Vec<VmListItem> = vms
            .iter()
            .filter(|((n, _), _)| n == node)
            .map(|((_, vmid), status)| VmListItem {
                vmid: vmid.clone(),
                name: status.name.clone(),
                status: status.status.clone(),
                cpu: status.cpu,
                mem: status.mem,
                maxmem: status.maxmem,
            })
            .collect();
        items.sort_by(|a, b| a.vmid.cmp(&b.vmid));
        Ok(items)
    }
}

/// Accepts exactly the configured username/password pairs.
pub struct StaticVerifier {
    users: HashMap<String, String>,
}

impl StaticVerifier {
    pub fn new(users: &[(&str, &str)]) -> Self {
        Self {
            users: users
                .iter()
                .map(|(u, p)| (u.to_string(), p.to_string()))
                .collect(),
        }
    }
}

#[async_trait]
impl CredentialVerifier for StaticVerifier {
    async fn verify(&self, username: &str, password: &str) -> bool {
        self.users.get(username).is_some_and(|p| p == password)
    }
}

pub fn running(cpu: f64, mem: u64, maxmem: u64, uptime: u64) -> VmCurrentStatus {
    VmCurrentStatus {
        status: Some("running".to_string()),
        name: None,
        cpu: Some(cpu),
        mem: Some(mem),
        maxmem: Some(maxmem),
        uptime: Some(uptime),
    }
}

/// Config for `{"alice": ["101", "102"]}` plus any overrides.
pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::from([
        ("PROXMOX_HOST".to_string(), "pve.test".to_string()),
        ("PROXMOX_API_TOKEN_ID".to_string(), "svc@pve!gate".to_string()),
        ("PROXMOX_API_TOKEN_SECRET".to_string(), "token-secret".to_string()),
        ("JWT_SECRET".to_string(), JWT_SECRET.to_string()),
        ("ALLOWED_USERS".to_string(), r#"{"alice": ["101", "102"]}"#.to_string()),
    ]);
    for (k, v) in overrides {
        env.insert(k.to_string(), v.to_string());
    }
    Config::from_lookup(|k| env.get(k).cloned()).unwrap()
}

pub fn app_state(config: Config, hypervisor: Arc<FakeHypervisor>) -> Arc<AppState> {
    let verifier = Arc::new(StaticVerifier::new(&[("alice", "wonderland"), ("mallory", "hunter2")]));
    Arc::new(AppState::new(config, hypervisor, verifier))
}
