//! Per-user VM allow-lists.
//!
//! The allow-list is the only source of authorization truth: a VM the
//! hypervisor reports as existing is still off-limits unless its id is
//! configured for the caller.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    users: HashMap<String, Vec<String>>,
}

impl AccessPolicy {
    pub fn new(users: HashMap<String, Vec<String>>) -> Self {
        let users = users
            .into_iter()
            .map(|(user, mut vmids)| {
                // keep configured order, drop repeats
                let mut seen = std::collections::HashSet::new();
                vmids.retain(|id| seen.insert(id.clone()));
                (user, vmids)
            })
            .collect();
        Self { users }
    }

    /// True iff `vmid` is configured for `username`.
    pub fn authorize(&self, username: &str, vmid: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|vmids| vmids.iter().any(|id| id == vmid))
    }

    /// The configured VM ids for `username`; empty for unknown users.
    pub fn list_vms(&self, username: &str) -> &[String] {
        self.users.get(username).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_user(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.users.keys().map(String::as_str)
    }
}
