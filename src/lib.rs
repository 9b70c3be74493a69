//! vmgate: authenticated power-control gateway for Proxmox VE virtual machines.
//!
//! Library crate shared by the `vmgate` binary and the integration tests in `tests/`.

use std::sync::Arc;

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod errors;
pub mod hypervisor;
pub mod models;
pub mod policy;

use auth::credentials::CredentialVerifier;
use auth::token::TokenService;
use hypervisor::service::VmService;
use hypervisor::Hypervisor;
use policy::AccessPolicy;

/// Shared application state passed to handlers and middleware.
/// Everything here is read-only after startup.
pub struct AppState {
    pub config: config::Config,
    pub tokens: TokenService,
    pub policy: AccessPolicy,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub vms: VmService,
}

impl AppState {
    pub fn new(
        config: config::Config,
        hypervisor: Arc<dyn Hypervisor>,
        verifier: Arc<dyn CredentialVerifier>,
    ) -> Self {
        Self {
            tokens: TokenService::new(&config.jwt_secret),
            policy: config.allowed_users.clone(),
            vms: VmService::new(hypervisor, config.node_resolution),
            verifier,
            config,
        }
    }
}
