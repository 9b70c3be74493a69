use async_trait::async_trait;

use crate::hypervisor::client::ProxmoxClient;
use crate::hypervisor::Hypervisor;

/// Checks a username/password pair. Never errors: any failure is `false`.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, username: &str, password: &str) -> bool;
}

/// Verifies credentials against the hypervisor itself: open a password
/// session, then list nodes with it so a ticket the API would not honor
/// doesn't count as a successful login.
pub struct ProxmoxCredentialVerifier {
    base_url: String,
    http: reqwest::Client,
}

impl ProxmoxCredentialVerifier {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }
}

#[async_trait]
impl CredentialVerifier for ProxmoxCredentialVerifier {
    async fn verify(&self, username: &str, password: &str) -> bool {
        if username.is_empty() || password.is_empty() {
            return false;
        }

        let auth = match ProxmoxClient::login(&self.http, &self.base_url, username, password).await {
            Ok(auth) => auth,
            Err(e) => {
                tracing::warn!(username, error = %e, "hypervisor login rejected");
                return false;
            }
        };

        let session = ProxmoxClient::new(self.base_url.clone(), auth, self.http.clone());
        match session.list_nodes().await {
            Ok(nodes) => {
                tracing::debug!(username, nodes = nodes.len(), "hypervisor session verified");
                true
            }
            Err(e) => {
                tracing::warn!(username, error = %e, "hypervisor session unusable");
                false
            }
        }
    }
}
