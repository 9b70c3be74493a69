//! HTTP client for the Proxmox VE API.
//! One `reqwest::Client` is shared process-wide; it pools connections and is
//! safe to use from concurrent requests. No retry middleware: every call is a
//! single attempt bounded by the configured timeouts.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::types::{
    Consolidation, Envelope, NodeListItem, RrdSample, RrdTimeframe, VmConfig, VmCurrentStatus, VmListItem,
};
use super::{Hypervisor, HypervisorError};
use crate::config::{ApiTokenId, Config};
use crate::models::vm::PowerAction;

/// How requests to the API are authenticated.
#[derive(Clone)]
pub enum ProxmoxAuth {
    /// `Authorization: PVEAPIToken=user@realm!name=secret`
    ApiToken { id: ApiTokenId, secret: String },
    /// Session from `POST /access/ticket`.
    Ticket { ticket: String, csrf_token: String },
}

#[derive(Deserialize)]
struct TicketData {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

pub struct ProxmoxClient {
    base_url: String,
    auth: ProxmoxAuth,
    http: reqwest::Client,
}

/// Build the shared HTTP client with explicit timeouts.
pub fn build_http_client(
    timeout: Duration,
    connect_timeout: Duration,
    verify_tls: bool,
) -> Result<reqwest::Client, HypervisorError> {
    reqwest::Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        // Proxmox ships self-signed certificates by default
        .danger_accept_invalid_certs(!verify_tls)
        .user_agent(concat!("vmgate/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| HypervisorError::Transport(format!("failed to build HTTP client: {}", e)))
}

impl ProxmoxClient {
    pub fn new(base_url: impl Into<String>, auth: ProxmoxAuth, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            http,
        }
    }

    /// Client authenticated with the service API token from the config.
    pub fn from_config(cfg: &Config, http: reqwest::Client) -> Self {
        Self::new(
            cfg.proxmox_url.clone(),
            ProxmoxAuth::ApiToken {
                id: cfg.api_token_id.clone(),
                secret: cfg.api_token_secret.clone(),
            },
            http,
        )
    }

    /// Exchange a username/password pair for a session ticket.
    pub async fn login(
        http: &reqwest::Client,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<ProxmoxAuth, HypervisorError> {
        let url = format!("{}/api2/json/access/ticket", base_url.trim_end_matches('/'));
        let resp = http
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await
            .map_err(|e| HypervisorError::Transport(e.to_string()))?;

        let data: TicketData = decode_envelope(resp).await?;
        Ok(ProxmoxAuth::Ticket {
            ticket: data.ticket,
            csrf_token: data.csrf_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api2/json{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let is_write = method != Method::GET;
        let req = self.http.request(method, self.url(path));
        match &self.auth {
            ProxmoxAuth::ApiToken { id, secret } => {
                req.header("Authorization", format!("PVEAPIToken={}={}", id, secret))
            }
            ProxmoxAuth::Ticket { ticket, csrf_token } => {
                let req = req.header("Cookie", format!("PVEAuthCookie={}", ticket));
                if is_write {
                    req.header("CSRFPreventionToken", csrf_token.as_str())
                } else {
                    req
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T, HypervisorError> {
        let resp = self
            .request(Method::GET, path)
            .query(query)
            .send()
            .await
            .map_err(|e| HypervisorError::Transport(e.to_string()))?;
        decode_envelope(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> Result<T, HypervisorError> {
        let resp = self
            .request(Method::POST, path)
            .send()
            .await
            .map_err(|e| HypervisorError::Transport(e.to_string()))?;
        decode_envelope(resp).await
    }
}

fn vm_path(node: &str, vmid: &str, rest: &str) -> String {
    format!(
        "/nodes/{}/qemu/{}{}",
        urlencoding::encode(node),
        urlencoding::encode(vmid),
        rest
    )
}

async fn decode_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, HypervisorError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| HypervisorError::Transport(e.to_string()))?;

    if !status.is_success() {
        return Err(HypervisorError::Status {
            status: status.as_u16(),
            body: body.chars().take(512).collect(),
        });
    }

    let envelope: Envelope<T> = serde_json::from_str(&body).map_err(|e| {
        HypervisorError::Decode(format!("{} (body: {})", e, body.chars().take(200).collect::<String>()))
    })?;
    Ok(envelope.data)
}

#[async_trait]
impl Hypervisor for ProxmoxClient {
    async fn list_nodes(&self) -> Result<Vec<NodeListItem>, HypervisorError> {
        self.get("/nodes", &[]).await
    }

    async fn vm_status(&self, node: &str, vmid: &str) -> Result<VmCurrentStatus, HypervisorError> {
        self.get(&vm_path(node, vmid, "/status/current"), &[]).await
    }

    async fn vm_config(&self, node: &str, vmid: &str) -> Result<VmConfig, HypervisorError> {
        self.get(&vm_path(node, vmid, "/config"), &[]).await
    }

    async fn vm_rrd(
        &self,
        node: &str,
        vmid: &str,
        timeframe: RrdTimeframe,
        cf: Consolidation,
    ) -> Result<Vec<RrdSample>, HypervisorError> {
        self.get(
            &vm_path(node, vmid, "/rrddata"),
            &[("timeframe", timeframe.as_str()), ("cf", cf.as_str())],
        )
        .await
    }

    async fn vm_power(&self, node: &str, vmid: &str, action: PowerAction) -> Result<String, HypervisorError> {
        let path = vm_path(node, vmid, &format!("/status/{}", action.as_str()));
        let upid: Option<String> = self.post(&path).await?;
        Ok(upid.unwrap_or_default())
    }

    async fn list_vms(&self, node: &str) -> Result<Vec<VmListItem>, HypervisorError> {
        self.get(&format!("/nodes/{}/qemu", urlencoding::encode(node)), &[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_client() -> ProxmoxClient {
        ProxmoxClient::new(
            "https://pve.local:8006/",
            ProxmoxAuth::ApiToken {
                id: ApiTokenId::parse("svc@pve!gate").unwrap(),
                secret: "s3cr3t".into(),
            },
            reqwest::Client::new(),
        )
    }

    #[test]
    fn test_url_strips_trailing_slash() {
        let client = token_client();
        assert_eq!(client.url("/nodes"), "https://pve.local:8006/api2/json/nodes");
    }

    #[test]
    fn test_vm_path_encodes_segments() {
        assert_eq!(vm_path("pve1", "101", "/config"), "/nodes/pve1/qemu/101/config");
        assert_eq!(vm_path("a/b", "1 0", ""), "/nodes/a%2Fb/qemu/1%200");
    }

    #[test]
    fn test_api_token_header() {
        let req = token_client().request(Method::GET, "/nodes").build().unwrap();
        assert_eq!(
            req.headers().get("authorization").unwrap(),
            "PVEAPIToken=svc@pve!gate=s3cr3t"
        );
    }

    #[test]
    fn test_ticket_sends_csrf_only_on_writes() {
        let client = ProxmoxClient::new(
            "https://pve.local:8006",
            ProxmoxAuth::Ticket {
                ticket: "PVE:alice@pve:ABC".into(),
                csrf_token: "csrf".into(),
            },
            reqwest::Client::new(),
        );
        let get = client.request(Method::GET, "/nodes").build().unwrap();
        assert_eq!(get.headers().get("cookie").unwrap(), "PVEAuthCookie=PVE:alice@pve:ABC");
        assert!(get.headers().get("csrfpreventiontoken").is_none());

        let post = client.request(Method::POST, "/nodes/pve1/qemu/101/status/start").build().unwrap();
        assert_eq!(post.headers().get("csrfpreventiontoken").unwrap(), "csrf");
    }
}
