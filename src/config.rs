use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::auth::token::MAX_TTL_MINUTES;
use crate::policy::AccessPolicy;

/// How VM-scoped operations find the node hosting a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResolution {
    /// Probe every node in order, remembering where the VM was found.
    Scan,
    /// Assume the first node reported by the cluster.
    FirstNode,
}

impl std::str::FromStr for NodeResolution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(NodeResolution::Scan),
            "first" | "first-node" | "first_node" => Ok(NodeResolution::FirstNode),
            other => bail!("unknown node resolution '{}', expected 'scan' or 'first'", other),
        }
    }
}

/// Proxmox API token identifier, `user@realm!tokenname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiTokenId {
    pub user: String,
    pub token_name: String,
}

impl ApiTokenId {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let mut parts = raw.split('!');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(user), Some(token_name), None) if !user.is_empty() && !token_name.is_empty() => {
                Ok(Self {
                    user: user.to_string(),
                    token_name: token_name.to_string(),
                })
            }
            _ => bail!(
                "PROXMOX_API_TOKEN_ID must look like 'user@realm!tokenname', got '{}'",
                raw
            ),
        }
    }
}

impl fmt::Display for ApiTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}!{}", self.user, self.token_name)
    }
}

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Base URL of the Proxmox API, e.g. `https://pve.local:8006`.
    pub proxmox_url: String,
    pub api_token_id: ApiTokenId,
    pub api_token_secret: String,
    pub verify_tls: bool,
    pub jwt_secret: String,
    pub allowed_users: AccessPolicy,
    /// Lifetime of tokens issued by `POST /token`.
    pub token_ttl: Duration,
    pub upstream_timeout: Duration,
    pub upstream_connect_timeout: Duration,
    pub node_resolution: NodeResolution,
    /// Reject bearer tokens whose subject has no allow-list entry.
    pub strict_subjects: bool,
    /// Return upstream error text to callers of the power-action routes.
    pub expose_action_errors: bool,
    pub cors_origins: Vec<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("proxmox_url", &self.proxmox_url)
            .field("api_token_id", &self.api_token_id.to_string())
            .field("api_token_secret", &"<redacted>")
            .field("verify_tls", &self.verify_tls)
            .field("jwt_secret", &"<redacted>")
            .field("allowed_users", &self.allowed_users.users().collect::<Vec<_>>())
            .field("token_ttl", &self.token_ttl)
            .field("upstream_timeout", &self.upstream_timeout)
            .field("upstream_connect_timeout", &self.upstream_connect_timeout)
            .field("node_resolution", &self.node_resolution)
            .field("strict_subjects", &self.strict_subjects)
            .field("expose_action_errors", &self.expose_action_errors)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:5173",
    "http://127.0.0.1:5173",
    "http://localhost:8000",
    "http://127.0.0.1:8000",
];

impl Config {
    /// Build a config from an arbitrary key lookup. `load()` feeds it the
    /// process environment; tests feed it a map.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| get(key).with_context(|| format!("{} is required", key));

        let host = require("PROXMOX_HOST")?;
        let proxmox_port: u16 = parse_or(get("PROXMOX_PORT"), "PROXMOX_PORT", 8006)?;
        let api_token_id = ApiTokenId::parse(&require("PROXMOX_API_TOKEN_ID")?)?;
        let api_token_secret = require("PROXMOX_API_TOKEN_SECRET")?;
        let jwt_secret = require("JWT_SECRET")?;

        let allowed_raw = require("ALLOWED_USERS")?;
        let allowed_users = parse_allowed_users(&allowed_raw).context("ALLOWED_USERS is malformed")?;

        let node_resolution = match get("VMGATE_NODE_RESOLUTION") {
            Some(v) => v.parse()?,
            None => NodeResolution::Scan,
        };

        let cors_origins = match get("VMGATE_CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
        };

        let ttl_minutes: u64 = parse_or(get("VMGATE_TOKEN_TTL_MINUTES"), "VMGATE_TOKEN_TTL_MINUTES", 30)?;
        if ttl_minutes == 0 || ttl_minutes > MAX_TTL_MINUTES {
            bail!(
                "VMGATE_TOKEN_TTL_MINUTES must be between 1 and {}, got {}",
                MAX_TTL_MINUTES,
                ttl_minutes
            );
        }

        Ok(Config {
            port: parse_or(get("VMGATE_PORT"), "VMGATE_PORT", 8000)?,
            proxmox_url: proxmox_base_url(&host, proxmox_port),
            api_token_id,
            api_token_secret,
            verify_tls: parse_bool(get("PROXMOX_VERIFY_TLS"), "PROXMOX_VERIFY_TLS", false)?,
            jwt_secret,
            allowed_users,
            token_ttl: Duration::from_secs(ttl_minutes * 60),
            upstream_timeout: Duration::from_secs(parse_or(
                get("VMGATE_UPSTREAM_TIMEOUT_SECS"),
                "VMGATE_UPSTREAM_TIMEOUT_SECS",
                30,
            )?),
            upstream_connect_timeout: Duration::from_secs(parse_or(
                get("VMGATE_UPSTREAM_CONNECT_TIMEOUT_SECS"),
                "VMGATE_UPSTREAM_CONNECT_TIMEOUT_SECS",
                5,
            )?),
            node_resolution,
            strict_subjects: parse_bool(get("VMGATE_STRICT_SUBJECTS"), "VMGATE_STRICT_SUBJECTS", false)?,
            expose_action_errors: parse_bool(
                get("VMGATE_EXPOSE_ACTION_ERRORS"),
                "VMGATE_EXPOSE_ACTION_ERRORS",
                false,
            )?,
            cors_origins,
        })
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    Config::from_lookup(|key| std::env::var(key).ok())
}

/// Accepts a bare host, `host:port`, or a full `https://` URL.
fn proxmox_base_url(host: &str, port: u16) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        return host.to_string();
    }
    let has_port = if host.starts_with('[') {
        host.contains("]:")
    } else {
        host.contains(':')
    };
    if has_port {
        return format!("https://{}", host);
    }
    format!("https://{}:{}", host, port)
}

/// `{"alice": ["101", 102]}`. Ids may be strings or integers.
fn parse_allowed_users(raw: &str) -> anyhow::Result<AccessPolicy> {
    let value: HashMap<String, Vec<serde_json::Value>> = serde_json::from_str(raw)?;
    let mut mapping = HashMap::with_capacity(value.len());
    for (user, ids) in value {
        if user.trim().is_empty() {
            bail!("empty username in allow-list");
        }
        let mut vmids = Vec::with_capacity(ids.len());
        for id in ids {
            let vmid = match id {
                serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => bail!("invalid VM id {} for user '{}'", other, user),
            };
            vmids.push(vmid);
        }
        mapping.insert(user, vmids);
    }
    Ok(AccessPolicy::new(mapping))
}

fn parse_or<T>(raw: Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(v) => v.parse().with_context(|| format!("{} has an invalid value '{}'", key, v)),
        None => Ok(default),
    }
}

fn parse_bool(raw: Option<String>, key: &str, default: bool) -> anyhow::Result<bool> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => bail!("{} must be a boolean, got '{}'", key, other),
    }
}
