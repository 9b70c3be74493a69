use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vmgate::auth::credentials::ProxmoxCredentialVerifier;
use vmgate::auth::token::{TokenService, MAX_TTL_MINUTES};
use vmgate::cli::{self, Commands, TokenCommands};
use vmgate::config::{self, Config};
use vmgate::hypervisor::client::{build_http_client, ProxmoxClient};
use vmgate::hypervisor::service::VmService;
use vmgate::{api, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args = cli::Cli::parse();
    let cfg = config::load()?;

    let result = match args.command {
        Some(Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(Commands::Token { command }) => handle_token_command(&cfg, command),
        Some(Commands::Inventory { node }) => handle_inventory(&cfg, node.as_deref()).await,
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// stdout logging, plus OTLP export when OTEL_EXPORTER_OTLP_ENDPOINT is set.
fn init_tracing() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "vmgate"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vmgate=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(telemetry_layer)
        .init();

    Ok(())
}

fn http_client(cfg: &Config) -> anyhow::Result<reqwest::Client> {
    Ok(build_http_client(
        cfg.upstream_timeout,
        cfg.upstream_connect_timeout,
        cfg.verify_tls,
    )?)
}

async fn run_server(cfg: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!(config = ?cfg, "configuration loaded");

    let http = http_client(&cfg)?;
    let hypervisor = Arc::new(ProxmoxClient::from_config(&cfg, http.clone()));
    let verifier = Arc::new(ProxmoxCredentialVerifier::new(cfg.proxmox_url.clone(), http));

    let state = Arc::new(AppState::new(cfg, hypervisor, verifier));
    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("vmgate listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

fn handle_token_command(cfg: &Config, cmd: TokenCommands) -> anyhow::Result<()> {
    let tokens = TokenService::new(&cfg.jwt_secret);
    match cmd {
        TokenCommands::Issue { username, ttl_minutes } => {
            if !cfg.allowed_users.contains_user(&username) {
                eprintln!("warning: '{}' has no allow-list entry; the token will get 403s", username);
            }
            let ttl = match ttl_minutes {
                Some(m) if m == 0 || m > MAX_TTL_MINUTES => {
                    anyhow::bail!("--ttl-minutes must be between 1 and {}", MAX_TTL_MINUTES)
                }
                Some(m) => Some(Duration::from_secs(m * 60)),
                None => None,
            };
            let token = tokens.issue(&username, ttl).context("failed to sign token")?;
            println!("{}", token);
        }
        TokenCommands::Inspect { token } => match tokens.validate(&token) {
            Ok(subject) => {
                println!("valid token for '{}'", subject);
                let vms = cfg.allowed_users.list_vms(&subject);
                if vms.is_empty() {
                    println!("  allow-list: (none)");
                } else {
                    println!("  allow-list: {}", vms.join(", "));
                }
            }
            Err(e) => anyhow::bail!("token rejected: {}", e),
        },
    }
    Ok(())
}

async fn handle_inventory(cfg: &Config, node: Option<&str>) -> anyhow::Result<()> {
    let http = http_client(cfg)?;
    let vms = VmService::new(
        Arc::new(ProxmoxClient::from_config(cfg, http)),
        cfg.node_resolution,
    );

    let list = vms.list_vms_on_node(node).await?;
    if list.is_empty() {
        println!("No VMs found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<24} {:<10} {:>7} {:>12} {:>12}",
        "VMID", "NAME", "STATUS", "CPU%", "MEM USED", "MEM TOTAL"
    );
    for vm in list {
        println!(
            "{:<8} {:<24} {:<10} {:>7.1} {:>12} {:>12}",
            vm.vmid,
            vm.name,
            vm.status,
            vm.cpu * 100.0,
            vm.memory.used_bytes,
            vm.memory.total_bytes
        );
    }
    Ok(())
}
