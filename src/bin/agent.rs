use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

use gatewatch::agent::routes;
use gatewatch::agent::runtime::CaptureAgent;
use gatewatch::models::agent::AgentState;
use gatewatch::models::config::{self, AgentConfig, Config};
use gatewatch::utils::{logging, privilege};

const DEFAULT_COORDINATOR: &str = "http://localhost:8080";

#[derive(Parser, Debug)]
#[clap(author, version, about = "gatewatch capture agent")]
struct Args {
    /// Path to the configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Address and port the control plane listens on
    #[clap(long, default_value = "0.0.0.0:8090")]
    listen: String,

    /// Coordinator base URL
    #[clap(long, default_value = DEFAULT_COORDINATOR)]
    server: String,

    /// Network interface to capture packets from
    #[clap(long)]
    interface: Option<String>,

    /// Agent name (defaults to the hostname)
    #[clap(long)]
    name: Option<String>,

    /// Enable debug logging
    #[clap(long)]
    debug: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(args.debug);

    info!("Starting gatewatch agent v{}", env!("CARGO_PKG_VERSION"));
    privilege::check_capture_privileges();

    let exec_dir = config::executable_dir();
    let config_path = config::resolve_config_path(args.config.clone(), &exec_dir);
    let mut cfg = match &config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Config::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?
        }
        None => {
            info!("No configuration file found, using defaults");
            Config::default()
        }
    };

    apply_flags(&mut cfg, &args);
    let agent_config = cfg.agent.clone().unwrap_or_default();
    info!(
        "Agent '{}' (coordinator: {}, interface: {})",
        agent_config.name,
        if agent_config.server_url.is_empty() {
            "none"
        } else {
            &agent_config.server_url
        },
        if agent_config.interface.is_empty() {
            "unset"
        } else {
            &agent_config.interface
        },
    );

    let agent = CaptureAgent::new(cfg, args.config.clone());
    agent.spawn_background_tasks();

    let listen = agent_config.listen.clone();
    let app_agent = web::Data::new(agent.clone());
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_agent.clone())
            .configure(routes::configure)
    })
    .disable_signals()
    .shutdown_timeout(5)
    .bind(&listen)
    .with_context(|| format!("cannot bind {}", listen))?
    .run();

    let handle = server.handle();
    let server_task = tokio::spawn(server);
    info!("Agent control plane listening on {}", listen);

    wait_for_shutdown_signal().await;
    info!("Shutting down agent...");

    if agent.state() == AgentState::Capturing {
        let _ = agent.stop_capture();
    }
    if let Err(err) = agent.unregister().await {
        warn!("Could not unregister from coordinator: {}", err);
    }

    handle.stop(true).await;
    let _ = server_task.await;
    info!("Agent shutdown complete");
    Ok(())
}

/// Command-line flags override the loaded configuration.
fn apply_flags(cfg: &mut Config, args: &Args) {
    let agent = cfg.agent.get_or_insert_with(AgentConfig::default);

    if !args.listen.is_empty() {
        agent.listen = args.listen.clone();
    }
    // Keep a configured coordinator unless one was named explicitly
    if agent.server_url.is_empty() || args.server != DEFAULT_COORDINATOR {
        agent.server_url = args.server.clone();
    }
    if let Some(interface) = &args.interface {
        agent.interface = interface.clone();
        cfg.capture.interface = interface.clone();
    }
    if let Some(name) = &args.name {
        agent.name = name.clone();
    }
    if agent.name.is_empty() {
        agent.name = sys_info::hostname().unwrap_or_else(|_| {
            warn!("Could not determine hostname");
            "unknown-agent".to_string()
        });
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
