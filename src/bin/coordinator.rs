use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;

use gatewatch::api::handlers::capture::StartTime;
use gatewatch::api::live::LiveCaptureService;
use gatewatch::api::registry::{self, AgentRegistry};
use gatewatch::api::routes;
use gatewatch::models::config::Config;
use gatewatch::utils::logging;
use gatewatch::ws::Broadcaster;

#[derive(Parser, Debug)]
#[clap(author, version, about = "gatewatch coordinator")]
struct Args {
    /// Path to the configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    /// Analyze this pcap file at startup
    #[clap(long)]
    pcap: Option<PathBuf>,

    /// Address and port to listen on (overrides the configuration)
    #[clap(long)]
    listen: Option<String>,

    /// Start a live capture at startup
    #[clap(long)]
    live: bool,

    /// Network interface for the live capture
    #[clap(long)]
    interface: Option<String>,

    /// Enable debug logging
    #[clap(long)]
    debug: bool,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logger(args.debug);

    info!(
        "Starting gatewatch coordinator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut cfg = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(listen) = &args.listen {
        let (host, port) = gatewatch::agent::registration::parse_listen_address(listen);
        cfg.server.host = host;
        cfg.server.port = port;
    }
    if args.live {
        cfg.capture.enable_live = true;
    }
    if let Some(interface) = &args.interface {
        cfg.capture.interface = interface.clone();
    }

    let registry = Arc::new(AgentRegistry::new());
    registry::spawn_liveness_sweep(registry.clone());

    let broadcaster = Arc::new(Broadcaster::new());
    let service = Arc::new(LiveCaptureService::new(&cfg, broadcaster.clone()));
    let start_time = StartTime(Utc::now());

    if let Some(pcap) = &args.pcap {
        info!("Analyzing pcap file: {}", pcap.display());
        let report = service
            .analyze_file(pcap)
            .await
            .with_context(|| format!("analyzing {}", pcap.display()))?;
        info!(
            "Analysis finished: {} packets, {} gateway-relevant ({:.1}%)",
            report.total_packets, report.gateway_packets, report.gateway_percentage
        );
    } else if cfg.capture.enable_live {
        if cfg.capture.interface.is_empty() {
            bail!("live capture requested but no interface configured");
        }
        service
            .start(&cfg.capture.interface, None)
            .with_context(|| format!("starting live capture on {}", cfg.capture.interface))?;
    }

    let listen = format!("{}:{}", cfg.server.host, cfg.server.port);
    let registry_data = web::Data::new(registry);
    let service_data = web::Data::new(service);
    let broadcaster_data = web::Data::new(broadcaster);
    let start_data = web::Data::new(start_time);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(registry_data.clone())
            .app_data(service_data.clone())
            .app_data(broadcaster_data.clone())
            .app_data(start_data.clone())
            .configure(routes::configure)
    })
    .disable_signals()
    .shutdown_timeout(5)
    .bind(&listen)
    .with_context(|| format!("cannot bind {}", listen))?
    .run();

    let handle = server.handle();
    let server_task = tokio::spawn(server);
    info!("Coordinator listening on {}", listen);

    wait_for_shutdown_signal().await;
    info!("Shutting down coordinator...");

    handle.stop(true).await;
    let _ = server_task.await;
    info!("Coordinator shutdown complete");
    Ok(())
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
