use actix_web::{web, HttpResponse};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::runtime::CaptureAgent;
use crate::api::envelope::ApiResponse;
use crate::models::agent::AgentState;
use crate::models::config::AgentConfig;
use crate::utils::error::AppResult;
use crate::ws::WsEnvelope;

/// Minimal admin shell; the full UI is served elsewhere
const ADMIN_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>gatewatch agent</title></head>
<body>
<h1>gatewatch agent</h1>
<p>Control endpoints: GET /admin/status, POST /admin/config,
POST /admin/register, POST /admin/restart</p>
</body>
</html>
"#;

#[derive(Deserialize)]
struct AdminConfigRequest {
    #[serde(default)]
    server_url: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    interface: String,
    #[serde(default)]
    api_key: String,
}

/// Register the admin surface routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .route("", web::get().to(admin_page))
            .route("/config", web::post().to(update_config))
            .route("/status", web::get().to(admin_status))
            .route("/restart", web::post().to(restart))
            .route("/register", web::post().to(register)),
    );
}

/// GET /admin
async fn admin_page() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(ADMIN_PAGE)
}

/// POST /admin/config
async fn update_config(
    agent: web::Data<Arc<CaptureAgent>>,
    request: web::Json<AdminConfigRequest>,
) -> AppResult<HttpResponse> {
    let request = request.into_inner();
    agent.update_agent_config(AgentConfig {
        listen: agent.agent_config().listen,
        server_url: request.server_url,
        interface: request.interface,
        name: request.name,
        api_key: request.api_key,
    });

    agent.save_config()?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message("Configuration saved successfully")))
}

/// GET /admin/status
async fn admin_status(agent: web::Data<Arc<CaptureAgent>>) -> HttpResponse {
    let status = agent.status_snapshot();

    HttpResponse::Ok().json(ApiResponse::with_data(json!({
        "status": status.status,
        "packets_captured": status.packets_captured,
        "packets_dropped": status.packets_dropped,
        "interface": status.interface,
        "connected": status.status != AgentState::Error,
    })))
}

/// POST /admin/restart: notify subscribers, then re-exec the process
async fn restart(agent: web::Data<Arc<CaptureAgent>>) -> HttpResponse {
    info!("Agent restart requested");

    if agent.state() == AgentState::Capturing {
        if let Err(err) = agent.stop_capture() {
            warn!("Could not stop capture before restart: {}", err);
        }
    }

    agent.subscribers.broadcast(&WsEnvelope::System {
        message: "Agent is restarting...".to_string(),
    });

    tokio::spawn(async {
        // Let the HTTP response and the system frame drain first
        tokio::time::sleep(Duration::from_secs(1)).await;
        reexec();
    });

    HttpResponse::Ok().json(ApiResponse::with_message("Restart initiated"))
}

/// POST /admin/register: manual registration with the coordinator
async fn register(agent: web::Data<Arc<CaptureAgent>>) -> AppResult<HttpResponse> {
    agent.register().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        "Registered with the coordinator successfully",
    )))
}

#[cfg(unix)]
fn reexec() {
    use std::os::unix::process::CommandExt;

    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(err) => {
            error!("Cannot determine executable path: {}", err);
            return;
        }
    };
    let args: Vec<String> = std::env::args().skip(1).collect();

    info!("Restarting agent process: {} {:?}", exe.display(), args);
    let err = std::process::Command::new(exe).args(args).exec();
    error!("Failed to restart agent: {}", err);
}

#[cfg(not(unix))]
fn reexec() {
    error!("Process restart is only supported on Unix");
}
