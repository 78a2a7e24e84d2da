use actix_web::{web, Error, HttpRequest, HttpResponse, Responder};
use actix_ws::Message;
use chrono::Utc;
use futures_util::StreamExt;
use log::info;
use serde_json::json;
use std::sync::Arc;

use crate::agent::admin;
use crate::agent::runtime::CaptureAgent;
use crate::api::envelope::ApiResponse;
use crate::models::agent::{CaptureRequest, SetInterfaceRequest};
use crate::utils::error::AppResult;

/// Configure the agent control-plane routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/status", web::get().to(status))
        .service(
            web::scope("/capture")
                .route("/start", web::post().to(start_capture))
                .route("/stop", web::post().to(stop_capture))
                .route("/set-interface", web::post().to(set_interface)),
        )
        .route("/ws", web::get().to(ws_subscribe));

    admin::configure(cfg);
}

/// GET /health
async fn health(agent: web::Data<Arc<CaptureAgent>>) -> HttpResponse {
    let status = agent.status_snapshot();
    let uptime = Utc::now() - status.start_time;

    HttpResponse::Ok().json(ApiResponse::with_data(json!({
        "status": "healthy",
        "uptime": format!("{}s", uptime.num_seconds()),
        "agent_name": status.name,
    })))
}

/// GET /status
async fn status(agent: web::Data<Arc<CaptureAgent>>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::with_data(agent.status_snapshot()))
}

/// POST /capture/start
async fn start_capture(
    agent: web::Data<Arc<CaptureAgent>>,
    request: Option<web::Json<CaptureRequest>>,
) -> AppResult<HttpResponse> {
    let request = request.map(web::Json::into_inner).unwrap_or_default();
    let (interface, filter) = agent.start_capture(request)?;

    let mut message = format!("Capture started on interface {}", interface);
    if let Some(filter) = &filter {
        message.push_str(&format!(" with filter: {}", filter));
    }

    Ok(HttpResponse::Ok().json(ApiResponse::with_message_and_data(
        message,
        json!({ "interface": interface, "filter": filter }),
    )))
}

/// POST /capture/stop
async fn stop_capture(agent: web::Data<Arc<CaptureAgent>>) -> AppResult<HttpResponse> {
    agent.stop_capture()?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message("Capture stopped")))
}

/// POST /capture/set-interface
async fn set_interface(
    agent: web::Data<Arc<CaptureAgent>>,
    request: web::Json<SetInterfaceRequest>,
) -> AppResult<HttpResponse> {
    agent.set_interface(&request.interface)?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message_and_data(
        format!("Network interface set to '{}'", request.interface),
        json!({ "interface": request.interface }),
    )))
}

/// GET /ws: packet summary stream. Inbound messages are ignored.
async fn ws_subscribe(
    req: HttpRequest,
    body: web::Payload,
    agent: web::Data<Arc<CaptureAgent>>,
) -> Result<impl Responder, Error> {
    let peer = req
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    info!("Subscriber connected from {}", peer);

    let (response, mut session, mut msg_stream) = actix_ws::handle(&req, body)?;
    let (id, mut rx) = agent.subscribers.subscribe();
    let agent = agent.into_inner();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(text) => {
                            if session.text(text).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                frame = msg_stream.next() => {
                    match frame {
                        Some(Ok(Message::Ping(bytes))) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                        Some(Ok(_)) => {} // inbound messages are ignored
                    }
                }
            }
        }

        agent.subscribers.remove(id);
        let _ = session.close(None).await;
        info!("Subscriber disconnected: {}", peer);
    });

    Ok(response)
}
