use actix_web::{web, HttpResponse, Responder};
use serde_json::json;

use crate::api::handlers::{agents, capture};
use crate::api::websocket;

/// Root endpoint describing the coordinator API
async fn index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "gatewatch coordinator",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            { "path": "/api/health", "method": "GET" },
            { "path": "/api/analyze", "method": "POST" },
            { "path": "/api/ws", "method": "GET" },
            { "path": "/api/interfaces", "method": "GET" },
            { "path": "/api/live/start", "method": "POST" },
            { "path": "/api/live/stop", "method": "POST" },
            { "path": "/api/agents", "method": "GET" },
            { "path": "/api/agents/register", "method": "POST" },
            { "path": "/api/agents/unregister", "method": "POST" },
            { "path": "/api/agents/heartbeat", "method": "POST" },
            { "path": "/api/agents/capture/start", "method": "POST" },
            { "path": "/api/agents/capture/stop", "method": "POST" },
            { "path": "/api/agents/set-interface", "method": "POST" },
        ]
    }))
}

/// Configure coordinator API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index)).service(
        web::scope("/api")
            .route("/health", web::get().to(capture::health))
            .route("/analyze", web::post().to(capture::analyze_pcap))
            .route("/ws", web::get().to(websocket::ws_index))
            .route("/interfaces", web::get().to(capture::list_interfaces))
            .route("/live/start", web::post().to(capture::start_live_capture))
            .route("/live/stop", web::post().to(capture::stop_live_capture))
            .service(
                web::scope("/agents")
                    .route("", web::get().to(agents::list_agents))
                    .route("/register", web::post().to(agents::register_agent))
                    .route("/unregister", web::post().to(agents::unregister_agent))
                    .route("/heartbeat", web::post().to(agents::agent_heartbeat))
                    .route("/capture/start", web::post().to(agents::start_agent_capture))
                    .route("/capture/stop", web::post().to(agents::stop_agent_capture))
                    .route("/set-interface", web::post().to(agents::set_agent_interface)),
            ),
    );
}
