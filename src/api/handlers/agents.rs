use actix_web::{web, HttpResponse};
use serde::Deserialize;
use std::sync::Arc;

use crate::api::envelope::ApiResponse;
use crate::api::registry::AgentRegistry;
use crate::models::agent::{AgentRegistration, HeartbeatRequest};
use crate::utils::error::AppResult;

#[derive(Deserialize)]
pub struct AgentNameRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize)]
pub struct AgentCaptureRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Deserialize)]
pub struct AgentInterfaceRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub interface: String,
}

/// GET /api/agents
pub async fn list_agents(registry: web::Data<Arc<AgentRegistry>>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::with_data(registry.list()))
}

/// POST /api/agents/register
pub async fn register_agent(
    registry: web::Data<Arc<AgentRegistry>>,
    registration: web::Json<AgentRegistration>,
) -> AppResult<HttpResponse> {
    let name = registration.name.clone();
    registry.register(registration.into_inner())?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(format!(
        "Agent '{}' registered successfully",
        name
    ))))
}

/// POST /api/agents/unregister
pub async fn unregister_agent(
    registry: web::Data<Arc<AgentRegistry>>,
    request: web::Json<AgentNameRequest>,
) -> AppResult<HttpResponse> {
    registry.unregister(&request.name)?;

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(format!(
        "Agent '{}' unregistered successfully",
        request.name
    ))))
}

/// POST /api/agents/heartbeat
pub async fn agent_heartbeat(
    registry: web::Data<Arc<AgentRegistry>>,
    heartbeat: web::Json<HeartbeatRequest>,
) -> AppResult<HttpResponse> {
    registry.heartbeat(&heartbeat)?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok()))
}

/// POST /api/agents/capture/start: relayed to the agent
pub async fn start_agent_capture(
    registry: web::Data<Arc<AgentRegistry>>,
    request: web::Json<AgentCaptureRequest>,
) -> AppResult<HttpResponse> {
    let request = request.into_inner();
    if request.name.is_empty() {
        return Err(crate::utils::error::AppError::InvalidRequest(
            "Agent name is required".to_string(),
        ));
    }

    let response = registry
        .proxy_start(&request.name, request.interface, request.filter)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/agents/capture/stop: relayed to the agent
pub async fn stop_agent_capture(
    registry: web::Data<Arc<AgentRegistry>>,
    request: web::Json<AgentNameRequest>,
) -> AppResult<HttpResponse> {
    if request.name.is_empty() {
        return Err(crate::utils::error::AppError::InvalidRequest(
            "Agent name is required".to_string(),
        ));
    }

    let response = registry.proxy_stop(&request.name).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// POST /api/agents/set-interface: relayed to the agent
pub async fn set_agent_interface(
    registry: web::Data<Arc<AgentRegistry>>,
    request: web::Json<AgentInterfaceRequest>,
) -> AppResult<HttpResponse> {
    if request.name.is_empty() || request.interface.is_empty() {
        return Err(crate::utils::error::AppError::InvalidRequest(
            "Agent name and interface are required".to_string(),
        ));
    }

    let response = registry
        .proxy_set_interface(&request.name, &request.interface)
        .await?;
    Ok(HttpResponse::Ok().json(response))
}
