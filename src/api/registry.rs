use chrono::{Duration as ChronoDuration, Utc};
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::api::envelope::ApiResponse;
use crate::models::agent::{
    AgentRegistration, CaptureRequest, HeartbeatRequest, RemoteAgent, RemoteAgentState,
    SetInterfaceRequest,
};
use crate::utils::error::{AppError, AppResult};

/// How often the liveness sweep runs
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// An agent is considered offline after this much heartbeat silence
const OFFLINE_AFTER_SECS: i64 = 120;

/// Timeout for coordinator-to-agent control calls
const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinator-side registry of capture agents.
///
/// Holds the name-to-agent map behind a reader/writer lock; the liveness
/// sweep is the only periodic writer.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, RemoteAgent>>,
    http: reqwest::Client,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            http: reqwest::Client::new(),
        }
    }

    /// Insert or update an agent. Re-registration with the same name
    /// replaces the previous record.
    pub fn register(&self, registration: AgentRegistration) -> AppResult<()> {
        if registration.name.is_empty() || registration.url.is_empty() {
            return Err(AppError::InvalidRequest(
                "Agent name and URL are required".to_string(),
            ));
        }

        let agent = RemoteAgent::from_registration(registration, Utc::now());
        info!("Agent '{}' registered: {}", agent.name, agent.url);
        self.agents.write().insert(agent.name.clone(), agent);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> AppResult<()> {
        if name.is_empty() {
            return Err(AppError::InvalidRequest(
                "Agent name is required".to_string(),
            ));
        }

        self.agents.write().remove(name);
        info!("Agent '{}' unregistered", name);
        Ok(())
    }

    /// Refresh an agent's last-seen time, overwriting its status when the
    /// heartbeat supplied one.
    pub fn heartbeat(&self, heartbeat: &HeartbeatRequest) -> AppResult<()> {
        if heartbeat.name.is_empty() {
            return Err(AppError::InvalidRequest(
                "Agent name is required".to_string(),
            ));
        }

        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(&heartbeat.name)
            .ok_or_else(|| AppError::UnknownAgent(heartbeat.name.clone()))?;

        agent.last_seen = Utc::now();
        if let Some(status) = heartbeat.status {
            agent.status = status.into();
        }
        if let Some(interface) = &heartbeat.interface {
            if !interface.is_empty() {
                agent.active_interface = Some(interface.clone());
            }
        }

        Ok(())
    }

    /// Snapshot of all registered agents.
    pub fn list(&self) -> Vec<RemoteAgent> {
        self.agents.read().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<RemoteAgent> {
        self.agents.read().get(name).cloned()
    }

    /// Mark agents silent for longer than the threshold as offline. They
    /// stay in the map until explicitly unregistered.
    pub fn sweep_once(&self) {
        let now = Utc::now();
        let threshold = ChronoDuration::seconds(OFFLINE_AFTER_SECS);

        let mut agents = self.agents.write();
        for (name, agent) in agents.iter_mut() {
            if agent.status != RemoteAgentState::Offline && now - agent.last_seen > threshold {
                agent.status = RemoteAgentState::Offline;
                warn!(
                    "Agent '{}' is offline (no heartbeat for {}s)",
                    name,
                    (now - agent.last_seen).num_seconds()
                );
            }
        }
    }

    fn agent_url(&self, name: &str) -> AppResult<String> {
        self.agents
            .read()
            .get(name)
            .map(|agent| agent.url.clone())
            .ok_or_else(|| AppError::UnknownAgent(name.to_string()))
    }

    /// Relay a capture start to the agent's own control endpoint and
    /// forward its response.
    pub async fn proxy_start(
        &self,
        name: &str,
        interface: Option<String>,
        filter: Option<String>,
    ) -> AppResult<ApiResponse> {
        let url = self.agent_url(name)?;
        let body = CaptureRequest { interface, filter };

        let response = self
            .post_agent(&format!("{}/capture/start", url), Some(&body))
            .await?;

        if response.success {
            if let Some(agent) = self.agents.write().get_mut(name) {
                agent.status = RemoteAgentState::Capturing;
            }
        }
        Ok(response)
    }

    pub async fn proxy_stop(&self, name: &str) -> AppResult<ApiResponse> {
        let url = self.agent_url(name)?;

        let response = self
            .post_agent::<()>(&format!("{}/capture/stop", url), None)
            .await?;

        if response.success {
            if let Some(agent) = self.agents.write().get_mut(name) {
                agent.status = RemoteAgentState::Online;
            }
        }
        Ok(response)
    }

    /// Relay a set-interface command, validating against the interface
    /// list the agent registered with.
    pub async fn proxy_set_interface(
        &self,
        name: &str,
        interface: &str,
    ) -> AppResult<ApiResponse> {
        let agent = self
            .get(name)
            .ok_or_else(|| AppError::UnknownAgent(name.to_string()))?;

        if !agent.interfaces.iter().any(|i| i == interface) {
            return Err(AppError::InvalidRequest(format!(
                "Interface '{}' does not exist on agent '{}'",
                interface, name
            )));
        }

        let body = SetInterfaceRequest {
            interface: interface.to_string(),
        };
        let response = self
            .post_agent(&format!("{}/capture/set-interface", agent.url), Some(&body))
            .await?;

        if response.success {
            if let Some(agent) = self.agents.write().get_mut(name) {
                agent.active_interface = Some(interface.to_string());
            }
        }
        Ok(response)
    }

    async fn post_agent<T: serde::Serialize>(
        &self,
        url: &str,
        body: Option<&T>,
    ) -> AppResult<ApiResponse> {
        let mut request = self.http.post(url).timeout(PROXY_TIMEOUT);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|err| AppError::AgentUnreachable(err.to_string()))?;

        response
            .json::<ApiResponse>()
            .await
            .map_err(|err| AppError::AgentUnreachable(format!("invalid agent response: {}", err)))
    }
}

/// Run the liveness sweep until the process exits.
pub fn spawn_liveness_sweep(registry: Arc<AgentRegistry>) {
    tokio::spawn(async move {
        let mut ticker = interval(SWEEP_INTERVAL);
        ticker.tick().await; // immediate first tick carries no information
        loop {
            ticker.tick().await;
            registry.sweep_once();
        }
    });
}
