use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

use crate::models::interface::InterfaceDetail;

/// Lifecycle state of a capture agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Capturing,
    Error,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentState::Idle => "idle",
            AgentState::Capturing => "capturing",
            AgentState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Coordinator-side view of an agent's reachability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteAgentState {
    Online,
    Offline,
    Capturing,
}

impl From<AgentState> for RemoteAgentState {
    fn from(state: AgentState) -> Self {
        match state {
            AgentState::Idle => RemoteAgentState::Online,
            AgentState::Capturing => RemoteAgentState::Capturing,
            AgentState::Error => RemoteAgentState::Offline,
        }
    }
}

/// Current status snapshot of a capture agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub status: AgentState,
    pub start_time: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub packets_captured: u64,
    #[serde(default)]
    pub packets_dropped: u64,
    pub interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_filter: Option<String>,
}

impl AgentStatus {
    pub fn new(name: String, interface: String) -> Self {
        let now = Utc::now();
        Self {
            name,
            status: AgentState::Idle,
            start_time: now,
            last_heartbeat: now,
            packets_captured: 0,
            packets_dropped: 0,
            interface,
            error: None,
            active_filter: None,
        }
    }
}

/// Registration payload an agent sends to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,
    pub url: String,
    pub interfaces: Vec<String>,
    pub interface_details: Vec<InterfaceDetail>,
    pub version: String,
    pub os: String,
    pub hostname: String,
}

/// Periodic liveness report an agent sends to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AgentState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets_captured: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_filter: Option<String>,
}

/// A capture agent as tracked by the coordinator registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAgent {
    pub name: String,
    pub url: String,
    pub status: RemoteAgentState,
    pub last_seen: DateTime<Utc>,
    pub interfaces: Vec<String>,
    pub interface_details: Vec<InterfaceDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_interface: Option<String>,
    pub version: String,
    pub os: String,
    pub hostname: String,
}

impl RemoteAgent {
    pub fn from_registration(reg: AgentRegistration, now: DateTime<Utc>) -> Self {
        Self {
            name: reg.name,
            url: reg.url,
            status: RemoteAgentState::Online,
            last_seen: now,
            interfaces: reg.interfaces,
            interface_details: reg.interface_details,
            active_interface: None,
            version: reg.version,
            os: reg.os,
            hostname: reg.hostname,
        }
    }
}

/// Body of a capture start request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
}

/// Body of a set-interface request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetInterfaceRequest {
    pub interface: String,
}
