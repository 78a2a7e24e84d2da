use log::{debug, info, warn};
use std::net::{IpAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::agent::runtime::CaptureAgent;
use crate::models::agent::{AgentRegistration, HeartbeatRequest};
use crate::models::config::AgentConfig;
use crate::models::interface::collect_interface_details;
use crate::utils::error::{AppError, AppResult};

/// Timeout for the registration call
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single heartbeat
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between heartbeats
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Grace period before the automatic registration attempt at startup
const AUTO_REGISTER_DELAY: Duration = Duration::from_secs(2);

/// Split a listen address into host and port. A missing port defaults to
/// 8090, a missing host to the unspecified address.
pub fn parse_listen_address(addr: &str) -> (String, u16) {
    let Some(idx) = addr.rfind(':') else {
        return (addr.to_string(), 8090);
    };

    let host = addr[..idx].trim_matches(|c| c == '[' || c == ']');
    let port = addr[idx + 1..].parse().unwrap_or(8090);

    let host = if host.is_empty() {
        "0.0.0.0".to_string()
    } else {
        host.to_string()
    };
    (host, port)
}

fn is_unspecified_host(host: &str) -> bool {
    host.is_empty() || host == "0.0.0.0" || host == "::"
}

/// Local address the kernel picks for traffic toward the destination.
/// The socket is connected but nothing is sent.
fn outbound_ip(destination: &str) -> Option<IpAddr> {
    let target = if destination.parse::<IpAddr>().is_err() && !destination.contains('.') {
        // Not routable as given, probe via a public address instead
        "8.8.8.8:80".to_string()
    } else if !destination.contains(':') {
        format!("{}:80", destination)
    } else {
        destination.to_string()
    };

    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(target).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

fn first_non_loopback_ipv4() -> Option<IpAddr> {
    pnet_datalink::interfaces()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .map(|net| net.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())
}

/// The IP an agent should advertise as reachable.
///
/// A concrete listen host is used as-is; for an unspecified bind the
/// outbound route toward the coordinator decides, then the first
/// non-loopback IPv4, then loopback as a last resort.
pub fn resolve_advertised_ip(listen_host: &str, server_url: &str) -> String {
    if !is_unspecified_host(listen_host) {
        return listen_host.to_string();
    }

    let coordinator_host = reqwest::Url::parse(server_url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_string));

    if let Some(host) = coordinator_host {
        if let Some(ip) = outbound_ip(&host) {
            return ip.to_string();
        }
        warn!("Could not determine outbound address toward {}", host);
    }

    first_non_loopback_ipv4()
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Collect everything the coordinator needs to know about this agent.
pub fn build_registration(config: &AgentConfig) -> AgentRegistration {
    let interface_details = collect_interface_details();
    let interfaces = interface_details
        .iter()
        .map(|detail| detail.name.clone())
        .collect();

    let hostname = sys_info::hostname().unwrap_or_else(|_| config.name.clone());

    let (host, port) = parse_listen_address(&config.listen);
    let ip = resolve_advertised_ip(&host, &config.server_url);

    AgentRegistration {
        name: config.name.clone(),
        url: format!("http://{}:{}", ip, port),
        interfaces,
        interface_details,
        version: env!("CARGO_PKG_VERSION").to_string(),
        os: std::env::consts::OS.to_string(),
        hostname,
    }
}

impl CaptureAgent {
    /// Register with the coordinator. Success clears a previous error
    /// state; failure enters it.
    pub async fn register(&self) -> AppResult<()> {
        let config = self.agent_config();
        if config.server_url.is_empty() {
            return Err(AppError::Registration(
                "Coordinator URL is not configured".to_string(),
            ));
        }

        let registration = build_registration(&config);
        let url = format!("{}/api/agents/register", config.server_url);
        info!("Sending registration to {} as '{}'", url, registration.name);

        let mut request = self
            .http
            .post(&url)
            .json(&registration)
            .timeout(REGISTER_TIMEOUT);
        if !config.api_key.is_empty() {
            request = request.header("X-API-Key", &config.api_key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!("Registered with coordinator {}", config.server_url);
                self.clear_error_state();
                Ok(())
            }
            Ok(response) => {
                let message = format!("coordinator answered with status {}", response.status());
                self.enter_error_state(message.clone());
                Err(AppError::Registration(message))
            }
            Err(err) => {
                let message = format!("connection to coordinator failed: {}", err);
                self.enter_error_state(message.clone());
                Err(AppError::Registration(message))
            }
        }
    }

    /// Remove this agent from the coordinator registry.
    pub async fn unregister(&self) -> AppResult<()> {
        let config = self.agent_config();
        if config.server_url.is_empty() {
            return Ok(());
        }

        let url = format!("{}/api/agents/unregister", config.server_url);
        let mut request = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "name": config.name }))
            .timeout(REGISTER_TIMEOUT);
        if !config.api_key.is_empty() {
            request = request.header("X-API-Key", &config.api_key);
        }

        request.send().await?.error_for_status()?;
        info!("Unregistered from coordinator {}", config.server_url);
        Ok(())
    }

    /// Report liveness every 30 seconds. Transport errors are logged and
    /// retried on the next tick, never fatal.
    pub async fn heartbeat_loop(self: Arc<Self>) {
        let mut ticker = interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // the immediate tick carries no information

        loop {
            ticker.tick().await;
            self.touch_heartbeat();

            let config = self.agent_config();
            let status = self.status_snapshot();

            if config.server_url.is_empty() {
                debug!(
                    "Heartbeat: agent {} is alive ({} packets, no coordinator configured)",
                    status.name, status.packets_captured
                );
                continue;
            }

            let heartbeat = HeartbeatRequest {
                name: config.name.clone(),
                status: Some(status.status),
                packets_captured: Some(status.packets_captured),
                interface: Some(status.interface.clone()),
                active_filter: status.active_filter.clone(),
            };

            let url = format!("{}/api/agents/heartbeat", config.server_url);
            let mut request = self.http.post(&url).json(&heartbeat).timeout(HEARTBEAT_TIMEOUT);
            if !config.api_key.is_empty() {
                request = request.header("X-API-Key", &config.api_key);
            }

            match request.send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(
                        "Heartbeat: agent {} reported {} packets",
                        status.name, status.packets_captured
                    );
                }
                Ok(response) => {
                    warn!("Heartbeat not accepted, status {}", response.status());
                }
                Err(err) => {
                    warn!("Heartbeat failed: {}", err);
                }
            }
        }
    }

    /// Launch the heartbeat loop and, when a coordinator is configured,
    /// the delayed automatic registration.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        tokio::spawn(self.clone().heartbeat_loop());

        let config = self.agent_config();
        if config.server_url.is_empty() {
            info!("No coordinator URL configured; running standalone");
            return;
        }

        let agent = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(AUTO_REGISTER_DELAY).await;
            if let Err(err) = agent.register().await {
                warn!("Automatic registration failed: {}", err);
                warn!("The agent keeps running; register manually via the admin surface.");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_address_with_host_and_port() {
        assert_eq!(
            parse_listen_address("10.1.2.3:9000"),
            ("10.1.2.3".to_string(), 9000)
        );
    }

    #[test]
    fn listen_address_without_host_defaults_to_unspecified() {
        assert_eq!(parse_listen_address(":8090"), ("0.0.0.0".to_string(), 8090));
    }

    #[test]
    fn listen_address_without_port_defaults_to_8090() {
        assert_eq!(
            parse_listen_address("192.168.1.9"),
            ("192.168.1.9".to_string(), 8090)
        );
    }

    #[test]
    fn listen_address_ipv6_brackets_are_stripped() {
        assert_eq!(parse_listen_address("[::]:8090"), ("::".to_string(), 8090));
    }

    #[test]
    fn concrete_listen_host_is_advertised_unchanged() {
        assert_eq!(
            resolve_advertised_ip("192.168.5.5", "http://10.0.0.5:8080"),
            "192.168.5.5"
        );
    }

    #[test]
    fn unspecified_host_resolves_via_outbound_route() {
        // Toward loopback the kernel always selects a loopback source
        let ip = resolve_advertised_ip("0.0.0.0", "http://127.0.0.1:8080");
        assert_eq!(ip, "127.0.0.1");
    }

    #[test]
    fn outbound_probe_handles_bare_ip_destination() {
        let ip = outbound_ip("127.0.0.1").unwrap();
        assert!(ip.is_loopback());
    }

    #[test]
    fn registration_url_uses_listen_port() {
        let config = AgentConfig {
            listen: "192.0.2.7:8099".to_string(),
            server_url: "http://10.0.0.5:8080".to_string(),
            name: "alpha".to_string(),
            ..Default::default()
        };

        let registration = build_registration(&config);
        assert_eq!(registration.url, "http://192.0.2.7:8099");
        assert_eq!(registration.name, "alpha");
        assert_eq!(registration.os, std::env::consts::OS);
        assert!(!registration.version.is_empty());
    }
}
