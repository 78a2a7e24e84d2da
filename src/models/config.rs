use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// System-wide configuration location for the agent
const ETC_CONFIG_PATH: &str = "/etc/gatewatch/agent.json";

/// Name of the marker file recording the last successful config path
const LAST_PATH_FILE: &str = "last_config_path";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub gateway: GatewayConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            capture: CaptureConfig::default(),
            gateway: GatewayConfig::default(),
            agent: None,
        }
    }
}

/// HTTP server configuration for the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Capture source configuration, immutable for one capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Interface to open for live capture
    pub interface: String,

    /// Promiscuous mode (forced on for bridge interfaces)
    pub promisc_mode: bool,

    /// Maximum bytes captured per frame
    pub snap_len: i32,

    /// BPF filter expression, empty for none
    pub filter: String,

    /// Kernel capture buffer size in bytes
    pub buffer_size: i32,

    /// Start a live capture at coordinator startup
    pub enable_live: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            promisc_mode: true,
            snap_len: 65535,
            filter: String::new(),
            buffer_size: 2 * 1024 * 1024,
            enable_live: false,
        }
    }
}

/// Gateway-detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub detect_gateways: bool,
    pub known_gateways: Vec<String>,
    pub track_nat: bool,
    pub track_dns: bool,
    pub track_dhcp: bool,
    pub track_arp: bool,
    pub detect_port_forwarding: bool,
    pub detect_dmz: bool,
    pub detect_upnp: bool,
    pub enable_alerts: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            detect_gateways: true,
            known_gateways: Vec::new(),
            track_nat: true,
            track_dns: true,
            track_dhcp: true,
            track_arp: true,
            detect_port_forwarding: true,
            detect_dmz: true,
            detect_upnp: true,
            enable_alerts: true,
        }
    }
}

/// Remote-agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Address and port the agent control plane listens on
    pub listen: String,

    /// Coordinator base URL for registration and heartbeats
    pub server_url: String,

    /// Interface used for capture when a request names none
    pub interface: String,

    /// Agent name, the registry's primary key
    pub name: String,

    /// Optional API key sent as X-API-Key
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8090".to_string(),
            server_url: "http://localhost:8080".to_string(),
            interface: String::new(),
            name: String::new(),
            api_key: String::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, filling gaps with defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        let data = fs::read_to_string(path)?;
        let config = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON to the given path.
    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Persist the configuration, trying each candidate path in order.
    ///
    /// The first writable path wins; it is recorded next to the executable
    /// so the next startup finds the same file. Newly created files get
    /// mode 0664.
    pub fn save_with_fallback(
        &self,
        cli_path: Option<&Path>,
        exec_dir: &Path,
    ) -> AppResult<PathBuf> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = cli_path {
            candidates.push(path.to_path_buf());
        }
        candidates.extend(candidate_config_paths(exec_dir));
        candidates.push(std::env::temp_dir().join("gatewatch").join("agent.json"));

        let mut last_err: Option<AppError> = None;
        for path in candidates {
            let existed = path.exists();
            match self.save_to(&path) {
                Ok(()) => {
                    info!("Configuration saved to {}", path.display());
                    if !existed {
                        set_config_file_mode(&path);
                    }
                    record_last_config_path(exec_dir, &path);
                    return Ok(path);
                }
                Err(err) => {
                    warn!("Could not save configuration to {}: {}", path.display(), err);
                    last_err = Some(err);
                }
            }
        }

        Err(AppError::ConfigSave(format!(
            "no writable configuration path: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}

#[cfg(unix)]
fn set_config_file_mode(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(0o664)) {
        warn!("Could not set permissions on {}: {}", path.display(), err);
    }
}

#[cfg(not(unix))]
fn set_config_file_mode(_path: &Path) {}

/// Fixed candidate locations for the agent configuration file, in
/// resolution order.
pub fn candidate_config_paths(exec_dir: &Path) -> Vec<PathBuf> {
    vec![
        exec_dir.join("configs").join("agent.json"),
        PathBuf::from(ETC_CONFIG_PATH),
        exec_dir.join("agent.json"),
    ]
}

/// Resolve the configuration file to load at startup.
///
/// Tried in order: the `--config` flag, the recorded last successful path,
/// then the fixed candidate locations. Returns `None` when nothing exists,
/// in which case defaults apply.
pub fn resolve_config_path(cli_path: Option<PathBuf>, exec_dir: &Path) -> Option<PathBuf> {
    if let Some(path) = cli_path {
        return Some(path);
    }

    if let Some(saved) = read_last_config_path(exec_dir) {
        if saved.exists() {
            info!("Using recorded configuration path: {}", saved.display());
            return Some(saved);
        }
    }

    candidate_config_paths(exec_dir)
        .into_iter()
        .find(|path| path.exists())
}

/// Directory containing the running executable, falling back to the
/// current directory.
pub fn executable_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn read_last_config_path(exec_dir: &Path) -> Option<PathBuf> {
    let marker = exec_dir.join(LAST_PATH_FILE);
    fs::read_to_string(marker)
        .ok()
        .map(|s| PathBuf::from(s.trim()))
}

fn record_last_config_path(exec_dir: &Path, config_path: &Path) {
    let marker = exec_dir.join(LAST_PATH_FILE);
    if let Err(err) = fs::write(&marker, config_path.to_string_lossy().as_bytes()) {
        warn!("Could not record configuration path: {}", err);
    }
}
