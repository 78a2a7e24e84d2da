use serde::{Deserialize, Serialize};
use std::path::Path;

/// Detailed information about a host network interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDetail {
    /// Device system name (used for capture operations)
    pub name: String,

    /// MAC address, when the interface has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// Assigned addresses in CIDR notation
    pub ips: Vec<String>,

    /// Whether this is an OS-level software bridge
    pub is_bridge: bool,

    /// Member ports when the interface is a bridge
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bridge_ports: Vec<String>,

    /// Interface flags summary (up, loopback, broadcast, multicast)
    pub flags: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

/// Whether the named interface is a Linux software bridge.
pub fn is_bridge_interface(name: &str) -> bool {
    Path::new(&format!("/sys/class/net/{}/bridge", name)).exists()
}

/// Member ports of a bridge interface, empty for non-bridges.
pub fn bridge_ports(name: &str) -> Vec<String> {
    let brif = format!("/sys/class/net/{}/brif", name);
    match std::fs::read_dir(brif) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn interface_mtu(name: &str) -> Option<u32> {
    std::fs::read_to_string(format!("/sys/class/net/{}/mtu", name))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn flags_string(iface: &pnet_datalink::NetworkInterface) -> String {
    let mut flags = Vec::new();
    if iface.is_up() {
        flags.push("up");
    }
    if iface.is_loopback() {
        flags.push("loopback");
    }
    if iface.is_broadcast() {
        flags.push("broadcast");
    }
    if iface.is_multicast() {
        flags.push("multicast");
    }
    flags.join("|")
}

/// Enumerate non-loopback, active host interfaces with their details.
pub fn collect_interface_details() -> Vec<InterfaceDetail> {
    pnet_datalink::interfaces()
        .into_iter()
        .filter(|iface| !iface.is_loopback() && iface.is_up())
        .map(|iface| {
            let is_bridge = is_bridge_interface(&iface.name);
            InterfaceDetail {
                mac: iface.mac.map(|mac| mac.to_string()),
                ips: iface.ips.iter().map(|ip| ip.to_string()).collect(),
                is_bridge,
                bridge_ports: if is_bridge {
                    bridge_ports(&iface.name)
                } else {
                    Vec::new()
                },
                flags: flags_string(&iface),
                mtu: interface_mtu(&iface.name),
                name: iface.name,
            }
        })
        .collect()
}

/// Names of all host interfaces, loopback included.
pub fn interface_names() -> Vec<String> {
    pnet_datalink::interfaces()
        .into_iter()
        .map(|iface| iface.name)
        .collect()
}

/// Whether an interface with the given name exists on this host.
pub fn interface_exists(name: &str) -> bool {
    pnet_datalink::interfaces()
        .iter()
        .any(|iface| iface.name == name)
}
