use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;
use std::net::IpAddr;

/// Highest protocol layer the decoder recognized in a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "ARP")]
    Arp,
    #[serde(rename = "DNS")]
    Dns,
    #[serde(rename = "DHCP")]
    Dhcp,
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    Unknown,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Protocol::Arp => "ARP",
            Protocol::Dns => "DNS",
            Protocol::Dhcp => "DHCP",
            Protocol::Icmp => "ICMP",
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

/// Essential information extracted from one captured frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketInfo {
    /// Timestamp when the frame was captured
    pub timestamp: DateTime<Utc>,

    /// Source network address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<IpAddr>,

    /// Destination network address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<IpAddr>,

    /// Source port (for TCP/UDP)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_port: Option<u16>,

    /// Destination port (for TCP/UDP)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,

    /// Highest recognized protocol layer
    pub protocol: Protocol,

    /// On-wire length of the frame in bytes (not the captured length)
    pub length: u32,

    /// IPv4 TTL or IPv6 hop limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u8>,

    /// Whether this packet involves a gateway or crosses the local
    /// subnet boundary
    pub is_gateway_traffic: bool,

    /// The endpoint identified as gateway, when one matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<IpAddr>,

    /// DNS details, present iff protocol is DNS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_info: Option<DnsInfo>,

    /// DHCP details, present iff protocol is DHCP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_info: Option<DhcpInfo>,

    /// ARP details, present iff protocol is ARP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_info: Option<ArpInfo>,
}

impl PacketInfo {
    /// Create a record for a frame before any layer has been recognized.
    pub fn new(timestamp: DateTime<Utc>, length: u32) -> Self {
        Self {
            timestamp,
            source_ip: None,
            destination_ip: None,
            source_port: None,
            destination_port: None,
            protocol: Protocol::Unknown,
            length,
            ttl: None,
            is_gateway_traffic: false,
            gateway_ip: None,
            dns_info: None,
            dhcp_info: None,
            arp_info: None,
        }
    }

    /// One-line human-readable description used in summaries
    pub fn summary_line(&self) -> String {
        let src = self
            .source_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "?".to_string());
        let dst = self
            .destination_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "?".to_string());

        let mut summary = format!("{}: {} -> {}", self.protocol, src, dst);

        match self.protocol {
            Protocol::Dns => {
                if let Some(dns) = &self.dns_info {
                    if dns.is_query {
                        for q in &dns.queries {
                            summary.push_str(&format!(", Query: {}", q.name));
                        }
                    } else if dns.is_answer {
                        summary.push_str(", DNS response");
                    }
                }
            }
            Protocol::Dhcp => {
                if let Some(dhcp) = &self.dhcp_info {
                    if let Some(mt) = &dhcp.message_type {
                        summary.push_str(&format!(", Type: {}", mt));
                    }
                }
            }
            Protocol::Arp => {
                if let Some(arp) = &self.arp_info {
                    summary.push_str(&format!(", {}", arp.operation));
                }
            }
            _ => {}
        }

        summary
    }

    /// Lossy projection for streaming to subscribers
    pub fn to_summary(&self) -> PacketSummary {
        PacketSummary {
            timestamp: self.timestamp,
            source_ip: self
                .source_ip
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            destination_ip: self
                .destination_ip
                .map(|ip| ip.to_string())
                .unwrap_or_default(),
            protocol: self.protocol,
            length: self.length,
            is_gateway_traffic: self.is_gateway_traffic,
            summary: self.summary_line(),
        }
    }
}

/// Compact per-packet record streamed to WebSocket subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketSummary {
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub destination_ip: String,
    pub protocol: Protocol,
    pub length: u32,
    pub is_gateway_traffic: bool,
    pub summary: String,
}

/// ARP-specific details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArpInfo {
    /// REQUEST or REPLY
    pub operation: String,
    pub sender_mac: String,
    pub sender_ip: IpAddr,
    pub target_mac: String,
    pub target_ip: IpAddr,
    pub is_gratuitous: bool,
}

/// DNS-specific details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsInfo {
    pub is_query: bool,
    pub is_answer: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries: Vec<DnsQuery>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub answers: Vec<DnsAnswer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsQuery {
    pub name: String,
    pub record_type: String,
    pub class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsAnswer {
    pub name: String,
    pub record_type: String,
    pub class: String,
    pub ttl: u32,
    pub data: String,
}

/// DHCPv4-specific details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DhcpInfo {
    /// DISCOVER, OFFER, REQUEST, DECLINE, ACK, NAK, RELEASE or INFORM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub your_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_mac: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dns_servers: Vec<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_time: Option<u32>,
}
