//! Minimal DHCPv4 wire parsing, RFC 2131.
//!
//! Extracts only what gateway analysis needs: the fixed address fields,
//! the client hardware address and the raw option list.

use std::net::Ipv4Addr;

/// DHCP magic cookie: 0x63825363
const DHCP_MAGIC_COOKIE: [u8; 4] = [0x63, 0x82, 0x53, 0x63];

/// Fixed header size up to the magic cookie
const DHCP_FIXED_SIZE: usize = 236;

/// DHCP option codes relevant to gateway analysis
pub mod option_codes {
    pub const PAD: u8 = 0;
    pub const END: u8 = 255;
    pub const ROUTER: u8 = 3;
    pub const DNS: u8 = 6;
    pub const HOSTNAME: u8 = 12;
    pub const LEASE_TIME: u8 = 51;
    pub const MESSAGE_TYPE: u8 = 53;
    pub const SERVER_ID: u8 = 54;
}

/// A parsed DHCPv4 message
#[derive(Debug, Clone)]
pub struct DhcpMessage {
    /// Client address (ciaddr)
    pub client_ip: Ipv4Addr,
    /// Offered address (yiaddr)
    pub your_ip: Ipv4Addr,
    /// Next server address (siaddr)
    pub server_ip: Ipv4Addr,
    /// Client hardware address, first six chaddr bytes
    pub client_mac: [u8; 6],
    /// Options in wire order
    pub options: Vec<DhcpOption>,
}

#[derive(Debug, Clone)]
pub struct DhcpOption {
    pub code: u8,
    pub data: Vec<u8>,
}

impl DhcpMessage {
    /// First option with the given code.
    pub fn option(&self, code: u8) -> Option<&DhcpOption> {
        self.options.iter().find(|opt| opt.code == code)
    }
}

/// Human-readable name of a DHCP message-type option value.
pub fn message_type_name(value: u8) -> Option<&'static str> {
    match value {
        1 => Some("DISCOVER"),
        2 => Some("OFFER"),
        3 => Some("REQUEST"),
        4 => Some("DECLINE"),
        5 => Some("ACK"),
        6 => Some("NAK"),
        7 => Some("RELEASE"),
        8 => Some("INFORM"),
        _ => None,
    }
}

/// Parse a DHCPv4 message from a UDP payload.
///
/// Returns `None` when the payload is shorter than the fixed header or the
/// magic cookie is missing. Options whose declared length runs past the end
/// of the payload are skipped, not fatal.
pub fn parse(data: &[u8]) -> Option<DhcpMessage> {
    if data.len() < DHCP_FIXED_SIZE + 4 {
        return None;
    }
    if data[236..240] != DHCP_MAGIC_COOKIE {
        return None;
    }

    let client_ip = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let your_ip = Ipv4Addr::new(data[16], data[17], data[18], data[19]);
    let server_ip = Ipv4Addr::new(data[20], data[21], data[22], data[23]);

    let mut client_mac = [0u8; 6];
    client_mac.copy_from_slice(&data[28..34]);

    Some(DhcpMessage {
        client_ip,
        your_ip,
        server_ip,
        client_mac,
        options: parse_options(&data[240..]),
    })
}

fn parse_options(data: &[u8]) -> Vec<DhcpOption> {
    let mut options = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let code = data[offset];

        if code == option_codes::PAD {
            offset += 1;
            continue;
        }
        if code == option_codes::END {
            break;
        }

        // Length byte missing: nothing more to recover
        if offset + 1 >= data.len() {
            break;
        }

        let len = data[offset + 1] as usize;
        if offset + 2 + len > data.len() {
            // Truncated option, skip the rest of the walk
            break;
        }

        options.push(DhcpOption {
            code,
            data: data[offset + 2..offset + 2 + len].to_vec(),
        });
        offset += 2 + len;
    }

    options
}

/// Format a hardware address the way capture tooling prints it.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
