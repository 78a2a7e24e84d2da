use ipnetwork::IpNetwork;
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Running gateway-detection state, owned by the decoder.
///
/// All sets are additive: entries are only ever added during a capture, and
/// the local subnet list is fixed at construction.
#[derive(Debug, Default)]
pub struct GatewayDetector {
    known_gateways: HashSet<IpAddr>,
    gateway_ip: Option<IpAddr>,
    gateway_mac: Option<String>,
    local_nets: Vec<IpNetwork>,
    dhcp_servers: HashSet<IpAddr>,
    dns_servers: HashSet<IpAddr>,
    arp_table: HashMap<IpAddr, String>,
}

impl GatewayDetector {
    /// Build a detector seeded with configured gateways, learning local
    /// subnets from host interface enumeration (loopback excluded).
    pub fn new(known_gateways: &[String]) -> Self {
        Self::with_local_networks(known_gateways, local_networks())
    }

    /// Build a detector with an explicit local subnet list.
    pub fn with_local_networks(known_gateways: &[String], local_nets: Vec<IpNetwork>) -> Self {
        let mut detector = Self {
            local_nets,
            ..Default::default()
        };

        for entry in known_gateways {
            match entry.parse::<IpAddr>() {
                Ok(ip) => {
                    detector.known_gateways.insert(ip);
                }
                Err(_) => warn!("Ignoring unparsable known gateway '{}'", entry),
            }
        }

        detector
    }

    /// Whether the address is a known gateway: in the known set, equal to
    /// the learned default gateway, or a known DHCP server.
    pub fn is_gateway(&self, ip: Option<IpAddr>) -> bool {
        let Some(ip) = ip else {
            return false;
        };
        self.known_gateways.contains(&ip)
            || self.gateway_ip == Some(ip)
            || self.dhcp_servers.contains(&ip)
    }

    /// Generic gateway classification: flagged when either endpoint is a
    /// known gateway, or when exactly one endpoint lies in a learned local
    /// subnet. Returns the matching gateway endpoint, when there is one.
    pub fn classify(&self, src: Option<IpAddr>, dst: Option<IpAddr>) -> (bool, Option<IpAddr>) {
        if self.is_gateway(src) {
            return (true, src);
        }
        if self.is_gateway(dst) {
            return (true, dst);
        }

        let src_local = src.map(|ip| self.is_local(ip)).unwrap_or(false);
        let dst_local = dst.map(|ip| self.is_local(ip)).unwrap_or(false);
        if src_local != dst_local {
            return (true, None);
        }

        (false, None)
    }

    fn is_local(&self, ip: IpAddr) -> bool {
        self.local_nets.iter().any(|net| net.contains(ip))
    }

    pub fn add_known_gateway(&mut self, ip: IpAddr) {
        if self.known_gateways.insert(ip) {
            debug!("Learned gateway {}", ip);
        }
    }

    pub fn set_default_gateway(&mut self, ip: IpAddr) {
        self.gateway_ip = Some(ip);
    }

    pub fn set_gateway_mac(&mut self, mac: String) {
        self.gateway_mac = Some(mac);
    }

    pub fn add_dhcp_server(&mut self, ip: IpAddr) {
        self.dhcp_servers.insert(ip);
    }

    pub fn add_dns_server(&mut self, ip: IpAddr) {
        self.dns_servers.insert(ip);
    }

    /// Record an IP-to-MAC binding learned from an ARP reply.
    pub fn record_arp(&mut self, ip: IpAddr, mac: String) {
        self.arp_table.insert(ip, mac);
    }

    pub fn default_gateway(&self) -> Option<IpAddr> {
        self.gateway_ip
    }

    pub fn gateway_mac(&self) -> Option<&str> {
        self.gateway_mac.as_deref()
    }

    pub fn known_gateway_count(&self) -> usize {
        self.known_gateways.len()
    }

    pub fn is_known_dns_server(&self, ip: IpAddr) -> bool {
        self.dns_servers.contains(&ip)
    }

    pub fn arp_entry(&self, ip: IpAddr) -> Option<&str> {
        self.arp_table.get(&ip).map(String::as_str)
    }
}

/// Local subnets of this host, loopback excluded, IPv4 and IPv6.
fn local_networks() -> Vec<IpNetwork> {
    pnet_datalink::interfaces()
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .filter(|net| !net.ip().is_loopback())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn lan() -> Vec<IpNetwork> {
        vec!["192.168.1.0/24".parse().unwrap()]
    }

    #[test]
    fn seeded_gateway_is_recognized() {
        let detector = GatewayDetector::with_local_networks(&["192.168.1.1".to_string()], lan());
        assert!(detector.is_gateway(Some(ip("192.168.1.1"))));
        assert!(!detector.is_gateway(Some(ip("192.168.1.2"))));
        assert!(!detector.is_gateway(None));
    }

    #[test]
    fn unparsable_seed_is_skipped() {
        let detector =
            GatewayDetector::with_local_networks(&["not-an-ip".to_string()], Vec::new());
        assert_eq!(detector.known_gateway_count(), 0);
    }

    #[test]
    fn dhcp_server_counts_as_gateway() {
        let mut detector = GatewayDetector::with_local_networks(&[], lan());
        detector.add_dhcp_server(ip("192.168.1.10"));
        assert!(detector.is_gateway(Some(ip("192.168.1.10"))));
    }

    #[test]
    fn dns_server_does_not_count_as_gateway() {
        let mut detector = GatewayDetector::with_local_networks(&[], Vec::new());
        detector.add_dns_server(ip("8.8.8.8"));
        assert!(!detector.is_gateway(Some(ip("8.8.8.8"))));
    }

    #[test]
    fn classify_matches_gateway_endpoint() {
        let detector = GatewayDetector::with_local_networks(&["192.168.1.1".to_string()], lan());
        let (flagged, gw) = detector.classify(Some(ip("192.168.1.1")), Some(ip("192.168.1.50")));
        assert!(flagged);
        assert_eq!(gw, Some(ip("192.168.1.1")));
    }

    #[test]
    fn classify_flags_local_to_external_crossing() {
        let detector = GatewayDetector::with_local_networks(&[], lan());
        let (flagged, gw) = detector.classify(Some(ip("192.168.1.50")), Some(ip("8.8.8.8")));
        assert!(flagged);
        assert_eq!(gw, None);
    }

    #[test]
    fn classify_ignores_local_to_local() {
        let detector = GatewayDetector::with_local_networks(&[], lan());
        let (flagged, _) = detector.classify(Some(ip("192.168.1.50")), Some(ip("192.168.1.60")));
        assert!(!flagged);
    }

    #[test]
    fn classify_ignores_external_to_external() {
        let detector = GatewayDetector::with_local_networks(&[], lan());
        let (flagged, _) = detector.classify(Some(ip("1.1.1.1")), Some(ip("8.8.8.8")));
        assert!(!flagged);
    }

    #[test]
    fn known_gateways_only_grow() {
        let mut detector = GatewayDetector::with_local_networks(&[], Vec::new());
        detector.add_known_gateway(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        detector.add_known_gateway(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        detector.add_known_gateway(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(detector.known_gateway_count(), 2);
    }

    #[test]
    fn arp_bindings_are_recorded() {
        let mut detector = GatewayDetector::with_local_networks(&[], Vec::new());
        detector.record_arp(ip("192.168.1.1"), "aa:bb:cc:dd:ee:ff".to_string());
        assert_eq!(
            detector.arp_entry(ip("192.168.1.1")),
            Some("aa:bb:cc:dd:ee:ff")
        );
    }
}
