use log::debug;
use pnet::packet::{
    arp::{ArpOperations, ArpPacket},
    ethernet::{EtherTypes, EthernetPacket},
    icmp::IcmpPacket,
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
    Packet as PnetPacket,
};
use std::net::IpAddr;

use crate::capture::dhcp::{self, option_codes};
use crate::capture::gateway::GatewayDetector;
use crate::capture::source::RawFrame;
use crate::models::config::GatewayConfig;
use crate::models::packet::{
    ArpInfo, DhcpInfo, DnsAnswer, DnsInfo, DnsQuery, PacketInfo, Protocol,
};
use crate::utils::error::{AppError, AppResult};

/// Decodes raw frames into `PacketInfo` records while maintaining the
/// running gateway-detection state.
///
/// The detector state lives as long as the decoder; learned gateways
/// survive across capture sessions of one agent process.
pub struct PacketDecoder {
    detect_gateways: bool,
    detector: GatewayDetector,
}

impl PacketDecoder {
    pub fn new(gateway_config: &GatewayConfig) -> Self {
        Self {
            detect_gateways: gateway_config.detect_gateways,
            detector: GatewayDetector::new(&gateway_config.known_gateways),
        }
    }

    /// Build a decoder around an existing detector (used by tests to pin
    /// the local subnet list).
    pub fn with_detector(gateway_config: &GatewayConfig, detector: GatewayDetector) -> Self {
        Self {
            detect_gateways: gateway_config.detect_gateways,
            detector,
        }
    }

    pub fn detector(&self) -> &GatewayDetector {
        &self.detector
    }

    /// Decode one frame. Produces exactly one record per frame; higher
    /// layers that fail to parse downgrade the protocol label instead of
    /// erroring. Only an unparseable link layer is an error.
    pub fn analyze(&mut self, frame: &RawFrame) -> AppResult<PacketInfo> {
        let mut info = PacketInfo::new(frame.timestamp, frame.wire_length);

        let eth = EthernetPacket::new(&frame.data)
            .ok_or_else(|| AppError::Decode("truncated Ethernet frame".to_string()))?;

        match eth.get_ethertype() {
            EtherTypes::Arp => {
                if let Some(arp) = ArpPacket::new(eth.payload()) {
                    self.decode_arp(&arp, &mut info);
                }
                return Ok(info);
            }
            EtherTypes::Ipv4 => {
                let Some(ipv4) = Ipv4Packet::new(eth.payload()) else {
                    return Ok(info);
                };
                info.source_ip = Some(IpAddr::V4(ipv4.get_source()));
                info.destination_ip = Some(IpAddr::V4(ipv4.get_destination()));
                info.ttl = Some(ipv4.get_ttl());

                if ipv4.get_next_level_protocol() == IpNextHeaderProtocols::Icmp {
                    if IcmpPacket::new(ipv4.payload()).is_some() {
                        info.protocol = Protocol::Icmp;
                        self.apply_gateway_classification(&mut info);
                        return Ok(info);
                    }
                }

                // A non-first fragment carries no transport header
                if ipv4.get_fragment_offset() == 0 {
                    if self.decode_transport(
                        ipv4.get_next_level_protocol(),
                        ipv4.payload(),
                        &mut info,
                    ) {
                        return Ok(info);
                    }
                }
            }
            EtherTypes::Ipv6 => {
                let Some(ipv6) = Ipv6Packet::new(eth.payload()) else {
                    return Ok(info);
                };
                info.source_ip = Some(IpAddr::V6(ipv6.get_source()));
                info.destination_ip = Some(IpAddr::V6(ipv6.get_destination()));
                info.ttl = Some(ipv6.get_hop_limit());

                if self.decode_transport(ipv6.get_next_header(), ipv6.payload(), &mut info) {
                    return Ok(info);
                }
            }
            other => {
                debug!("Unhandled EtherType {:?}", other);
                return Ok(info);
            }
        }

        self.apply_gateway_classification(&mut info);
        Ok(info)
    }

    /// Decode the transport layer and, over UDP, the well-known-port
    /// application layers. Returns true when an application sub-rule fired
    /// and classification is already done.
    fn decode_transport(
        &mut self,
        protocol: IpNextHeaderProtocol,
        payload: &[u8],
        info: &mut PacketInfo,
    ) -> bool {
        match protocol {
            IpNextHeaderProtocols::Tcp => {
                if let Some(tcp) = TcpPacket::new(payload) {
                    info.protocol = Protocol::Tcp;
                    info.source_port = Some(tcp.get_source());
                    info.destination_port = Some(tcp.get_destination());
                }
                false
            }
            IpNextHeaderProtocols::Udp => {
                let Some(udp) = UdpPacket::new(payload) else {
                    return false;
                };
                info.protocol = Protocol::Udp;
                let sport = udp.get_source();
                let dport = udp.get_destination();
                info.source_port = Some(sport);
                info.destination_port = Some(dport);

                if sport == 53 || dport == 53 {
                    if let Ok(dns) = dns_parser::Packet::parse(udp.payload()) {
                        self.decode_dns(&dns, info);
                        return true;
                    }
                }

                if (sport == 67 && dport == 68) || (sport == 68 && dport == 67) {
                    if let Some(msg) = dhcp::parse(udp.payload()) {
                        self.decode_dhcp(&msg, info);
                        return true;
                    }
                }

                false
            }
            _ => false,
        }
    }

    fn decode_arp(&mut self, arp: &ArpPacket, info: &mut PacketInfo) {
        info.protocol = Protocol::Arp;

        let sender_ip = IpAddr::V4(arp.get_sender_proto_addr());
        let target_ip = IpAddr::V4(arp.get_target_proto_addr());
        let sender_mac = arp.get_sender_hw_addr().to_string();
        let target_mac = arp.get_target_hw_addr().to_string();

        info.source_ip = Some(sender_ip);
        info.destination_ip = Some(target_ip);

        let operation = match arp.get_operation() {
            ArpOperations::Request => "REQUEST",
            ArpOperations::Reply => "REPLY",
            _ => "UNKNOWN",
        };

        if arp.get_operation() == ArpOperations::Reply {
            self.detector.record_arp(sender_ip, sender_mac.clone());

            if self.detector.is_gateway(Some(sender_ip)) {
                self.detector.set_default_gateway(sender_ip);
                self.detector.set_gateway_mac(sender_mac.clone());
            }
        }

        info.is_gateway_traffic = self.detector.is_gateway(Some(sender_ip))
            || self.detector.is_gateway(Some(target_ip));
        if info.is_gateway_traffic {
            if self.detector.is_gateway(Some(sender_ip)) {
                info.gateway_ip = Some(sender_ip);
            } else {
                info.gateway_ip = Some(target_ip);
            }
        }

        info.arp_info = Some(ArpInfo {
            operation: operation.to_string(),
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
            is_gratuitous: sender_ip == target_ip,
        });
    }

    fn decode_dns(&mut self, dns: &dns_parser::Packet, info: &mut PacketInfo) {
        info.protocol = Protocol::Dns;

        let is_answer = !dns.header.query;
        if is_answer {
            // The responder is a DNS server
            if let Some(src) = info.source_ip {
                self.detector.add_dns_server(src);
            }
        }

        let queries = dns
            .questions
            .iter()
            .map(|q| DnsQuery {
                name: q.qname.to_string(),
                record_type: format!("{:?}", q.qtype),
                class: format!("{:?}", q.qclass),
            })
            .collect();

        let answers = dns
            .answers
            .iter()
            .map(|a| {
                let (record_type, data) = render_rdata(&a.data);
                DnsAnswer {
                    name: a.name.to_string(),
                    record_type,
                    class: format!("{:?}", a.cls),
                    ttl: a.ttl,
                    data,
                }
            })
            .collect();

        info.dns_info = Some(DnsInfo {
            is_query: !is_answer,
            is_answer,
            queries,
            answers,
        });

        self.apply_gateway_classification(info);
    }

    fn decode_dhcp(&mut self, msg: &dhcp::DhcpMessage, info: &mut PacketInfo) {
        info.protocol = Protocol::Dhcp;

        let mut details = DhcpInfo {
            client_ip: non_zero(msg.client_ip),
            your_ip: non_zero(msg.your_ip),
            server_ip: non_zero(msg.server_ip),
            client_mac: Some(dhcp::format_mac(&msg.client_mac)),
            ..Default::default()
        };

        for option in &msg.options {
            match option.code {
                option_codes::MESSAGE_TYPE => {
                    if let Some(&value) = option.data.first() {
                        details.message_type =
                            dhcp::message_type_name(value).map(str::to_string);
                    }
                }
                option_codes::ROUTER => {
                    if option.data.len() >= 4 {
                        let gw = IpAddr::from([
                            option.data[0],
                            option.data[1],
                            option.data[2],
                            option.data[3],
                        ]);
                        details.gateway_ip = Some(gw);

                        if self.detect_gateways {
                            self.detector.add_known_gateway(gw);
                            self.detector.set_default_gateway(gw);
                        }
                    }
                }
                option_codes::SERVER_ID => {
                    if option.data.len() >= 4 {
                        self.detector.add_dhcp_server(IpAddr::from([
                            option.data[0],
                            option.data[1],
                            option.data[2],
                            option.data[3],
                        ]));
                    }
                }
                option_codes::DNS => {
                    for chunk in option.data.chunks_exact(4) {
                        let server = IpAddr::from([chunk[0], chunk[1], chunk[2], chunk[3]]);
                        details.dns_servers.push(server);
                        self.detector.add_dns_server(server);
                    }
                }
                option_codes::LEASE_TIME => {
                    if option.data.len() >= 4 {
                        details.lease_time = Some(u32::from_be_bytes([
                            option.data[0],
                            option.data[1],
                            option.data[2],
                            option.data[3],
                        ]));
                    }
                }
                option_codes::HOSTNAME => {
                    details.server_hostname =
                        Some(String::from_utf8_lossy(&option.data).into_owned());
                }
                _ => {}
            }
        }

        // The DHCP server itself is a gateway candidate
        if self.detect_gateways {
            if let Some(server_ip) = details.server_ip {
                self.detector.add_known_gateway(server_ip);
            }
        }

        // DHCP is always gateway-relevant
        info.is_gateway_traffic = true;
        info.gateway_ip = details.gateway_ip.or_else(|| {
            if self.detector.is_gateway(info.source_ip) {
                info.source_ip
            } else if self.detector.is_gateway(info.destination_ip) {
                info.destination_ip
            } else {
                None
            }
        });

        info.dhcp_info = Some(details);
    }

    fn apply_gateway_classification(&self, info: &mut PacketInfo) {
        let (flagged, gateway_ip) = self
            .detector
            .classify(info.source_ip, info.destination_ip);
        info.is_gateway_traffic = flagged;
        info.gateway_ip = gateway_ip;
    }
}

fn non_zero(ip: std::net::Ipv4Addr) -> Option<IpAddr> {
    if ip.is_unspecified() {
        None
    } else {
        Some(IpAddr::V4(ip))
    }
}

fn render_rdata(rdata: &dns_parser::RData) -> (String, String) {
    use dns_parser::RData;

    match rdata {
        RData::A(a) => ("A".to_string(), a.0.to_string()),
        RData::AAAA(a) => ("AAAA".to_string(), a.0.to_string()),
        RData::MX(mx) => (
            "MX".to_string(),
            format!("{} {}", mx.preference, mx.exchange),
        ),
        RData::NS(ns) => ("NS".to_string(), ns.0.to_string()),
        RData::CNAME(cname) => ("CNAME".to_string(), cname.0.to_string()),
        RData::PTR(ptr) => ("PTR".to_string(), ptr.0.to_string()),
        RData::TXT(txt) => (
            "TXT".to_string(),
            txt.iter()
                .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                .collect::<Vec<_>>()
                .join(" "),
        ),
        RData::SOA(_) => ("SOA".to_string(), "Unsupported record type".to_string()),
        RData::SRV(_) => ("SRV".to_string(), "Unsupported record type".to_string()),
        _ => (
            "Unknown".to_string(),
            "Unsupported record type".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ipnetwork::IpNetwork;
    use pnet::packet::arp::{ArpHardwareTypes, MutableArpPacket};
    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::tcp::MutableTcpPacket;
    use pnet::packet::udp::MutableUdpPacket;
    use pnet::util::MacAddr;
    use std::net::Ipv4Addr;

    fn lan() -> Vec<IpNetwork> {
        vec!["192.168.1.0/24".parse().unwrap()]
    }

    fn decoder_with_nets(known: &[&str], nets: Vec<IpNetwork>) -> PacketDecoder {
        let config = GatewayConfig {
            known_gateways: known.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let detector = GatewayDetector::with_local_networks(&config.known_gateways, nets);
        PacketDecoder::with_detector(&config, detector)
    }

    fn frame(data: Vec<u8>) -> RawFrame {
        let wire_length = data.len() as u32;
        RawFrame {
            data,
            timestamp: Utc::now(),
            wire_length,
        }
    }

    fn ethernet_frame(ethertype: pnet::packet::ethernet::EtherType, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 14 + payload.len()];
        let mut eth = MutableEthernetPacket::new(&mut buf).unwrap();
        eth.set_destination(MacAddr::broadcast());
        eth.set_source(MacAddr::new(0xde, 0xad, 0x00, 0x00, 0x00, 0x01));
        eth.set_ethertype(ethertype);
        eth.set_payload(payload);
        buf
    }

    fn ipv4_frame(
        src: Ipv4Addr,
        dst: Ipv4Addr,
        protocol: IpNextHeaderProtocol,
        payload: &[u8],
        fragment_offset: u16,
    ) -> Vec<u8> {
        let total = 20 + payload.len();
        let mut buf = vec![0u8; total];
        let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total as u16);
        ip.set_ttl(64);
        ip.set_fragment_offset(fragment_offset);
        ip.set_next_level_protocol(protocol);
        ip.set_source(src);
        ip.set_destination(dst);
        ip.set_payload(payload);
        ethernet_frame(EtherTypes::Ipv4, &buf)
    }

    fn udp_frame(
        src: Ipv4Addr,
        sport: u16,
        dst: Ipv4Addr,
        dport: u16,
        payload: &[u8],
    ) -> Vec<u8> {
        let udp_len = 8 + payload.len();
        let mut buf = vec![0u8; udp_len];
        let mut udp = MutableUdpPacket::new(&mut buf).unwrap();
        udp.set_source(sport);
        udp.set_destination(dport);
        udp.set_length(udp_len as u16);
        udp.set_payload(payload);
        ipv4_frame(src, dst, IpNextHeaderProtocols::Udp, &buf, 0)
    }

    fn arp_frame(
        operation: pnet::packet::arp::ArpOperation,
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    ) -> Vec<u8> {
        let mut buf = vec![0u8; 28];
        let mut arp = MutableArpPacket::new(&mut buf).unwrap();
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(operation);
        arp.set_sender_hw_addr(sender_mac);
        arp.set_sender_proto_addr(sender_ip);
        arp.set_target_hw_addr(MacAddr::zero());
        arp.set_target_proto_addr(target_ip);
        ethernet_frame(EtherTypes::Arp, &buf)
    }

    /// UDP payload of a DHCP ACK from 192.168.1.1 with router, DNS and
    /// lease-time options
    fn dhcp_ack_payload() -> Vec<u8> {
        let mut payload = vec![0u8; 240];
        payload[0] = 2; // BOOTREPLY
        payload[1] = 1;
        payload[2] = 6;
        payload[16..20].copy_from_slice(&[192, 168, 1, 50]); // yiaddr
        payload[28..34].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);
        payload[236..240].copy_from_slice(&[0x63, 0x82, 0x53, 0x63]);
        // option 53: ACK
        payload.extend_from_slice(&[53, 1, 5]);
        // option 3: router 192.168.1.1
        payload.extend_from_slice(&[3, 4, 192, 168, 1, 1]);
        // option 6: DNS 8.8.8.8, 1.1.1.1
        payload.extend_from_slice(&[6, 8, 8, 8, 8, 8, 1, 1, 1, 1]);
        // option 51: lease 3600s
        payload.extend_from_slice(&[51, 4, 0, 0, 14, 16]);
        payload.push(255);
        payload
    }

    fn dns_query_payload(name: &[u8]) -> Vec<u8> {
        let mut payload = vec![
            0x12, 0x34, // id
            0x01, 0x00, // standard query, RD
            0x00, 0x01, // 1 question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        payload.extend_from_slice(name);
        payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
        payload
    }

    fn example_com() -> Vec<u8> {
        let mut name = vec![7u8];
        name.extend_from_slice(b"example");
        name.push(3);
        name.extend_from_slice(b"com");
        name.push(0);
        name
    }

    #[test]
    fn dhcp_ack_from_router_is_fully_decoded() {
        let mut decoder = decoder_with_nets(&[], lan());
        let data = udp_frame(
            Ipv4Addr::new(192, 168, 1, 1),
            67,
            Ipv4Addr::new(255, 255, 255, 255),
            68,
            &dhcp_ack_payload(),
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        assert_eq!(info.protocol, Protocol::Dhcp);
        assert!(info.is_gateway_traffic);
        assert_eq!(info.gateway_ip, Some("192.168.1.1".parse().unwrap()));

        let details = info.dhcp_info.as_ref().unwrap();
        assert_eq!(details.message_type.as_deref(), Some("ACK"));
        assert_eq!(details.lease_time, Some(3600));
        assert_eq!(
            details.dns_servers,
            vec![
                "8.8.8.8".parse::<IpAddr>().unwrap(),
                "1.1.1.1".parse::<IpAddr>().unwrap()
            ]
        );
        assert_eq!(details.your_ip, Some("192.168.1.50".parse().unwrap()));
        assert_eq!(details.client_mac.as_deref(), Some("de:ad:be:ef:00:01"));

        // Side effects on the detector
        assert!(decoder.detector().is_gateway(Some("192.168.1.1".parse().unwrap())));
        assert!(decoder
            .detector()
            .is_known_dns_server("8.8.8.8".parse().unwrap()));
        assert!(decoder
            .detector()
            .is_known_dns_server("1.1.1.1".parse().unwrap()));
    }

    #[test]
    fn arp_reply_from_learned_gateway_is_flagged() {
        let mut decoder = decoder_with_nets(&[], lan());

        // Learn the gateway from a DHCP ACK first
        let ack = udp_frame(
            Ipv4Addr::new(192, 168, 1, 1),
            67,
            Ipv4Addr::new(255, 255, 255, 255),
            68,
            &dhcp_ack_payload(),
        );
        decoder.analyze(&frame(ack)).unwrap();

        let mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);
        let reply = arp_frame(
            ArpOperations::Reply,
            mac,
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 50),
        );

        let info = decoder.analyze(&frame(reply)).unwrap();
        assert_eq!(info.protocol, Protocol::Arp);
        assert!(info.is_gateway_traffic);
        assert_eq!(info.gateway_ip, Some("192.168.1.1".parse().unwrap()));

        let arp = info.arp_info.as_ref().unwrap();
        assert_eq!(arp.operation, "REPLY");
        assert!(!arp.is_gratuitous);

        assert_eq!(
            decoder.detector().arp_entry("192.168.1.1".parse().unwrap()),
            Some("aa:bb:cc:dd:ee:ff")
        );
        assert_eq!(decoder.detector().gateway_mac(), Some("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn gratuitous_arp_is_detected() {
        let mut decoder = decoder_with_nets(&[], lan());
        let mac = MacAddr::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);
        let data = arp_frame(
            ArpOperations::Reply,
            mac,
            Ipv4Addr::new(192, 168, 1, 7),
            Ipv4Addr::new(192, 168, 1, 7),
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        assert!(info.arp_info.unwrap().is_gratuitous);
    }

    #[test]
    fn dns_query_classification_depends_on_learned_state() {
        let query = udp_frame(
            Ipv4Addr::new(192, 168, 1, 50),
            51000,
            Ipv4Addr::new(8, 8, 8, 8),
            53,
            &dns_query_payload(&example_com()),
        );

        // No learned state, no local subnets: not gateway traffic
        let mut decoder = decoder_with_nets(&[], Vec::new());
        let info = decoder.analyze(&frame(query.clone())).unwrap();
        assert_eq!(info.protocol, Protocol::Dns);
        assert!(!info.is_gateway_traffic);
        let dns = info.dns_info.as_ref().unwrap();
        assert!(dns.is_query);
        assert_eq!(dns.queries[0].name, "example.com");
        assert_eq!(dns.queries[0].record_type, "A");

        // After the DHCP ACK 8.8.8.8 is a known DNS server, which still
        // does not make it a gateway
        let ack = udp_frame(
            Ipv4Addr::new(192, 168, 1, 1),
            67,
            Ipv4Addr::new(255, 255, 255, 255),
            68,
            &dhcp_ack_payload(),
        );
        decoder.analyze(&frame(ack)).unwrap();
        let info = decoder.analyze(&frame(query.clone())).unwrap();
        assert!(!info.is_gateway_traffic);

        // With a learned local subnet the local-to-external crossing fires
        let mut decoder = decoder_with_nets(&[], lan());
        let info = decoder.analyze(&frame(query)).unwrap();
        assert!(info.is_gateway_traffic);
        assert_eq!(info.gateway_ip, None);
    }

    #[test]
    fn dns_response_learns_server_and_renders_answers() {
        let mut payload = vec![
            0x12, 0x34, // id
            0x81, 0x80, // response, RD+RA
            0x00, 0x01, // 1 question
            0x00, 0x01, // 1 answer
            0x00, 0x00, 0x00, 0x00,
        ];
        payload.extend_from_slice(&example_com());
        payload.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
        // answer: pointer to offset 12, A IN, ttl 60, 93.184.216.34
        payload.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01]);
        payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x3c, 0x00, 0x04, 93, 184, 216, 34]);

        let mut decoder = decoder_with_nets(&[], Vec::new());
        let data = udp_frame(
            Ipv4Addr::new(8, 8, 8, 8),
            53,
            Ipv4Addr::new(192, 168, 1, 50),
            51000,
            &payload,
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        let dns = info.dns_info.as_ref().unwrap();
        assert!(dns.is_answer);
        assert_eq!(dns.answers[0].record_type, "A");
        assert_eq!(dns.answers[0].data, "93.184.216.34");
        assert_eq!(dns.answers[0].ttl, 60);

        assert!(decoder
            .detector()
            .is_known_dns_server("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn icmp_is_classified_against_known_gateways() {
        let mut decoder = decoder_with_nets(&["192.168.1.1"], Vec::new());
        let icmp_payload = [8u8, 0, 0, 0, 0, 0, 0, 0];
        let data = ipv4_frame(
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(192, 168, 1, 1),
            IpNextHeaderProtocols::Icmp,
            &icmp_payload,
            0,
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        assert_eq!(info.protocol, Protocol::Icmp);
        assert!(info.is_gateway_traffic);
        assert_eq!(info.gateway_ip, Some("192.168.1.1".parse().unwrap()));
        assert_eq!(info.ttl, Some(64));
    }

    #[test]
    fn tcp_ports_are_recorded() {
        let mut buf = vec![0u8; 20];
        let mut tcp = MutableTcpPacket::new(&mut buf).unwrap();
        tcp.set_source(44321);
        tcp.set_destination(443);
        tcp.set_data_offset(5);

        let mut decoder = decoder_with_nets(&[], Vec::new());
        let data = ipv4_frame(
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(1, 2, 3, 4),
            IpNextHeaderProtocols::Tcp,
            &buf,
            0,
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        assert_eq!(info.protocol, Protocol::Tcp);
        assert_eq!(info.source_port, Some(44321));
        assert_eq!(info.destination_port, Some(443));
    }

    #[test]
    fn non_first_fragment_stays_unknown() {
        let mut decoder = decoder_with_nets(&[], lan());
        let data = ipv4_frame(
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(8, 8, 8, 8),
            IpNextHeaderProtocols::Udp,
            &[0xab; 32],
            185,
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        assert_eq!(info.protocol, Protocol::Unknown);
        // Classification still applies at the network layer
        assert!(info.is_gateway_traffic);
    }

    #[test]
    fn unknown_ethertype_is_not_flagged() {
        let mut decoder = decoder_with_nets(&[], lan());
        let data = ethernet_frame(pnet::packet::ethernet::EtherType::new(0x88cc), &[0u8; 32]);

        let info = decoder.analyze(&frame(data)).unwrap();
        assert_eq!(info.protocol, Protocol::Unknown);
        assert!(!info.is_gateway_traffic);
        assert!(info.source_ip.is_none());
    }

    #[test]
    fn malformed_dhcp_payload_stays_udp() {
        let mut decoder = decoder_with_nets(&[], Vec::new());
        let data = udp_frame(
            Ipv4Addr::new(192, 168, 1, 1),
            67,
            Ipv4Addr::new(255, 255, 255, 255),
            68,
            &[0u8; 64], // far too short for DHCP
        );

        let info = decoder.analyze(&frame(data)).unwrap();
        assert_eq!(info.protocol, Protocol::Udp);
        assert!(info.dhcp_info.is_none());
    }

    #[test]
    fn wire_length_is_preserved_over_captured_length() {
        let mut decoder = decoder_with_nets(&[], Vec::new());
        let data = ethernet_frame(pnet::packet::ethernet::EtherType::new(0x88cc), &[0u8; 16]);
        let raw = RawFrame {
            data,
            timestamp: Utc::now(),
            wire_length: 9000,
        };

        let info = decoder.analyze(&raw).unwrap();
        assert_eq!(info.length, 9000);
    }

    #[test]
    fn truncated_link_layer_is_a_decode_error() {
        let mut decoder = decoder_with_nets(&[], Vec::new());
        let raw = frame(vec![0u8; 4]);
        assert!(decoder.analyze(&raw).is_err());
    }
}
