//! Default dissector implementation
//!
//! L3/L4 extraction walks Ethernet → IPv4/IPv6 → TCP/UDP headers with pnet.
//! L7 classification runs the registered protocol classifiers against a
//! flow until one claims it; classifiers that reject a non-empty payload are
//! excluded from the flow's remaining lifetime.
//!
//! IP fragments are reported as such and never consult the flow table.
//! Reassembly is a capture-side concern; a source that performs it hands the
//! pipeline a reassembled buffer which this dissector sees as a normal
//! packet.

use crate::core::flow::FlowDirection;
use crate::core::packet::{PacketInfo, ParseError, StrixPacket, TransportProto};
use crate::dissector::{
    ClassifyOutcome, ClassifyStatus, Dissector, FlowState, L34Verdict, TcpTracker,
};
use crate::protocols::{self, ProtocolClassifier};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ipv4::{Ipv4Flags, Ipv4Packet};
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use std::net::IpAddr;
use tracing::trace;

const ETHERNET_HEADER_LEN: usize = 14;
const IPV6_HEADER_LEN: usize = 40;

/// The default Strix dissector
pub struct StrixDissector {
    classifiers: Vec<Box<dyn ProtocolClassifier>>,
}

impl StrixDissector {
    /// Dissector with the built-in classifier set
    pub fn new() -> Self {
        Self {
            classifiers: protocols::default_classifiers(),
        }
    }

    /// Dissector with a caller-provided classifier set
    pub fn with_classifiers(classifiers: Vec<Box<dyn ProtocolClassifier>>) -> Self {
        Self { classifiers }
    }

    fn extract_v4(&self, pkt: &StrixPacket) -> L34Verdict {
        let data = &pkt.data[ETHERNET_HEADER_LEN..];
        let ipv4 = match Ipv4Packet::new(data) {
            Some(ipv4) => ipv4,
            None => return L34Verdict::Error(ParseError::BadIpHeader),
        };

        if ipv4.get_fragment_offset() > 0 || ipv4.get_flags() & Ipv4Flags::MoreFragments != 0 {
            return L34Verdict::Fragment;
        }

        let src_ip = IpAddr::V4(ipv4.get_source());
        let dst_ip = IpAddr::V4(ipv4.get_destination());
        let proto = TransportProto::from(ipv4.get_next_level_protocol().0);
        let ip_header_len = ipv4.get_header_length() as usize * 4;
        let l4_offset = ETHERNET_HEADER_LEN + ip_header_len;

        self.finish_transport(pkt, 4, proto, src_ip, dst_ip, l4_offset)
    }

    fn extract_v6(&self, pkt: &StrixPacket) -> L34Verdict {
        let data = &pkt.data[ETHERNET_HEADER_LEN..];
        let ipv6 = match Ipv6Packet::new(data) {
            Some(ipv6) => ipv6,
            None => return L34Verdict::Error(ParseError::BadIpHeader),
        };

        let src_ip = IpAddr::V6(ipv6.get_source());
        let dst_ip = IpAddr::V6(ipv6.get_destination());
        // Extension headers are not walked; an unrecognised next-header is
        // reported as an unsupported transport downstream.
        let proto = TransportProto::from(ipv6.get_next_header().0);
        let l4_offset = ETHERNET_HEADER_LEN + IPV6_HEADER_LEN;

        self.finish_transport(pkt, 6, proto, src_ip, dst_ip, l4_offset)
    }

    fn finish_transport(
        &self,
        pkt: &StrixPacket,
        ip_version: u8,
        proto: TransportProto,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        l4_offset: usize,
    ) -> L34Verdict {
        let l4_data = match pkt.data.get(l4_offset..) {
            Some(slice) => slice,
            None => return L34Verdict::Error(ParseError::TruncatedTransport),
        };

        let (src_port, dst_port, tcp_flags, l7_offset) = match proto {
            TransportProto::Tcp => match TcpPacket::new(l4_data) {
                Some(tcp) => (
                    tcp.get_source(),
                    tcp.get_destination(),
                    // The 9-bit flags field; the tracker only reads FIN/SYN/RST.
                    Some(tcp.get_flags() as u8),
                    l4_offset + tcp.get_data_offset() as usize * 4,
                ),
                None => return L34Verdict::Error(ParseError::TruncatedTransport),
            },
            TransportProto::Udp => match UdpPacket::new(l4_data) {
                Some(udp) => (
                    udp.get_source(),
                    udp.get_destination(),
                    None,
                    l4_offset + 8,
                ),
                None => return L34Verdict::Error(ParseError::TruncatedTransport),
            },
            TransportProto::Other(_) => (0, 0, None, l4_offset),
        };

        L34Verdict::Parsed(PacketInfo {
            ip_version,
            proto,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            l7_offset: l7_offset.min(pkt.data.len()),
            tcp_flags,
            data: pkt.data.clone(),
            timestamp: pkt.timestamp,
        })
    }
}

impl Default for StrixDissector {
    fn default() -> Self {
        Self::new()
    }
}

impl Dissector for StrixDissector {
    fn extract_packet_infos(&self, pkt: &StrixPacket) -> L34Verdict {
        if pkt.data.len() < ETHERNET_HEADER_LEN {
            return L34Verdict::Error(ParseError::TruncatedHeader);
        }
        let ethernet = match EthernetPacket::new(&pkt.data) {
            Some(ethernet) => ethernet,
            None => return L34Verdict::Error(ParseError::TruncatedHeader),
        };

        match ethernet.get_ethertype() {
            EtherTypes::Ipv4 => self.extract_v4(pkt),
            EtherTypes::Ipv6 => self.extract_v6(pkt),
            _ => L34Verdict::Error(ParseError::UnsupportedLink),
        }
    }

    fn classify(
        &self,
        state: &mut FlowState,
        info: &PacketInfo,
        direction: FlowDirection,
    ) -> ClassifyOutcome {
        state.packets += 1;

        let mut terminated = false;
        if info.proto == TransportProto::Tcp {
            if let Some(flags) = info.tcp_flags {
                let tracker = state.tcp.get_or_insert_with(TcpTracker::new);
                terminated = tracker.on_flags(flags, direction);
            }
        }

        let payload = info.l7_payload();
        let mut fields = None;

        match state.app_protocol {
            Some(app) => {
                // Verdict is sticky; keep extracting fields from the
                // matched protocol.
                if !payload.is_empty() {
                    if let Some(classifier) = self
                        .classifiers
                        .iter()
                        .find(|c| c.app_protocol() == app)
                    {
                        fields = classifier.extract(info, payload);
                    }
                }
            }
            None if !payload.is_empty() => {
                for (i, classifier) in self.classifiers.iter().enumerate() {
                    let bit = 1u16 << i;
                    if state.excluded & bit != 0 {
                        continue;
                    }
                    if classifier.matches(info, payload) {
                        trace!(protocol = classifier.name(), "flow classified");
                        state.app_protocol = Some(classifier.app_protocol());
                        fields = classifier.extract(info, payload);
                        break;
                    }
                    state.excluded |= bit;
                }
            }
            None => {}
        }

        if fields.is_some() {
            state.fields = fields.clone();
        }

        ClassifyOutcome {
            status: if terminated {
                ClassifyStatus::TcpConnectionTerminated
            } else {
                ClassifyStatus::Ok
            },
            app_protocol: state.app_protocol.unwrap_or(crate::dissector::AppProtocol::Unknown),
            fields,
        }
    }
}
