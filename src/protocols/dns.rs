//! DNS protocol classifier for Strix
//!
//! Recognises DNS over UDP port 53 and extracts the first question's name
//! and record type.

use crate::core::packet::{PacketInfo, TransportProto};
use crate::dissector::AppProtocol;
use crate::protocols::{ProtocolClassifier, ProtocolFields};
use std::fmt;

/// DNS record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsRecordType {
    A,
    AAAA,
    CNAME,
    MX,
    NS,
    PTR,
    SOA,
    SRV,
    TXT,
    Other(u16),
}

impl From<u16> for DnsRecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => DnsRecordType::A,
            28 => DnsRecordType::AAAA,
            5 => DnsRecordType::CNAME,
            15 => DnsRecordType::MX,
            2 => DnsRecordType::NS,
            12 => DnsRecordType::PTR,
            6 => DnsRecordType::SOA,
            33 => DnsRecordType::SRV,
            16 => DnsRecordType::TXT,
            _ => DnsRecordType::Other(value),
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsRecordType::A => write!(f, "A"),
            DnsRecordType::AAAA => write!(f, "AAAA"),
            DnsRecordType::CNAME => write!(f, "CNAME"),
            DnsRecordType::MX => write!(f, "MX"),
            DnsRecordType::NS => write!(f, "NS"),
            DnsRecordType::PTR => write!(f, "PTR"),
            DnsRecordType::SOA => write!(f, "SOA"),
            DnsRecordType::SRV => write!(f, "SRV"),
            DnsRecordType::TXT => write!(f, "TXT"),
            DnsRecordType::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

/// Maximum compression-pointer jumps while decoding a name
const MAX_NAME_JUMPS: usize = 8;

/// DNS classifier
pub struct DnsClassifier;

impl DnsClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Decode a (possibly compressed) DNS name starting at `offset`.
    /// Returns the name and the offset just past it.
    fn parse_name(&self, data: &[u8], mut offset: usize) -> Option<(String, usize)> {
        let mut name = String::new();
        let mut jumps = 0usize;
        let mut end: Option<usize> = None;

        loop {
            let length = *data.get(offset)? as usize;

            if length & 0xC0 == 0xC0 {
                // Compression pointer; the caller's cursor stops after it.
                jumps += 1;
                if jumps > MAX_NAME_JUMPS {
                    return None;
                }
                let pointer =
                    ((length & 0x3F) << 8) | (*data.get(offset + 1)? as usize);
                if end.is_none() {
                    end = Some(offset + 2);
                }
                offset = pointer;
                continue;
            }

            if length == 0 {
                offset += 1;
                break;
            }

            if offset + 1 + length > data.len() {
                return None;
            }
            if !name.is_empty() {
                name.push('.');
            }
            for &b in &data[offset + 1..offset + 1 + length] {
                name.push(b as char);
            }
            offset += length + 1;
        }

        Some((name, end.unwrap_or(offset)))
    }

    fn parse_question(&self, payload: &[u8]) -> Option<(String, DnsRecordType, bool)> {
        if payload.len() < 12 {
            return None;
        }
        let flags = u16::from_be_bytes([payload[2], payload[3]]);
        let is_response = flags & 0x8000 != 0;
        let question_count = u16::from_be_bytes([payload[4], payload[5]]);
        if question_count == 0 {
            return None;
        }

        let (name, offset) = self.parse_name(payload, 12)?;
        if offset + 4 > payload.len() {
            return None;
        }
        let record_type = u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        Some((name, DnsRecordType::from(record_type), is_response))
    }
}

impl ProtocolClassifier for DnsClassifier {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn app_protocol(&self) -> AppProtocol {
        AppProtocol::Dns
    }

    fn matches(&self, info: &PacketInfo, payload: &[u8]) -> bool {
        if info.proto != TransportProto::Udp {
            return false;
        }
        if info.src_port != 53 && info.dst_port != 53 {
            return false;
        }
        if payload.len() < 12 {
            return false;
        }
        // Opcode 0..=2 and a sane question count.
        let opcode = (payload[2] >> 3) & 0x0F;
        let question_count = u16::from_be_bytes([payload[4], payload[5]]);
        opcode <= 2 && question_count <= 32
    }

    fn extract(&self, _info: &PacketInfo, payload: &[u8]) -> Option<ProtocolFields> {
        let (query_name, record_type, is_response) = self.parse_question(payload)?;
        Some(ProtocolFields::Dns {
            query_name,
            query_type: record_type.to_string(),
            is_response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::SystemTime;

    fn udp_info(src_port: u16, dst_port: u16) -> PacketInfo {
        PacketInfo {
            ip_version: 4,
            proto: TransportProto::Udp,
            src_ip: "192.168.1.10".parse().unwrap(),
            dst_ip: "8.8.8.8".parse().unwrap(),
            src_port,
            dst_port,
            l7_offset: 0,
            tcp_flags: None,
            data: Bytes::new(),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    fn query_for(name_labels: &[&str]) -> Vec<u8> {
        let mut msg = vec![
            0x12, 0x34, // transaction id
            0x01, 0x00, // standard query, recursion desired
            0x00, 0x01, // 1 question
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        for label in name_labels {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.push(0);
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A, IN
        msg
    }

    #[test]
    fn test_matches_port_and_header() {
        let classifier = DnsClassifier::new();
        let payload = query_for(&["example", "com"]);
        assert!(classifier.matches(&udp_info(5353 + 1, 53), &payload));
        assert!(!classifier.matches(&udp_info(1000, 80), &payload));
        assert!(!classifier.matches(&udp_info(1000, 53), &payload[..8]));
    }

    #[test]
    fn test_extract_question() {
        let classifier = DnsClassifier::new();
        let payload = query_for(&["example", "com"]);
        match classifier.extract(&udp_info(1000, 53), &payload) {
            Some(ProtocolFields::Dns {
                query_name,
                query_type,
                is_response,
            }) => {
                assert_eq!(query_name, "example.com");
                assert_eq!(query_type, "A");
                assert!(!is_response);
            }
            other => panic!("unexpected fields {:?}", other),
        }
    }

    #[test]
    fn test_compression_pointer_loop_is_bounded() {
        let classifier = DnsClassifier::new();
        let mut msg = query_for(&["a"]);
        // Overwrite the name with a pointer to itself.
        msg[12] = 0xC0;
        msg[13] = 12;
        assert!(classifier.extract(&udp_info(1000, 53), &msg).is_none());
    }
}
