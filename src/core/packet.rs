//! Packet records and per-packet processing outcomes
//!
//! This module defines the packet record handed in by the source, the parsed
//! L3/L4 view the pipeline routes on, and the statuses delivered to the
//! result sink.

use bytes::Bytes;
use std::net::IpAddr;
use std::time::SystemTime;
use thiserror::Error;

/// Transport protocols the pipeline routes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProto {
    Tcp,
    Udp,
    Other(u8),
}

impl From<u8> for TransportProto {
    fn from(proto: u8) -> Self {
        match proto {
            6 => TransportProto::Tcp,
            17 => TransportProto::Udp,
            other => TransportProto::Other(other),
        }
    }
}

/// A packet as handed in by the packet source
///
/// The payload is shared read-only through the pipeline; `user_tag` is an
/// opaque caller correlation handle carried through unchanged.
#[derive(Debug, Clone)]
pub struct StrixPacket {
    /// Raw packet bytes starting at the link layer
    pub data: Bytes,
    /// Arrival timestamp
    pub timestamp: SystemTime,
    /// Caller correlation handle, delivered back with the result
    pub user_tag: u64,
}

impl StrixPacket {
    pub fn new(data: impl Into<Bytes>, timestamp: SystemTime, user_tag: u64) -> Self {
        Self {
            data: data.into(),
            timestamp,
            user_tag,
        }
    }
}

/// Parsed L3/L4 view of a packet
#[derive(Debug, Clone)]
pub struct PacketInfo {
    /// 4 or 6
    pub ip_version: u8,
    pub proto: TransportProto,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Offset of the application payload within `data`
    pub l7_offset: usize,
    /// TCP flag byte, when the transport is TCP
    pub tcp_flags: Option<u8>,
    /// The packet bytes the offsets refer to. For a reassembled last
    /// fragment this buffer is owned by the pipeline and dropped after the
    /// L7 step.
    pub data: Bytes,
    pub timestamp: SystemTime,
}

impl PacketInfo {
    /// Application payload slice
    pub fn l7_payload(&self) -> &[u8] {
        &self.data[self.l7_offset.min(self.data.len())..]
    }
}

/// L3/L4 extraction failures, delivered to the sink as data
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("truncated link or network header")]
    TruncatedHeader,
    #[error("unsupported link layer")]
    UnsupportedLink,
    #[error("bad IP header")]
    BadIpHeader,
    #[error("truncated transport header")]
    TruncatedTransport,
}

/// Per-packet status delivered to the result sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    /// Classified (or still under detection) with a valid flow
    Ok,
    /// Non-terminal IP fragment; no flow lookup performed
    IpFragment,
    /// L4 protocol is neither TCP nor UDP
    TransportNotSupported,
    /// L3/L4 extraction failed
    ParseError(ParseError),
    /// The destination worker's flow shard is at capacity
    MaxFlows,
    /// The packet terminated its TCP connection; the flow row was deleted
    TcpConnectionTerminated,
}

/// Final per-packet result handed to the result sink
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    /// Application protocol verdict (Unknown while detection is pending or
    /// for non-Ok statuses)
    pub app_protocol: crate::dissector::AppProtocol,
    /// Fields extracted from this packet, if the classifier produced any
    pub fields: Option<crate::protocols::ProtocolFields>,
    pub user_tag: u64,
}

impl ProcessingResult {
    /// A result carrying only a status, for packets that never reached
    /// classification
    pub fn bare(status: ProcessingStatus, user_tag: u64) -> Self {
        Self {
            status,
            app_protocol: crate::dissector::AppProtocol::Unknown,
            fields: None,
            user_tag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_proto_mapping() {
        assert_eq!(TransportProto::from(6), TransportProto::Tcp);
        assert_eq!(TransportProto::from(17), TransportProto::Udp);
        assert_eq!(TransportProto::from(1), TransportProto::Other(1));
    }

    #[test]
    fn test_l7_payload_bounds() {
        let info = PacketInfo {
            ip_version: 4,
            proto: TransportProto::Udp,
            src_ip: "10.0.0.1".parse().unwrap(),
            dst_ip: "10.0.0.2".parse().unwrap(),
            src_port: 1000,
            dst_port: 53,
            l7_offset: 100,
            tcp_flags: None,
            data: Bytes::from_static(&[0u8; 8]),
            timestamp: SystemTime::UNIX_EPOCH,
        };
        // An offset past the end yields an empty payload, not a panic.
        assert!(info.l7_payload().is_empty());
    }
}
