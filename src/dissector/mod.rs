//! Dissector seam between the pipeline and protocol analysis
//!
//! The pipeline treats the dissector as an opaque collaborator with two
//! entry points: an L3/L4 extraction routine run by the L34 worker, and a
//! stateless L7 classifier run by the sharded L7 workers against the flow's
//! state. `StrixDissector` is the default implementation.

pub mod default;
pub mod tcp;

pub use default::StrixDissector;
pub use tcp::{TcpPhase, TcpTracker};

use crate::core::flow::FlowDirection;
use crate::core::packet::{PacketInfo, ParseError, StrixPacket};
use crate::protocols::ProtocolFields;
use std::fmt;

/// Application-layer protocol verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppProtocol {
    Unknown,
    Dns,
    Http,
    Tls,
    Sip,
}

impl fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppProtocol::Unknown => write!(f, "unknown"),
            AppProtocol::Dns => write!(f, "dns"),
            AppProtocol::Http => write!(f, "http"),
            AppProtocol::Tls => write!(f, "tls"),
            AppProtocol::Sip => write!(f, "sip"),
        }
    }
}

/// Outcome of the L3/L4 extraction step
#[derive(Debug)]
pub enum L34Verdict {
    /// Parsed packet ready for flow routing
    Parsed(PacketInfo),
    /// Reassembled final fragment; the buffer is owned by the pipeline and
    /// released after the L7 step
    LastFragment(PacketInfo),
    /// Non-terminal fragment: delivered, no flow lookup
    Fragment,
    Error(ParseError),
}

/// Per-flow dissector state stored in the flow row
#[derive(Debug, Default)]
pub struct FlowState {
    /// Sticky protocol verdict once detection succeeds
    pub app_protocol: Option<AppProtocol>,
    /// Bitmask of classifiers already ruled out for this flow
    pub excluded: u16,
    /// TCP connection tracking, present for TCP flows
    pub tcp: Option<TcpTracker>,
    /// Most recent fields extracted on this flow
    pub fields: Option<ProtocolFields>,
    /// Packets classified against this flow
    pub packets: u64,
}

/// Classifier status for one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyStatus {
    Ok,
    /// The packet closed its TCP connection; the caller deletes the flow row
    TcpConnectionTerminated,
}

/// Result of classifying one packet against its flow
#[derive(Debug)]
pub struct ClassifyOutcome {
    pub status: ClassifyStatus,
    pub app_protocol: AppProtocol,
    /// Fields extracted from this packet, if any
    pub fields: Option<ProtocolFields>,
}

/// Protocol analysis collaborator driven by the pipeline
pub trait Dissector: Send + Sync {
    /// Parse link/network/transport headers into a routable view.
    /// Run on the L34 worker thread.
    fn extract_packet_infos(&self, pkt: &StrixPacket) -> L34Verdict;

    /// Classify one packet against its flow's state. Run on the L7 worker
    /// that owns the flow's shard; the state is mutated by that worker only.
    fn classify(
        &self,
        state: &mut FlowState,
        info: &PacketInfo,
        direction: FlowDirection,
    ) -> ClassifyOutcome;
}
