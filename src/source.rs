//! Packet source and result sink seams
//!
//! The pipeline neither captures packets nor interprets results; the
//! embedding application supplies both ends. The source's `next_packet` is
//! the pipeline's only input-side blocking point.

use crate::core::packet::{ProcessingResult, StrixPacket};

/// Supplies packets to the pipeline. Returning `None` signals end of
/// stream and begins pipeline shutdown.
pub trait PacketSource: Send {
    fn next_packet(&mut self) -> Option<StrixPacket>;
}

impl<F> PacketSource for F
where
    F: FnMut() -> Option<StrixPacket> + Send,
{
    fn next_packet(&mut self) -> Option<StrixPacket> {
        self()
    }
}

/// Receives one result per processed packet, in per-flow order
pub trait ResultSink: Send {
    fn deliver(&mut self, result: ProcessingResult);
}

impl<F> ResultSink for F
where
    F: FnMut(ProcessingResult) + Send,
{
    fn deliver(&mut self, result: ProcessingResult) {
        self(result)
    }
}

/// A source over a pre-built packet list, mainly for tests and benchmarks
pub struct VecSource {
    packets: std::vec::IntoIter<StrixPacket>,
}

impl VecSource {
    pub fn new(packets: Vec<StrixPacket>) -> Self {
        Self {
            packets: packets.into_iter(),
        }
    }
}

impl PacketSource for VecSource {
    fn next_packet(&mut self) -> Option<StrixPacket> {
        self.packets.next()
    }
}
