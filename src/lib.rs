//! Strix - A multi-core stateful deep packet inspection pipeline
//!
//! Strix classifies each packet of a stream to an application-layer protocol
//! while maintaining per-flow state across the lifetime of each transport
//! flow. Packets are sharded to parallel workers with the guarantee that all
//! packets of one flow are processed sequentially by the same worker.
//!
//! # Architecture
//!
//! ```text
//!  source → L34 emitter → L34 worker → L7 emitter ─┬→ L7 worker 0 ─┐
//!                                       (shard by   ├→ L7 worker 1 ─┼→ collector → sink
//!                                        flow hash) └→ L7 worker W-1┘
//! ```
//!
//! Each stage is an OS thread pinned to a CPU; stages exchange fixed-grain
//! task batches over bounded queues. Flow tables are sharded per worker, so
//! no locking happens on the data path. A collapsed topology fuses the three
//! front stages into a single thread for low packet rates.

pub mod config;
pub mod core;
pub mod dissector;
pub mod protocols;
pub mod source;
pub mod utils;

pub use crate::config::StrixConfig;
pub use crate::core::engine::{PipelineError, PipelineParts, StrixPipeline};
pub use crate::core::flow::{FlowCleanupFn, FlowDirection, FlowKey, FlowShard};
pub use crate::core::packet::{
    PacketInfo, ParseError, ProcessingResult, ProcessingStatus, StrixPacket, TransportProto,
};
pub use crate::dissector::{
    AppProtocol, ClassifyOutcome, ClassifyStatus, Dissector, FlowState, L34Verdict,
    StrixDissector,
};
pub use crate::protocols::{ProtocolClassifier, ProtocolFields};
pub use crate::source::{PacketSource, ResultSink, VecSource};
pub use crate::utils::metrics::PipelineMetrics;

/// Upper bound on the configurable batch grain size.
pub const MAX_GRAIN: usize = 16;

/// Cache line size assumed for batch and shard alignment.
pub const CACHE_LINE_SIZE: usize = 64;
