//! Pipeline stage actors
//!
//! The five data-plane actors of the pipeline: the L34 emitter pulls packets
//! from the source into batches, the L34 worker parses them and computes the
//! flow routing, the L7 emitter regroups slots into per-worker batches, the
//! L7 workers classify against their flow shards, and the collector delivers
//! results and recycles batches. A collapsed emitter fuses the first three
//! for single-threaded front stages.

use crate::core::engine::ControlFlags;
use crate::core::flow::{
    flow_hash_v4, flow_hash_v6, worker_for_hash, FlowCleanupFn, FlowShard,
};
use crate::core::packet::{
    PacketInfo, ProcessingResult, ProcessingStatus, TransportProto,
};
use crate::core::task::{ParsedSlot, SlotVerdict, TaskBatch, TaskPool, TaskSlot};
use crate::dissector::{ClassifyStatus, Dissector, L34Verdict};
use crate::source::{PacketSource, ResultSink};
use crate::utils::metrics::PipelineMetrics;
use crossbeam::channel::Sender;
use std::sync::Arc;
use tracing::{debug, trace};

/// Message exchanged between pipeline stages
pub(crate) enum StageMsg {
    Batch(Box<TaskBatch>),
    /// End-of-stream marker; propagated through every stage
    Eos,
}

/// What one emitter invocation produced
pub(crate) struct EmitterOutput {
    pub batch: Option<Box<TaskBatch>>,
    /// True when EOS must follow the batch (freeze or source exhausted)
    pub eos: bool,
}

/// Pulls packets from the source into input batches
pub(crate) struct L34Emitter {
    source: Box<dyn PacketSource>,
    grain: usize,
    pool: Arc<TaskPool>,
    control: Arc<ControlFlags>,
    metrics: Arc<PipelineMetrics>,
}

impl L34Emitter {
    pub(crate) fn new(
        source: Box<dyn PacketSource>,
        grain: usize,
        pool: Arc<TaskPool>,
        control: Arc<ControlFlags>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            source,
            grain,
            pool,
            control,
            metrics,
        }
    }

    /// Fill one input batch from the source.
    ///
    /// The freeze flag is checked before every slot, so a freeze takes
    /// effect without reading further packets. A partially filled batch is
    /// still emitted ahead of EOS; its unused slots stay `Empty`.
    pub(crate) fn step(&mut self) -> EmitterOutput {
        let mut batch = self.pool.acquire();
        let mut filled = 0usize;

        for i in 0..self.grain {
            if self.control.freeze_requested() {
                break;
            }
            match self.source.next_packet() {
                Some(pkt) => {
                    self.metrics.record_packet_read();
                    batch.slots[i] = TaskSlot::Input(pkt);
                    filled += 1;
                }
                None => {
                    debug!("packet source exhausted, terminating");
                    self.control.set_terminating();
                    break;
                }
            }
        }

        let eos = self.control.freeze_requested() || self.control.terminating();
        if filled == 0 {
            self.pool.recycle(batch);
            EmitterOutput { batch: None, eos }
        } else {
            self.metrics.record_batch_emitted();
            EmitterOutput {
                batch: Some(batch),
                eos,
            }
        }
    }
}

/// Parses input slots and computes flow routing
pub(crate) struct L34Worker {
    dissector: Arc<dyn Dissector>,
    grain: usize,
    v4_rows: u32,
    v6_rows: u32,
    v4_rows_per_worker: u32,
    v6_rows_per_worker: u32,
}

impl L34Worker {
    pub(crate) fn new(
        dissector: Arc<dyn Dissector>,
        grain: usize,
        num_workers: usize,
        v4_rows: u32,
        v6_rows: u32,
    ) -> Self {
        Self {
            dissector,
            grain,
            v4_rows,
            v6_rows,
            v4_rows_per_worker: v4_rows / num_workers as u32,
            v6_rows_per_worker: v6_rows / num_workers as u32,
        }
    }

    /// Transform an input batch into a parsed batch in place. Each slot is
    /// taken out before its output is written back, so no output ever
    /// aliases an input still to be read.
    pub(crate) fn process(&self, batch: &mut TaskBatch) {
        for i in 0..self.grain {
            let pkt = match batch.slots[i].take() {
                TaskSlot::Input(pkt) => pkt,
                TaskSlot::Empty => continue,
                other => {
                    batch.slots[i] = other;
                    continue;
                }
            };
            let user_tag = pkt.user_tag;

            let parsed = match self.dissector.extract_packet_infos(&pkt) {
                L34Verdict::Error(e) => ParsedSlot {
                    verdict: SlotVerdict::Error(e),
                    flow_hash: 0,
                    dest_worker: 0,
                    user_tag,
                },
                L34Verdict::Fragment => ParsedSlot {
                    verdict: SlotVerdict::Fragment,
                    flow_hash: 0,
                    dest_worker: 0,
                    user_tag,
                },
                L34Verdict::Parsed(info) => self.route(info, false, user_tag),
                L34Verdict::LastFragment(info) => self.route(info, true, user_tag),
            };
            batch.slots[i] = TaskSlot::Parsed(parsed);
        }
    }

    fn route(&self, info: PacketInfo, last_fragment: bool, user_tag: u64) -> ParsedSlot {
        if !matches!(info.proto, TransportProto::Tcp | TransportProto::Udp) {
            return ParsedSlot {
                verdict: SlotVerdict::TransportNotSupported,
                flow_hash: 0,
                dest_worker: 0,
                user_tag,
            };
        }

        let (flow_hash, rows_per_worker) = if info.ip_version == 4 {
            (flow_hash_v4(&info, self.v4_rows), self.v4_rows_per_worker)
        } else {
            (flow_hash_v6(&info, self.v6_rows), self.v6_rows_per_worker)
        };
        let dest_worker = worker_for_hash(flow_hash, rows_per_worker);

        ParsedSlot {
            verdict: if last_fragment {
                SlotVerdict::LastFragment(info)
            } else {
                SlotVerdict::Ok(info)
            },
            flow_hash,
            dest_worker,
            user_tag,
        }
    }
}

/// Regroups parsed slots into per-worker batches (the batcher)
pub(crate) struct L7Emitter {
    grain: usize,
    num_workers: usize,
    /// Per-worker accumulator of slots not yet dispatched
    partially_filled: Vec<Box<TaskBatch>>,
    partially_filled_sizes: Vec<usize>,
    /// Spare batches for flushes; seeded with one batch per worker and
    /// refilled by every consumed inbound batch, so a flush always finds one
    waiting_tasks: Vec<Box<TaskBatch>>,
    outputs: Vec<Sender<StageMsg>>,
}

impl L7Emitter {
    pub(crate) fn new(grain: usize, outputs: Vec<Sender<StageMsg>>) -> Self {
        let num_workers = outputs.len();
        Self {
            grain,
            num_workers,
            partially_filled: (0..num_workers).map(|_| TaskBatch::empty()).collect(),
            partially_filled_sizes: vec![0; num_workers],
            waiting_tasks: (0..num_workers).map(|_| TaskBatch::empty()).collect(),
            outputs,
        }
    }

    /// Scatter an inbound parsed batch into the per-worker accumulators,
    /// dispatching every accumulator that reaches the full grain. The send
    /// blocks when a worker's queue is full; that is the pipeline's
    /// back-pressure point, and no batch is ever dropped.
    pub(crate) fn scatter(&mut self, mut batch: Box<TaskBatch>) {
        for i in 0..self.grain {
            let parsed = match batch.slots[i].take() {
                TaskSlot::Parsed(parsed) => parsed,
                _ => continue,
            };
            let d = parsed.dest_worker;
            let pfs = self.partially_filled_sizes[d];

            if pfs + 1 == self.grain {
                let mut out = self
                    .waiting_tasks
                    .pop()
                    .expect("spare batch stack exhausted");
                for j in 0..pfs {
                    out.slots[j] = self.partially_filled[d].slots[j].take();
                }
                out.slots[pfs] = TaskSlot::Parsed(parsed);
                trace!(worker = d, "dispatching full batch");
                let _ = self.outputs[d].send(StageMsg::Batch(out));
                self.partially_filled_sizes[d] = 0;
            } else {
                self.partially_filled[d].slots[pfs] = TaskSlot::Parsed(parsed);
                self.partially_filled_sizes[d] = pfs + 1;
            }
        }
        // The consumed inbound batch becomes a future output container.
        self.waiting_tasks.push(batch);
    }

    /// Dispatch every non-empty accumulator, Empty-padded. Called at EOS.
    pub(crate) fn flush(&mut self) {
        for d in 0..self.num_workers {
            let pfs = self.partially_filled_sizes[d];
            if pfs == 0 {
                continue;
            }
            let mut out = self
                .waiting_tasks
                .pop()
                .expect("spare batch stack exhausted");
            for j in 0..pfs {
                out.slots[j] = self.partially_filled[d].slots[j].take();
            }
            debug!(worker = d, slots = pfs, "flushing partial batch");
            let _ = self.outputs[d].send(StageMsg::Batch(out));
            self.partially_filled_sizes[d] = 0;
        }
    }

    /// Forward EOS to every worker
    pub(crate) fn broadcast_eos(&self) {
        for tx in &self.outputs {
            let _ = tx.send(StageMsg::Eos);
        }
    }

    #[cfg(test)]
    pub(crate) fn spare_batches(&self) -> usize {
        self.waiting_tasks.len()
    }
}

/// Classifies parsed slots against this worker's flow shards
pub(crate) struct L7Worker {
    worker_id: usize,
    grain: usize,
    dissector: Arc<dyn Dissector>,
    v4_shard: FlowShard,
    v6_shard: FlowShard,
    cleanup: Option<Arc<FlowCleanupFn>>,
    metrics: Arc<PipelineMetrics>,
}

impl L7Worker {
    pub(crate) fn new(
        worker_id: usize,
        grain: usize,
        dissector: Arc<dyn Dissector>,
        v4_shard: FlowShard,
        v6_shard: FlowShard,
        cleanup: Option<Arc<FlowCleanupFn>>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            worker_id,
            grain,
            dissector,
            v4_shard,
            v6_shard,
            cleanup,
            metrics,
        }
    }

    /// Transform a parsed batch into an output batch in place.
    ///
    /// When a shard runs out of flow budget the batch is truncated: the
    /// remaining slots are delivered with `MaxFlows` without touching the
    /// table. A reassembled last-fragment buffer is owned by its slot and
    /// released exactly once, on whichever path consumes the slot.
    pub(crate) fn process(&mut self, batch: &mut TaskBatch) {
        let mut exhausted = false;

        for i in 0..self.grain {
            let parsed = match batch.slots[i].take() {
                TaskSlot::Parsed(parsed) => parsed,
                _ => continue,
            };
            let user_tag = parsed.user_tag;

            if exhausted {
                batch.slots[i] =
                    TaskSlot::Output(ProcessingResult::bare(ProcessingStatus::MaxFlows, user_tag));
                continue;
            }

            let result = match parsed.verdict {
                SlotVerdict::Error(e) => {
                    ProcessingResult::bare(ProcessingStatus::ParseError(e), user_tag)
                }
                SlotVerdict::Fragment => {
                    ProcessingResult::bare(ProcessingStatus::IpFragment, user_tag)
                }
                SlotVerdict::TransportNotSupported => {
                    ProcessingResult::bare(ProcessingStatus::TransportNotSupported, user_tag)
                }
                SlotVerdict::Ok(info) | SlotVerdict::LastFragment(info) => {
                    self.classify_slot(parsed.flow_hash, info, user_tag, &mut exhausted)
                }
            };
            batch.slots[i] = TaskSlot::Output(result);
        }
    }

    fn classify_slot(
        &mut self,
        flow_hash: u32,
        info: PacketInfo,
        user_tag: u64,
        exhausted: &mut bool,
    ) -> ProcessingResult {
        let shard = if info.ip_version == 4 {
            &mut self.v4_shard
        } else {
            &mut self.v6_shard
        };

        let flow = match shard.find_or_create(flow_hash, &info) {
            Some(flow) => flow,
            None => {
                trace!(worker = self.worker_id, "flow shard exhausted");
                self.metrics.record_max_flows_hit();
                *exhausted = true;
                return ProcessingResult::bare(ProcessingStatus::MaxFlows, user_tag);
            }
        };

        if flow.created {
            self.metrics.record_flow_created();
        }
        let direction = flow.direction;
        let outcome = self.dissector.classify(&mut flow.row.state, &info, direction);

        let (status, delete_key) = match outcome.status {
            ClassifyStatus::Ok => (ProcessingStatus::Ok, None),
            ClassifyStatus::TcpConnectionTerminated => (
                ProcessingStatus::TcpConnectionTerminated,
                Some(flow.row.key.clone()),
            ),
        };

        if let Some(key) = delete_key {
            shard.delete(flow_hash, &key, self.cleanup.as_deref());
            self.metrics.record_flow_destroyed();
        }

        ProcessingResult {
            status,
            app_protocol: outcome.app_protocol,
            fields: outcome.fields,
            user_tag,
        }
    }

    /// Tear down the shards at pipeline shutdown, invoking the cleanup
    /// callback for every remaining flow
    pub(crate) fn shutdown(&mut self) {
        for _ in 0..self.v4_shard.len() + self.v6_shard.len() {
            self.metrics.record_flow_destroyed();
        }
        self.v4_shard.drain(self.cleanup.as_deref());
        self.v6_shard.drain(self.cleanup.as_deref());
        debug!(worker = self.worker_id, "L7 worker shut down");
    }

    #[cfg(test)]
    pub(crate) fn v4_flow_count(&self) -> u32 {
        self.v4_shard.len()
    }
}

/// Delivers results to the sink and recycles batches
pub(crate) struct L7Collector {
    sink: Box<dyn ResultSink>,
    grain: usize,
    pool: Arc<TaskPool>,
    metrics: Arc<PipelineMetrics>,
}

impl L7Collector {
    pub(crate) fn new(
        sink: Box<dyn ResultSink>,
        grain: usize,
        pool: Arc<TaskPool>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            sink,
            grain,
            pool,
            metrics,
        }
    }

    pub(crate) fn collect(&mut self, mut batch: Box<TaskBatch>) {
        for i in 0..self.grain {
            if let TaskSlot::Output(result) = batch.slots[i].take() {
                self.metrics.record_packet_delivered();
                self.sink.deliver(result);
            }
        }
        self.pool.recycle(batch);
    }
}

/// The three front stages fused into one actor, for the collapsed topology
pub(crate) struct CollapsedEmitter {
    emitter: L34Emitter,
    parser: L34Worker,
    batcher: L7Emitter,
}

impl CollapsedEmitter {
    pub(crate) fn new(emitter: L34Emitter, parser: L34Worker, batcher: L7Emitter) -> Self {
        Self {
            emitter,
            parser,
            batcher,
        }
    }

    /// Run one emit-parse-scatter round. Returns true when EOS was emitted.
    pub(crate) fn step(&mut self) -> bool {
        let output = self.emitter.step();
        if let Some(mut batch) = output.batch {
            self.parser.process(&mut batch);
            self.batcher.scatter(batch);
        }
        if output.eos {
            self.batcher.flush();
            self.batcher.broadcast_eos();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::tests::ScriptDissector;
    use crate::core::task::TaskAllocator;
    use crate::core::task::NumaPolicy;
    use crate::source::VecSource;
    use bytes::Bytes;
    use crossbeam::channel::{bounded, Receiver};
    use std::time::SystemTime;

    const GRAIN: usize = 4;

    fn pool() -> Arc<TaskPool> {
        Arc::new(TaskPool::new(8, TaskAllocator::new(NumaPolicy::Off)))
    }

    fn parsed_slot(dest_worker: usize, user_tag: u64) -> ParsedSlot {
        ParsedSlot {
            verdict: SlotVerdict::Fragment,
            flow_hash: 0,
            dest_worker,
            user_tag,
        }
    }

    fn batch_with(slots: Vec<ParsedSlot>) -> Box<TaskBatch> {
        let mut batch = TaskBatch::empty();
        for (i, slot) in slots.into_iter().enumerate() {
            batch.slots[i] = TaskSlot::Parsed(slot);
        }
        batch
    }

    fn worker_channels(n: usize) -> (Vec<Sender<StageMsg>>, Vec<Receiver<StageMsg>>) {
        (0..n).map(|_| bounded(16)).unzip()
    }

    #[test]
    fn test_emitter_emits_full_batch_and_partial_at_eos() {
        let packets = (0..6)
            .map(|i| crate::core::packet::StrixPacket::new(Bytes::new(), SystemTime::UNIX_EPOCH, i))
            .collect();
        let control = Arc::new(ControlFlags::new());
        let metrics = Arc::new(PipelineMetrics::new());
        let mut emitter = L34Emitter::new(
            Box::new(VecSource::new(packets)),
            GRAIN,
            pool(),
            Arc::clone(&control),
            Arc::clone(&metrics),
        );

        let first = emitter.step();
        assert!(!first.eos);
        let batch = first.batch.unwrap();
        assert_eq!(
            batch.slots.iter().filter(|s| matches!(s, TaskSlot::Input(_))).count(),
            GRAIN
        );

        // Source dries up mid-batch: the two remaining packets are still
        // emitted, Empty-padded, with EOS to follow.
        let second = emitter.step();
        assert!(second.eos);
        let batch = second.batch.unwrap();
        assert_eq!(
            batch.slots.iter().filter(|s| matches!(s, TaskSlot::Input(_))).count(),
            2
        );
        assert!(control.terminating());
        assert_eq!(metrics.packets_read(), 6);
    }

    #[test]
    fn test_emitter_freeze_between_slots() {
        let control = Arc::new(ControlFlags::new());
        let freeze = Arc::clone(&control);
        let mut sent = 0u64;
        let source = move || {
            sent += 1;
            if sent == 2 {
                // Freeze lands after this packet is handed over.
                freeze.request_freeze();
            }
            Some(crate::core::packet::StrixPacket::new(
                Bytes::new(),
                SystemTime::UNIX_EPOCH,
                sent,
            ))
        };
        let metrics = Arc::new(PipelineMetrics::new());
        let mut emitter = L34Emitter::new(
            Box::new(source),
            GRAIN,
            pool(),
            Arc::clone(&control),
            metrics,
        );

        let output = emitter.step();
        assert!(output.eos);
        assert!(!control.terminating());
        let batch = output.batch.unwrap();
        assert_eq!(
            batch.slots.iter().filter(|s| matches!(s, TaskSlot::Input(_))).count(),
            2
        );
    }

    #[test]
    fn test_l34_worker_routes_by_hash() {
        let dissector: Arc<dyn Dissector> = Arc::new(ScriptDissector::default());
        let worker = L34Worker::new(Arc::clone(&dissector), GRAIN, 4, 16, 16);

        let mut batch = TaskBatch::empty();
        batch.slots[0] = TaskSlot::Input(ScriptDissector::udp_packet(1111, 2222, 0));
        batch.slots[1] = TaskSlot::Input(ScriptDissector::fragment_packet(1));
        batch.slots[2] = TaskSlot::Input(ScriptDissector::error_packet(2));
        batch.slots[3] = TaskSlot::Input(ScriptDissector::icmp_packet(3));
        worker.process(&mut batch);

        match &batch.slots[0] {
            TaskSlot::Parsed(p) => {
                assert!(matches!(p.verdict, SlotVerdict::Ok(_)));
                assert_eq!(p.dest_worker, worker_for_hash(p.flow_hash, 4));
                assert_eq!(p.user_tag, 0);
            }
            other => panic!("unexpected slot {:?}", other),
        }
        match &batch.slots[1] {
            TaskSlot::Parsed(p) => {
                assert!(matches!(p.verdict, SlotVerdict::Fragment));
                assert_eq!(p.dest_worker, 0);
            }
            other => panic!("unexpected slot {:?}", other),
        }
        match &batch.slots[2] {
            TaskSlot::Parsed(p) => assert!(matches!(p.verdict, SlotVerdict::Error(_))),
            other => panic!("unexpected slot {:?}", other),
        }
        match &batch.slots[3] {
            TaskSlot::Parsed(p) => {
                assert!(matches!(p.verdict, SlotVerdict::TransportNotSupported))
            }
            other => panic!("unexpected slot {:?}", other),
        }
    }

    #[test]
    fn test_batcher_dispatches_on_full_grain() {
        let (txs, rxs) = worker_channels(2);
        let mut batcher = L7Emitter::new(GRAIN, txs);

        // Five slots for worker 0: one full batch out, one slot left over.
        for chunk in 0..2 {
            let slots = (0..GRAIN)
                .map(|i| parsed_slot(if chunk == 0 || i == 0 { 0 } else { 1 }, (chunk * GRAIN + i) as u64))
                .collect();
            batcher.scatter(batch_with(slots));
        }

        let msg = rxs[0].try_recv().expect("worker 0 batch");
        match msg {
            StageMsg::Batch(batch) => {
                let tags: Vec<u64> = batch
                    .slots
                    .iter()
                    .filter_map(|s| match s {
                        TaskSlot::Parsed(p) => Some(p.user_tag),
                        _ => None,
                    })
                    .collect();
                assert_eq!(tags, vec![0, 1, 2, 3]);
            }
            StageMsg::Eos => panic!("unexpected EOS"),
        }
        // Worker 1 has only a partial accumulator so far.
        assert!(rxs[1].try_recv().is_err());

        // Every consumed inbound batch went back to the spare stack.
        assert_eq!(batcher.spare_batches(), 2 + 1);

        batcher.flush();
        for rx in &rxs {
            match rx.try_recv().expect("flushed partial") {
                StageMsg::Batch(batch) => {
                    assert!(batch
                        .slots
                        .iter()
                        .any(|s| matches!(s, TaskSlot::Parsed(_))));
                }
                StageMsg::Eos => panic!("unexpected EOS"),
            }
        }
    }

    #[test]
    fn test_batcher_preserves_slot_order_per_worker() {
        let (txs, rxs) = worker_channels(1);
        let mut batcher = L7Emitter::new(GRAIN, txs);
        for chunk in 0..2 {
            let slots = (0..GRAIN)
                .map(|i| parsed_slot(0, (chunk * GRAIN + i) as u64))
                .collect();
            batcher.scatter(batch_with(slots));
        }

        let mut seen = Vec::new();
        while let Ok(StageMsg::Batch(batch)) = rxs[0].try_recv() {
            for slot in &batch.slots {
                if let TaskSlot::Parsed(p) = slot {
                    seen.push(p.user_tag);
                }
            }
        }
        assert_eq!(seen, (0..8).collect::<Vec<u64>>());
    }

    #[test]
    fn test_l7_worker_truncates_batch_on_max_flows() {
        let dissector: Arc<dyn Dissector> = Arc::new(ScriptDissector::default());
        let metrics = Arc::new(PipelineMetrics::new());
        // One-flow budget on the v4 shard.
        let mut worker = L7Worker::new(
            0,
            GRAIN,
            Arc::clone(&dissector),
            FlowShard::new(0, 0, 16, 1),
            FlowShard::new(0, 0, 16, 1),
            None,
            Arc::clone(&metrics),
        );

        let l34 = L34Worker::new(Arc::clone(&dissector), GRAIN, 1, 16, 16);
        let mut batch = TaskBatch::empty();
        batch.slots[0] = TaskSlot::Input(ScriptDissector::udp_packet(1000, 2000, 0));
        batch.slots[1] = TaskSlot::Input(ScriptDissector::udp_packet(1001, 2001, 1));
        batch.slots[2] = TaskSlot::Input(ScriptDissector::udp_packet(1002, 2002, 2));
        l34.process(&mut batch);
        worker.process(&mut batch);

        let statuses: Vec<ProcessingStatus> = batch
            .slots
            .iter()
            .filter_map(|s| match s {
                TaskSlot::Output(r) => Some(r.status),
                _ => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                ProcessingStatus::Ok,
                ProcessingStatus::MaxFlows,
                ProcessingStatus::MaxFlows,
            ]
        );
        assert_eq!(metrics.max_flows_hits(), 1);
        assert_eq!(worker.v4_flow_count(), 1);
    }

    #[test]
    fn test_collector_delivers_and_recycles() {
        let pool = pool();
        let delivered = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_results = Arc::clone(&delivered);
        let sink = move |result: ProcessingResult| {
            sink_results.lock().unwrap().push(result.user_tag);
        };
        let metrics = Arc::new(PipelineMetrics::new());
        let mut collector = L7Collector::new(
            Box::new(sink),
            GRAIN,
            Arc::clone(&pool),
            Arc::clone(&metrics),
        );

        let mut batch = TaskBatch::empty();
        batch.slots[0] = TaskSlot::Output(ProcessingResult::bare(ProcessingStatus::Ok, 10));
        batch.slots[2] = TaskSlot::Output(ProcessingResult::bare(ProcessingStatus::Ok, 11));
        collector.collect(batch);

        assert_eq!(*delivered.lock().unwrap(), vec![10, 11]);
        assert_eq!(metrics.packets_delivered(), 2);
        assert_eq!(pool.len(), 1);
    }
}
