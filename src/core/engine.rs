//! Pipeline runtime
//!
//! `StrixPipeline` builds the actor topology from a validated configuration,
//! spawns one pinned OS thread per actor, and drives the cooperative
//! lifecycle: freeze (stop consuming input at the next slot boundary, drain
//! in-flight batches, park the front stage), unfreeze, terminate, join.
//!
//! Inter-stage links are bounded crossbeam channels, single-producer /
//! single-consumer by construction; the fan-in from the L7 workers to the
//! collector preserves per-producer FIFO order, which together with flow
//! affinity yields per-flow delivery order.

use crate::config::{ConfigError, StrixConfig};
use crate::core::flow::{FlowCleanupFn, FlowShard};
use crate::core::task::{NumaPolicy, TaskAllocator, TaskPool};
use crate::core::worker::{
    CollapsedEmitter, L34Emitter, L34Worker, L7Collector, L7Emitter, L7Worker, StageMsg,
};
use crate::dissector::Dissector;
use crate::source::{PacketSource, ResultSink};
use crate::utils::metrics::PipelineMetrics;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Capacity of each inter-stage queue
const STAGE_QUEUE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn pipeline thread: {0}")]
    Spawn(String),

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline not started")]
    NotStarted,

    #[error("a pipeline stage panicked")]
    StagePanicked,
}

/// Shared cancellation and lifecycle flags.
///
/// `freeze` and `terminating` are each written by one side and read with
/// acquire/release ordering; the condvars only come into play at freeze
/// boundaries, never on the per-packet path.
pub(crate) struct ControlFlags {
    freeze: AtomicBool,
    terminating: AtomicBool,
    resume: Mutex<()>,
    resume_cv: Condvar,
    drained: Mutex<u64>,
    drained_cv: Condvar,
}

impl ControlFlags {
    pub(crate) fn new() -> Self {
        Self {
            freeze: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            resume: Mutex::new(()),
            resume_cv: Condvar::new(),
            drained: Mutex::new(0),
            drained_cv: Condvar::new(),
        }
    }

    pub(crate) fn freeze_requested(&self) -> bool {
        self.freeze.load(Ordering::Acquire)
    }

    pub(crate) fn request_freeze(&self) {
        self.freeze.store(true, Ordering::Release);
    }

    pub(crate) fn terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    /// Request shutdown and wake a parked front stage
    pub(crate) fn set_terminating(&self) {
        {
            let _guard = self.resume.lock().unwrap();
            self.terminating.store(true, Ordering::Release);
        }
        self.resume_cv.notify_all();
        {
            let _guard = self.drained.lock().unwrap();
        }
        self.drained_cv.notify_all();
    }

    /// Clear the freeze flag and wake the parked front stage. The flag is
    /// cleared under the resume lock so the wakeup cannot be lost.
    pub(crate) fn resume_from_freeze(&self) {
        {
            let _guard = self.resume.lock().unwrap();
            self.freeze.store(false, Ordering::Release);
        }
        self.resume_cv.notify_all();
    }

    /// Park until the freeze is lifted or shutdown is requested
    pub(crate) fn wait_resume(&self) {
        let mut guard = self.resume.lock().unwrap();
        while self.freeze_requested() && !self.terminating() {
            guard = self.resume_cv.wait(guard).unwrap();
        }
        drop(guard);
    }

    pub(crate) fn drained_generation(&self) -> u64 {
        *self.drained.lock().unwrap()
    }

    /// Record that one EOS wave fully drained through the collector
    pub(crate) fn mark_drained(&self) {
        {
            let mut generation = self.drained.lock().unwrap();
            *generation += 1;
        }
        self.drained_cv.notify_all();
    }

    /// Block until a drain completes after `seen`, or shutdown
    pub(crate) fn wait_drained(&self, seen: u64) {
        let mut generation = self.drained.lock().unwrap();
        while *generation == seen && !self.terminating() {
            generation = self.drained_cv.wait(generation).unwrap();
        }
    }
}

/// The collaborators a pipeline is built around
pub struct PipelineParts {
    pub dissector: Arc<dyn Dissector>,
    pub source: Box<dyn PacketSource>,
    pub sink: Box<dyn ResultSink>,
    pub flow_cleanup: Option<Arc<FlowCleanupFn>>,
}

/// The multi-core DPI pipeline
pub struct StrixPipeline {
    config: StrixConfig,
    control: Arc<ControlFlags>,
    pool: Arc<TaskPool>,
    metrics: Arc<PipelineMetrics>,
    parts: Option<PipelineParts>,
    threads: Vec<JoinHandle<()>>,
}

impl StrixPipeline {
    /// Validate the configuration and assemble a pipeline. Call `start` to
    /// spawn the stage threads.
    pub fn new(config: StrixConfig, parts: PipelineParts) -> Result<Self, PipelineError> {
        config.validate()?;
        let policy = config
            .pipeline
            .numa_node
            .map(NumaPolicy::TasksOnNode)
            .unwrap_or(NumaPolicy::Off);
        let pool = Arc::new(TaskPool::new(
            config.pipeline.tasks_pool_size,
            TaskAllocator::new(policy),
        ));

        Ok(Self {
            config,
            control: Arc::new(ControlFlags::new()),
            pool,
            metrics: Arc::new(PipelineMetrics::new()),
            parts: Some(parts),
            threads: Vec::new(),
        })
    }

    /// Spawn and pin the stage threads
    pub fn start(&mut self) -> Result<(), PipelineError> {
        let parts = self.parts.take().ok_or(PipelineError::AlreadyStarted)?;
        let p = &self.config.pipeline;
        let t = &self.config.flow_table;
        let grain = p.grain_size;
        let num_workers = p.num_l7_workers;
        let collapsed = p.collapsed;
        let cpu_ids = p.cpu_ids.clone();
        let cpu = |index: usize| cpu_ids.get(index).copied();

        let v4_shards = FlowShard::build(num_workers, t.v4_rows, t.max_active_v4_flows);
        let v6_shards = FlowShard::build(num_workers, t.v6_rows, t.max_active_v6_flows);

        let (worker_txs, worker_rxs): (Vec<Sender<StageMsg>>, Vec<Receiver<StageMsg>>) =
            (0..num_workers).map(|_| bounded(STAGE_QUEUE_DEPTH)).unzip();
        let (collector_tx, collector_rx) = bounded(STAGE_QUEUE_DEPTH * num_workers);

        let emitter = L34Emitter::new(
            parts.source,
            grain,
            Arc::clone(&self.pool),
            Arc::clone(&self.control),
            Arc::clone(&self.metrics),
        );
        let parser = L34Worker::new(
            Arc::clone(&parts.dissector),
            grain,
            num_workers,
            t.v4_rows,
            t.v6_rows,
        );
        let batcher = L7Emitter::new(grain, worker_txs);

        if collapsed {
            self.spawn_collapsed_front(emitter, parser, batcher, cpu(0))?;
        } else {
            self.spawn_staged_front(emitter, parser, batcher, [cpu(0), cpu(1), cpu(2)])?;
        }

        let worker_cpu_base = if collapsed { 1 } else { 3 };
        for (worker_id, ((rx, v4_shard), v6_shard)) in worker_rxs
            .into_iter()
            .zip(v4_shards)
            .zip(v6_shards)
            .enumerate()
        {
            let mut worker = L7Worker::new(
                worker_id,
                grain,
                Arc::clone(&parts.dissector),
                v4_shard,
                v6_shard,
                parts.flow_cleanup.clone(),
                Arc::clone(&self.metrics),
            );
            let control = Arc::clone(&self.control);
            let tx = collector_tx.clone();
            let worker_cpu = cpu(worker_cpu_base + worker_id);
            self.spawn(&format!("strix-l7-worker-{}", worker_id), move || {
                pin_to_cpu("l7-worker", worker_cpu);
                while let Ok(msg) = rx.recv() {
                    match msg {
                        StageMsg::Batch(mut batch) => {
                            worker.process(&mut batch);
                            let _ = tx.send(StageMsg::Batch(batch));
                        }
                        StageMsg::Eos => {
                            let _ = tx.send(StageMsg::Eos);
                            if control.terminating() {
                                break;
                            }
                        }
                    }
                }
                worker.shutdown();
            })?;
        }
        drop(collector_tx);

        let mut collector = L7Collector::new(
            parts.sink,
            grain,
            Arc::clone(&self.pool),
            Arc::clone(&self.metrics),
        );
        let control = Arc::clone(&self.control);
        let pool = Arc::clone(&self.pool);
        let collector_cpu = cpu(worker_cpu_base + num_workers);
        self.spawn("strix-l7-collector", move || {
            pin_to_cpu("l7-collector", collector_cpu);
            let mut eos_seen = 0usize;
            while let Ok(msg) = collector_rx.recv() {
                match msg {
                    StageMsg::Batch(batch) => collector.collect(batch),
                    StageMsg::Eos => {
                        eos_seen += 1;
                        if eos_seen == num_workers {
                            eos_seen = 0;
                            if control.terminating() {
                                pool.drain();
                                control.mark_drained();
                                break;
                            }
                            control.mark_drained();
                        }
                    }
                }
            }
            debug!("collector exiting");
        })?;

        info!(
            workers = num_workers,
            grain,
            collapsed,
            "pipeline started"
        );
        Ok(())
    }

    fn spawn_collapsed_front(
        &mut self,
        emitter: L34Emitter,
        parser: L34Worker,
        batcher: L7Emitter,
        front_cpu: Option<usize>,
    ) -> Result<(), PipelineError> {
        let control = Arc::clone(&self.control);
        let pool = Arc::clone(&self.pool);
        let mut front = CollapsedEmitter::new(emitter, parser, batcher);
        self.spawn("strix-front", move || {
            pin_to_cpu("front", front_cpu);
            pool.prefill();
            loop {
                if front.step() {
                    if control.terminating() {
                        break;
                    }
                    control.wait_resume();
                    if control.terminating() {
                        // A final EOS wave lets the back stages exit.
                        front.step();
                        break;
                    }
                }
            }
            debug!("front actor exiting");
        })
    }

    fn spawn_staged_front(
        &mut self,
        mut emitter: L34Emitter,
        parser: L34Worker,
        mut batcher: L7Emitter,
        cpus: [Option<usize>; 3],
    ) -> Result<(), PipelineError> {
        let (emit_tx, emit_rx) = bounded::<StageMsg>(STAGE_QUEUE_DEPTH);
        let (parse_tx, parse_rx) = bounded::<StageMsg>(STAGE_QUEUE_DEPTH);

        let control = Arc::clone(&self.control);
        let pool = Arc::clone(&self.pool);
        self.spawn("strix-l34-emitter", move || {
            pin_to_cpu("l34-emitter", cpus[0]);
            pool.prefill();
            loop {
                let output = emitter.step();
                if let Some(batch) = output.batch {
                    let _ = emit_tx.send(StageMsg::Batch(batch));
                }
                if output.eos {
                    let _ = emit_tx.send(StageMsg::Eos);
                    if control.terminating() {
                        break;
                    }
                    control.wait_resume();
                    if control.terminating() {
                        let _ = emit_tx.send(StageMsg::Eos);
                        break;
                    }
                }
            }
            debug!("L34 emitter exiting");
        })?;

        let control = Arc::clone(&self.control);
        self.spawn("strix-l34-worker", move || {
            pin_to_cpu("l34-worker", cpus[1]);
            while let Ok(msg) = emit_rx.recv() {
                match msg {
                    StageMsg::Batch(mut batch) => {
                        parser.process(&mut batch);
                        let _ = parse_tx.send(StageMsg::Batch(batch));
                    }
                    StageMsg::Eos => {
                        let _ = parse_tx.send(StageMsg::Eos);
                        if control.terminating() {
                            break;
                        }
                    }
                }
            }
            debug!("L34 worker exiting");
        })?;

        let control = Arc::clone(&self.control);
        self.spawn("strix-l7-emitter", move || {
            pin_to_cpu("l7-emitter", cpus[2]);
            while let Ok(msg) = parse_rx.recv() {
                match msg {
                    StageMsg::Batch(batch) => batcher.scatter(batch),
                    StageMsg::Eos => {
                        batcher.flush();
                        batcher.broadcast_eos();
                        if control.terminating() {
                            break;
                        }
                    }
                }
            }
            debug!("L7 emitter exiting");
        })
    }

    fn spawn<F>(&mut self, name: &str, f: F) -> Result<(), PipelineError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| {
                self.control.set_terminating();
                PipelineError::Spawn(e.to_string())
            })?;
        self.threads.push(handle);
        Ok(())
    }

    /// Stop consuming input at the next slot boundary and block until every
    /// in-flight batch has drained to the sink. The packet source callback
    /// is not interrupted; a freeze takes effect when it next returns.
    pub fn freeze(&self) -> Result<(), PipelineError> {
        if self.parts.is_some() {
            return Err(PipelineError::NotStarted);
        }
        if self.control.terminating() {
            return Ok(());
        }
        let seen = self.control.drained_generation();
        self.control.request_freeze();
        self.control.wait_drained(seen);
        Ok(())
    }

    /// Resume a frozen pipeline
    pub fn unfreeze(&self) -> Result<(), PipelineError> {
        if self.parts.is_some() {
            return Err(PipelineError::NotStarted);
        }
        self.control.resume_from_freeze();
        Ok(())
    }

    /// Request shutdown. Takes effect at the next batch boundary, or
    /// immediately for a frozen pipeline.
    pub fn terminate(&self) {
        self.control.set_terminating();
    }

    /// Wait for EOS to drain and every stage thread to exit
    pub fn join(&mut self) -> Result<(), PipelineError> {
        if self.parts.is_some() {
            return Err(PipelineError::NotStarted);
        }
        let mut panicked = false;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                panicked = true;
            }
        }
        if panicked {
            Err(PipelineError::StagePanicked)
        } else {
            Ok(())
        }
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &StrixConfig {
        &self.config
    }
}

impl Drop for StrixPipeline {
    /// Request shutdown and wait for the stages. Blocks until the packet
    /// source returns, like `join`.
    fn drop(&mut self) {
        if !self.threads.is_empty() {
            self.terminate();
            for handle in self.threads.drain(..) {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn pin_to_cpu(stage: &str, cpu: Option<usize>) {
    let Some(cpu) = cpu else { return };
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        if libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set) != 0 {
            warn!(stage, cpu, "sched_setaffinity failed");
        } else {
            debug!(stage, cpu, "thread pinned");
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn pin_to_cpu(stage: &str, cpu: Option<usize>) {
    if cpu.is_some() {
        debug!(stage, "CPU pinning unavailable on this platform");
    }
}
