//! Task batches and the batch recycling pool
//!
//! A task batch is the unit of inter-stage communication: a cache-line
//! aligned record of `MAX_GRAIN` slots, of which the configured grain-size
//! prefix is in use. Each slot is tagged with its pipeline stage; a batch
//! holds slots of one stage at a time, and stages consume a slot by taking
//! it out before writing the next stage's variant back.

use crate::core::packet::{PacketInfo, ParseError, ProcessingResult, StrixPacket};
use crate::MAX_GRAIN;
use crossbeam::queue::ArrayQueue;
use tracing::debug;

/// L3/L4 outcome recorded in a parsed slot
#[derive(Debug)]
pub enum SlotVerdict {
    /// Routable packet with a valid flow tuple
    Ok(PacketInfo),
    /// Reassembled final fragment; the buffer in `PacketInfo.data` is owned
    /// by the pipeline and dropped after the L7 step
    LastFragment(PacketInfo),
    /// Non-terminal fragment, delivered without flow lookup
    Fragment,
    /// L4 protocol outside TCP/UDP
    TransportNotSupported,
    Error(ParseError),
}

/// One slot of an L34 output batch
#[derive(Debug)]
pub struct ParsedSlot {
    pub verdict: SlotVerdict,
    /// Row index into the flow table of the packet's IP version; 0 for
    /// non-routable verdicts
    pub flow_hash: u32,
    /// Owning L7 worker (`flow_hash / rows_per_worker`); 0 for non-routable
    /// verdicts so their statuses still reach the sink
    pub dest_worker: usize,
    pub user_tag: u64,
}

/// A batch slot, tagged by the stage that last wrote it
#[derive(Debug, Default)]
pub enum TaskSlot {
    /// Unused slot (shutdown / flush padding)
    #[default]
    Empty,
    /// Filled by the L34 emitter
    Input(StrixPacket),
    /// Filled by the L34 worker
    Parsed(ParsedSlot),
    /// Filled by an L7 worker
    Output(ProcessingResult),
}

impl TaskSlot {
    /// Take the slot's contents, leaving it `Empty`
    #[inline]
    pub fn take(&mut self) -> TaskSlot {
        std::mem::take(self)
    }
}

/// Fixed-grain record exchanged between pipeline stages
#[repr(align(64))]
#[derive(Debug)]
pub struct TaskBatch {
    pub slots: [TaskSlot; MAX_GRAIN],
}

impl TaskBatch {
    pub fn empty() -> Box<TaskBatch> {
        Box::new(TaskBatch {
            slots: std::array::from_fn(|_| TaskSlot::Empty),
        })
    }

    /// Reset every slot to `Empty`
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = TaskSlot::Empty;
        }
    }
}

/// Allocation preference for task storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumaPolicy {
    /// System allocator placement
    Off,
    /// Prefer the given NUMA node. Placement is obtained by first-touch:
    /// the pool is prefilled on the pinned emitter thread, so pages land on
    /// that thread's node.
    TasksOnNode(u32),
}

/// Allocates task batches according to the configured policy
#[derive(Debug, Clone, Copy)]
pub struct TaskAllocator {
    policy: NumaPolicy,
}

impl TaskAllocator {
    pub fn new(policy: NumaPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> NumaPolicy {
        self.policy
    }

    /// Allocate a fresh batch. `TaskBatch` carries its own cache-line
    /// alignment, so the box is aligned regardless of policy.
    pub fn allocate(&self) -> Box<TaskBatch> {
        TaskBatch::empty()
    }
}

/// Bounded recycling pool of task batches.
///
/// Single-producer (the collector recycles) / single-consumer (the emitter
/// acquires) by construction. Never blocks: an empty pool allocates, a full
/// pool frees.
pub struct TaskPool {
    ring: ArrayQueue<Box<TaskBatch>>,
    allocator: TaskAllocator,
}

impl TaskPool {
    pub fn new(capacity: usize, allocator: TaskAllocator) -> Self {
        Self {
            ring: ArrayQueue::new(capacity),
            allocator,
        }
    }

    /// Fill the pool to capacity. Run on the emitter thread after pinning so
    /// first-touch places the batches near their consumer.
    pub fn prefill(&self) {
        while self.ring.push(self.allocator.allocate()).is_ok() {}
        debug!(capacity = self.ring.capacity(), "task pool prefilled");
    }

    /// Pop a recycled batch, or allocate when the pool is empty
    pub fn acquire(&self) -> Box<TaskBatch> {
        self.ring.pop().unwrap_or_else(|| self.allocator.allocate())
    }

    /// Return a batch to the pool; frees it when the pool is full
    pub fn recycle(&self, mut batch: Box<TaskBatch>) {
        batch.clear();
        let _ = self.ring.push(batch);
    }

    /// Free every pooled batch. Called at shutdown.
    pub fn drain(&self) {
        let mut freed = 0usize;
        while self.ring.pop().is_some() {
            freed += 1;
        }
        debug!(freed, "task pool drained");
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::{ProcessingStatus, ProcessingResult};

    #[test]
    fn test_batch_is_cache_line_aligned() {
        assert_eq!(std::mem::align_of::<TaskBatch>() % crate::CACHE_LINE_SIZE, 0);
        let batch = TaskBatch::empty();
        assert_eq!(&*batch as *const TaskBatch as usize % crate::CACHE_LINE_SIZE, 0);
    }

    #[test]
    fn test_slot_take_leaves_empty() {
        let mut slot = TaskSlot::Output(ProcessingResult::bare(ProcessingStatus::Ok, 7));
        match slot.take() {
            TaskSlot::Output(result) => assert_eq!(result.user_tag, 7),
            other => panic!("unexpected slot {:?}", other),
        }
        assert!(matches!(slot, TaskSlot::Empty));
    }

    #[test]
    fn test_pool_acquire_allocates_when_empty() {
        let pool = TaskPool::new(2, TaskAllocator::new(NumaPolicy::Off));
        assert!(pool.is_empty());
        let batch = pool.acquire();
        assert!(batch.slots.iter().all(|s| matches!(s, TaskSlot::Empty)));
    }

    #[test]
    fn test_pool_recycle_bounds_and_clears() {
        let pool = TaskPool::new(1, TaskAllocator::new(NumaPolicy::Off));
        let mut dirty = TaskBatch::empty();
        dirty.slots[0] = TaskSlot::Output(ProcessingResult::bare(ProcessingStatus::Ok, 1));
        pool.recycle(dirty);
        assert_eq!(pool.len(), 1);
        // A second recycle into the full pool frees the batch instead.
        pool.recycle(TaskBatch::empty());
        assert_eq!(pool.len(), 1);

        let clean = pool.acquire();
        assert!(clean.slots.iter().all(|s| matches!(s, TaskSlot::Empty)));
    }

    #[test]
    fn test_pool_drain() {
        let pool = TaskPool::new(4, TaskAllocator::new(NumaPolicy::Off));
        pool.prefill();
        assert_eq!(pool.len(), 4);
        pool.drain();
        assert!(pool.is_empty());
    }
}
