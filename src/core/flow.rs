//! Flow tracking module
//!
//! This module defines the flow key, the flow hashers that drive worker
//! sharding, and the per-worker flow table shards.
//!
//! The two tables (IPv4 and IPv6) are partitioned by worker id: worker `w`
//! exclusively owns rows `[w * rows_per_worker, (w + 1) * rows_per_worker)`.
//! Shards are moved into their worker threads, so a flow row has exactly one
//! mutator at any instant by construction.

use crate::core::packet::PacketInfo;
use crate::dissector::FlowState;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::SystemTime;
use tracing::trace;

/// Unique identifier for a flow, stored in first-seen orientation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: crate::core::packet::TransportProto,
}

impl FlowKey {
    /// Create a flow key from a parsed packet
    pub fn from_info(info: &PacketInfo) -> Self {
        Self {
            src_ip: info.src_ip,
            dst_ip: info.dst_ip,
            src_port: info.src_port,
            dst_port: info.dst_port,
            proto: info.proto,
        }
    }

    /// The same conversation seen from the other side
    pub fn reversed(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            proto: self.proto,
        }
    }

    /// Which direction of this flow a packet key corresponds to, if any
    pub fn direction_of(&self, other: &FlowKey) -> Option<FlowDirection> {
        if self == other {
            Some(FlowDirection::ToServer)
        } else if &self.reversed() == other {
            Some(FlowDirection::ToClient)
        } else {
            None
        }
    }
}

/// Flow direction relative to the first packet seen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    /// Same orientation as the first packet of the flow
    ToServer,
    /// Reply direction
    ToClient,
}

fn endpoint_pair(info: &PacketInfo) -> [(IpAddr, u16); 2] {
    let a = (info.src_ip, info.src_port);
    let b = (info.dst_ip, info.dst_port);
    // Canonical endpoint order makes the hash direction-independent, so
    // both halves of a conversation land on the same row.
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

fn hash_endpoints(info: &PacketInfo, rows: u32) -> u32 {
    let [lo, hi] = endpoint_pair(info);
    let mut hasher = DefaultHasher::new();
    lo.hash(&mut hasher);
    hi.hash(&mut hasher);
    match info.proto {
        crate::core::packet::TransportProto::Tcp => 6u8.hash(&mut hasher),
        crate::core::packet::TransportProto::Udp => 17u8.hash(&mut hasher),
        crate::core::packet::TransportProto::Other(p) => p.hash(&mut hasher),
    }
    (hasher.finish() % rows as u64) as u32
}

/// Hash an IPv4 flow into `[0, rows)`
pub fn flow_hash_v4(info: &PacketInfo, rows: u32) -> u32 {
    hash_endpoints(info, rows)
}

/// Hash an IPv6 flow into `[0, rows)`
pub fn flow_hash_v6(info: &PacketInfo, rows: u32) -> u32 {
    hash_endpoints(info, rows)
}

/// Map a flow hash to its owning worker.
///
/// The integer division is the only hash-to-worker mapping in the pipeline;
/// it is monotone in the hash, giving each worker a contiguous row range.
#[inline]
pub fn worker_for_hash(hash: u32, rows_per_worker: u32) -> usize {
    (hash / rows_per_worker) as usize
}

/// A tracked flow: key, dissector state, bookkeeping
#[derive(Debug)]
pub struct FlowRow {
    pub key: FlowKey,
    pub state: FlowState,
    pub last_seen: SystemTime,
}

/// Outcome of a shard lookup
pub struct FlowRef<'a> {
    pub row: &'a mut FlowRow,
    pub direction: FlowDirection,
    /// True if this lookup created the row
    pub created: bool,
}

/// Callback invoked with a flow's key and dissector state when its row is
/// deleted (connection teardown or shard drop)
pub type FlowCleanupFn = dyn Fn(&FlowKey, FlowState) + Send + Sync;

/// The contiguous slice of one flow table owned by a single L7 worker
#[derive(Debug)]
pub struct FlowShard {
    worker_id: usize,
    /// Global index of this shard's first row
    base_row: u32,
    /// One chained bucket per row
    rows: Vec<Vec<FlowRow>>,
    /// Live-flow budget for this shard
    max_active: u32,
    active: u32,
}

impl FlowShard {
    pub fn new(worker_id: usize, base_row: u32, rows_per_worker: u32, max_active: u32) -> Self {
        Self {
            worker_id,
            base_row,
            rows: (0..rows_per_worker).map(|_| Vec::new()).collect(),
            max_active,
            active: 0,
        }
    }

    /// Number of live flows in this shard
    pub fn len(&self) -> u32 {
        self.active
    }

    pub fn is_empty(&self) -> bool {
        self.active == 0
    }

    fn local_index(&self, hash: u32) -> usize {
        let local = hash.checked_sub(self.base_row);
        // A hash outside this shard's range means the sharding discipline
        // is broken upstream; that is a pipeline integrity violation.
        assert!(
            matches!(local, Some(l) if (l as usize) < self.rows.len()),
            "flow hash {} outside shard of worker {}",
            hash,
            self.worker_id
        );
        local.unwrap() as usize
    }

    /// Find the flow for `info`, creating it on first sight.
    ///
    /// Returns `None` when the shard is at its live-flow budget.
    pub fn find_or_create(&mut self, hash: u32, info: &PacketInfo) -> Option<FlowRef<'_>> {
        let idx = self.local_index(hash);
        let key = FlowKey::from_info(info);

        let pos = self.rows[idx]
            .iter()
            .position(|row| row.key.direction_of(&key).is_some());

        if let Some(pos) = pos {
            let row = &mut self.rows[idx][pos];
            let direction = row.key.direction_of(&key).unwrap();
            row.last_seen = info.timestamp;
            return Some(FlowRef {
                row,
                direction,
                created: false,
            });
        }

        if self.active >= self.max_active {
            return None;
        }

        trace!(worker = self.worker_id, hash, "creating flow row");
        self.rows[idx].push(FlowRow {
            key,
            state: FlowState::default(),
            last_seen: info.timestamp,
        });
        self.active += 1;
        let row = self.rows[idx].last_mut().unwrap();
        Some(FlowRef {
            row,
            direction: FlowDirection::ToServer,
            created: true,
        })
    }

    /// Delete the flow row matching `key`, invoking the cleanup callback
    /// with its state
    pub fn delete(&mut self, hash: u32, key: &FlowKey, cleanup: Option<&FlowCleanupFn>) {
        let idx = self.local_index(hash);
        if let Some(pos) = self.rows[idx]
            .iter()
            .position(|row| row.key.direction_of(key).is_some())
        {
            let row = self.rows[idx].swap_remove(pos);
            self.active -= 1;
            trace!(worker = self.worker_id, hash, "deleted flow row");
            if let Some(cleanup) = cleanup {
                cleanup(&row.key, row.state);
            }
        }
    }

    /// Tear down every remaining flow, invoking the cleanup callback for
    /// each. Used at pipeline shutdown.
    pub fn drain(&mut self, cleanup: Option<&FlowCleanupFn>) {
        for bucket in &mut self.rows {
            for row in bucket.drain(..) {
                if let Some(cleanup) = cleanup {
                    cleanup(&row.key, row.state);
                }
            }
        }
        self.active = 0;
    }

    /// Build the per-worker shards for one flow table
    pub fn build(workers: usize, total_rows: u32, max_active: u32) -> Vec<FlowShard> {
        let rows_per_worker = total_rows / workers as u32;
        let per_shard = max_active / workers as u32;
        (0..workers)
            .map(|w| FlowShard::new(w, w as u32 * rows_per_worker, rows_per_worker, per_shard))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::TransportProto;
    use bytes::Bytes;

    fn info(src: &str, sport: u16, dst: &str, dport: u16) -> PacketInfo {
        PacketInfo {
            ip_version: 4,
            proto: TransportProto::Udp,
            src_ip: src.parse().unwrap(),
            dst_ip: dst.parse().unwrap(),
            src_port: sport,
            dst_port: dport,
            l7_offset: 0,
            tcp_flags: None,
            data: Bytes::new(),
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_hash_is_deterministic_and_bounded() {
        let a = info("192.168.1.1", 1234, "10.0.0.1", 53);
        for rows in [1u32, 7, 64, 4096] {
            let h = flow_hash_v4(&a, rows);
            assert!(h < rows);
            assert_eq!(h, flow_hash_v4(&a, rows));
        }
    }

    #[test]
    fn test_hash_is_direction_independent() {
        let fwd = info("192.168.1.1", 1234, "10.0.0.1", 53);
        let rev = info("10.0.0.1", 53, "192.168.1.1", 1234);
        assert_eq!(flow_hash_v4(&fwd, 4096), flow_hash_v4(&rev, 4096));
    }

    #[test]
    fn test_worker_mapping_is_monotone() {
        let rows_per_worker = 4;
        let mut last = 0;
        for hash in 0..16 {
            let w = worker_for_hash(hash, rows_per_worker);
            assert!(w >= last);
            last = w;
        }
        assert_eq!(worker_for_hash(3, 4), 0);
        assert_eq!(worker_for_hash(7, 4), 1);
        assert_eq!(worker_for_hash(15, 4), 3);
    }

    #[test]
    fn test_find_or_create_and_direction() {
        let mut shard = FlowShard::new(0, 0, 4, 8);
        let fwd = info("192.168.1.1", 1234, "10.0.0.1", 53);
        let rev = info("10.0.0.1", 53, "192.168.1.1", 1234);
        let h = flow_hash_v4(&fwd, 4);

        let first = shard.find_or_create(h, &fwd).unwrap();
        assert!(first.created);
        assert_eq!(first.direction, FlowDirection::ToServer);

        let reply = shard.find_or_create(h, &rev).unwrap();
        assert!(!reply.created);
        assert_eq!(reply.direction, FlowDirection::ToClient);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_max_active_budget() {
        let mut shard = FlowShard::new(0, 0, 4, 1);
        let a = info("192.168.1.1", 1000, "10.0.0.1", 80);
        let b = info("192.168.1.2", 2000, "10.0.0.2", 80);
        let ha = flow_hash_v4(&a, 4);
        let hb = flow_hash_v4(&b, 4);

        assert!(shard.find_or_create(ha, &a).is_some());
        assert!(shard.find_or_create(hb, &b).is_none());
        // The existing flow is still reachable.
        assert!(shard.find_or_create(ha, &a).is_some());
    }

    #[test]
    fn test_delete_invokes_cleanup() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let mut shard = FlowShard::new(0, 0, 4, 8);
        let pkt = info("192.168.1.1", 1234, "10.0.0.1", 53);
        let h = flow_hash_v4(&pkt, 4);
        shard.find_or_create(h, &pkt).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let cleanup: Box<FlowCleanupFn> =
            Box::new(move |_key, _state| {
                seen.fetch_add(1, Ordering::SeqCst);
            });

        shard.delete(h, &FlowKey::from_info(&pkt), Some(cleanup.as_ref()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(shard.is_empty());
    }

    #[test]
    #[should_panic(expected = "outside shard")]
    fn test_out_of_range_hash_asserts() {
        let mut shard = FlowShard::new(1, 4, 4, 8);
        let pkt = info("192.168.1.1", 1234, "10.0.0.1", 53);
        shard.find_or_create(0, &pkt);
    }
}
