//! Bounded, lossy, multi-reader broadcast buffer of flow records.
//!
//! A single writer (the agent's poller task) publishes records that
//! overwrite the oldest slot once the ring is full; any number of readers
//! follow independently via their own cursor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use vantage_model::FlowRecord;

struct Slot {
    seq: u64,
    record: FlowRecord,
}

/// Outcome of a single indexed read.
///
/// `ok = false` means the requested index has fallen off the tail (been
/// overwritten); `ok = true` with `None` means the slot has not been
/// written yet (the writer reserves before it publishes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub record: Option<FlowRecord>,
    pub ok: bool,
}

impl ReadResult {
    fn hit(record: FlowRecord) -> Self {
        ReadResult {
            record: Some(record),
            ok: true,
        }
    }
    fn not_yet_filled() -> Self {
        ReadResult {
            record: None,
            ok: true,
        }
    }
    fn out_of_range() -> Self {
        ReadResult {
            record: None,
            ok: false,
        }
    }
}

/// Fixed-capacity ring of flow records. Capacity must be a power of two.
pub struct FlowRing {
    capacity: u64,
    mask: u64,
    slots: Vec<RwLock<Option<Slot>>>,
    /// Index of the next slot to be written; also the exclusive "head".
    head: AtomicU64,
    notify: Notify,
}

impl FlowRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        let slots = (0..capacity).map(|_| RwLock::new(None)).collect();
        FlowRing {
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
            slots,
            head: AtomicU64::new(0),
            notify: Notify::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.capacity as usize
    }

    /// Current number of records retained (bounded by capacity).
    pub fn len(&self) -> usize {
        self.head.load(Ordering::Acquire).min(self.capacity) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Publish a record. Never blocks; overwrites the oldest slot when full.
    pub fn write(&self, record: FlowRecord) -> u64 {
        let idx = self.head.fetch_add(1, Ordering::AcqRel);
        let slot = (idx & self.mask) as usize;
        *self.slots[slot].write() = Some(Slot { seq: idx, record });
        self.notify.notify_waiters();
        idx
    }

    pub fn read(&self, idx: u64) -> ReadResult {
        let head = self.head.load(Ordering::Acquire);
        if idx >= head {
            return ReadResult::not_yet_filled();
        }
        if head - idx > self.capacity {
            return ReadResult::out_of_range();
        }
        let slot = (idx & self.mask) as usize;
        match &*self.slots[slot].read() {
            Some(s) if s.seq == idx => ReadResult::hit(s.record.clone()),
            _ => ReadResult::out_of_range(),
        }
    }

    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// The oldest index still retrievable, or `head` if the ring is empty.
    pub fn tail(&self) -> u64 {
        self.head().saturating_sub(self.capacity)
    }
}

/// A companion reader cursor tracking the next index to read.
pub struct RingReader {
    ring: Arc<FlowRing>,
    idx: u64,
}

impl RingReader {
    pub fn new(ring: Arc<FlowRing>, start_idx: u64) -> Self {
        RingReader { ring, idx: start_idx }
    }

    pub fn position(&self) -> u64 {
        self.idx
    }

    /// Reseek to the oldest index the ring still retains. Callers use this
    /// after a `next()` reports the out-of-range signal.
    pub fn catch_up(&mut self) {
        self.idx = self.ring.tail();
    }

    /// Read at the current position without blocking.
    ///
    /// Advances the cursor only when a record is returned. On the
    /// out-of-range signal the cursor is left in place — callers reseek
    /// with [`catch_up`](Self::catch_up) before retrying.
    pub fn next_result(&mut self) -> ReadResult {
        let result = self.ring.read(self.idx);
        if matches!(result.record, Some(_)) {
            self.idx += 1;
        }
        result
    }

    /// Convenience over [`next_result`](Self::next_result) for callers that
    /// don't care to distinguish "not yet filled" from "out of range".
    pub fn next(&mut self) -> Option<FlowRecord> {
        self.next_result().record
    }

    /// Reverse variant: steps backward from the current position.
    pub fn previous(&mut self) -> Option<FlowRecord> {
        while self.idx > self.ring.tail() {
            self.idx -= 1;
            let result = self.ring.read(self.idx);
            if result.ok {
                if let Some(rec) = result.record {
                    return Some(rec);
                }
            } else {
                return None;
            }
        }
        None
    }

    /// Blocking follow: yields records as they arrive, stopping when `ctx`
    /// is cancelled.
    pub fn next_follow(
        mut self,
        ctx: CancellationToken,
    ) -> impl futures_core_like::Stream<Item = FlowRecord> {
        async_stream::stream! {
            loop {
                let result = self.next_result();
                if let Some(rec) = result.record {
                    yield rec;
                    continue;
                }
                if !result.ok {
                    self.catch_up();
                    continue;
                }
                tokio::select! {
                    _ = self.ring.notify.notified() => continue,
                    _ = ctx.cancelled() => break,
                }
            }
        }
    }
}

/// Thin alias so `next_follow`'s return type doesn't force a direct
/// `futures_core` dependency on every caller of this module.
mod futures_core_like {
    pub use futures::Stream;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use vantage_model::{FlowTime, IpHeader, IpVersion};

    fn sample(n: u64) -> FlowRecord {
        FlowRecord {
            time: FlowTime { secs: n, nanos: 0 },
            iface: "veth0".into(),
            skb_len: 0,
            node_name: "node-a".into(),
            ip: IpHeader {
                src: IpAddr::from([10, 0, 0, 1]),
                dst: IpAddr::from([10, 0, 0, 2]),
                version: IpVersion::V4,
            },
            l4: None,
            l7: None,
            source: None,
            destination: None,
        }
    }

    #[test]
    fn reader_from_zero_sees_all_writes_under_capacity() {
        let ring = Arc::new(FlowRing::new(4));
        for i in 0..3 {
            ring.write(sample(i));
        }
        let mut reader = RingReader::new(ring, 0);
        let seen: Vec<u64> = (0..3).filter_map(|_| reader.next()).map(|r| r.time.secs).collect();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn write_past_capacity_overwrites_oldest_slot() {
        let ring = FlowRing::new(4);
        for i in 0..6 {
            ring.write(sample(i));
        }
        assert_eq!(ring.len(), 4);
        assert!(!ring.read(1).ok);
        let r = ring.read(2);
        assert!(r.ok);
        assert_eq!(r.record.unwrap().time.secs, 2);
    }

    #[test]
    fn ring_wrap_3000_writes_into_2048_capacity() {
        let ring = Arc::new(FlowRing::new(2048));
        for i in 0..3000u64 {
            ring.write(sample(i));
        }
        let mut reader = RingReader::new(Arc::clone(&ring), 0);
        let first = reader.next_result();
        assert!(!first.ok);
        assert!(!ring.read(0).ok);

        reader.catch_up();
        let mut seen = Vec::new();
        while let Some(rec) = reader.next() {
            seen.push(rec.time.secs);
        }
        assert_eq!(seen.first().copied(), Some(952));
        assert_eq!(seen.last().copied(), Some(2999));
        assert_eq!(seen.len(), 2048);
    }
}
