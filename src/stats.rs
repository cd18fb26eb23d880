//! Process-wide operation and byte counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::ops::Op;

/// A consistent-enough snapshot of the ledger's counters at one instant.
///
/// Backs both the count-fault evaluation and any log line emitted for the same call, so the
/// two never disagree about which operation "this" was.
#[derive(Debug, Clone, Copy)]
pub struct LedgerSnapshot {
    pub op_count: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

/// Process-wide counters: per-operation counts, total operations, bytes moved, start time.
///
/// Every counter is an independent atomic rather than a single mutex-guarded struct, matching
/// the concurrency model's acceptance of stale-but-monotonic reads under contention.
#[derive(Debug)]
pub struct Ledger {
    op_count: AtomicU64,
    per_op_count: [AtomicU64; Op::COUNT],
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    start_time: Instant,
}

impl Ledger {
    pub fn new() -> Ledger {
        Ledger {
            op_count: AtomicU64::new(0),
            per_op_count: std::array::from_fn(|_| AtomicU64::new(0)),
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Increment `op_count` and the per-operation counter for `op`.
    ///
    /// Must run before count-based fault evaluation for the same call.
    pub fn observe_call(&self, op: Op) -> u64 {
        self.per_op_count[op.index()].fetch_add(1, Ordering::Relaxed);
        self.op_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Add `n` to the byte counter matching `op`. No-op for any operation other than read/write.
    ///
    /// Only valid to call once the backend has returned a non-negative transferred size.
    pub fn observe_bytes(&self, op: Op, n: u64) {
        match op {
            Op::Read => {
                self.bytes_read.fetch_add(n, Ordering::Relaxed);
            }
            Op::Write => {
                self.bytes_written.fetch_add(n, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            op_count: self.op_count.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }

    pub fn per_op_count(&self, op: Op) -> u64 {
        self.per_op_count[op.index()].load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Ledger::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_call_increments_total_and_per_op() {
        let ledger = Ledger::new();
        assert_eq!(ledger.observe_call(Op::Read), 1);
        assert_eq!(ledger.observe_call(Op::Read), 2);
        ledger.observe_call(Op::Write);
        assert_eq!(ledger.snapshot().op_count, 3);
        assert_eq!(ledger.per_op_count(Op::Read), 2);
        assert_eq!(ledger.per_op_count(Op::Write), 1);
    }

    #[test]
    fn observe_bytes_only_for_read_write() {
        let ledger = Ledger::new();
        ledger.observe_bytes(Op::Read, 10);
        ledger.observe_bytes(Op::Write, 4);
        ledger.observe_bytes(Op::Getattr, 99);
        let snap = ledger.snapshot();
        assert_eq!(snap.bytes_read, 10);
        assert_eq!(snap.bytes_written, 4);
    }
}
