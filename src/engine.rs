//! The fault decision and application engine.
//!
//! This is the core of the crate: given an operation, the active [`FaultPlan`], the shared
//! [`Ledger`], and a [`RandomSource`], decide whether a call should pass through, fail outright,
//! or proceed with mutated inputs, and afterward decide whether a successful result should be
//! corrupted before the caller sees it.

use std::time::Duration;

use crate::errno::Errno;
use crate::ops::Op;
use crate::oracle::RandomSource;
use crate::plan::FaultPlan;
use crate::stats::Ledger;

/// The pre-phase's verdict for one call.
#[derive(Debug)]
pub enum Decision {
    /// Proceed to the backend with the original arguments.
    Pass,
    /// Short-circuit with a POSIX error code; the backend is never invoked.
    Fail(Errno),
    /// Proceed to the backend with a possibly reduced size and/or a corrupted copy of the
    /// write buffer. `size` is only meaningful for READ/WRITE.
    Mutate {
        size: Option<usize>,
        corrupt_write: Option<Vec<u8>>,
    },
}

/// Decide the fate of one call before it reaches the backend.
///
/// `write_buf` carries the caller's write buffer for WRITE only; `size` is the requested
/// transfer size for READ/WRITE and is ignored for every other operation. May sleep the
/// current thread (the delay fault) before returning.
pub fn pre_phase(
    op: Op,
    plan: &FaultPlan,
    ledger: &Ledger,
    oracle: &dyn RandomSource,
    write_buf: Option<&[u8]>,
    size: usize,
) -> Decision {
    if !plan.enabled {
        return Decision::Pass;
    }

    let call_count = ledger.observe_call(op);

    if let Some(fault) = &plan.error {
        if fault.mask.affects(op) && oracle.trigger(fault.probability) {
            return Decision::Fail(Errno::new(fault.error_code));
        }
    }

    if let Some(fault) = &plan.timing {
        if fault.enabled && fault.mask.affects(op) {
            let elapsed_minutes = ledger.uptime().as_secs_f64() / 60.0;
            if elapsed_minutes >= fault.after_minutes as f64 {
                return Decision::Fail(Errno::EIO);
            }
        }
    }

    if let Some(fault) = &plan.count {
        if fault.enabled && fault.mask.affects(op) {
            let snapshot = ledger.snapshot();
            let by_count = fault.every_n > 0 && call_count % fault.every_n == 0;
            let by_bytes =
                fault.after_bytes > 0 && snapshot.bytes_read + snapshot.bytes_written >= fault.after_bytes;
            if by_count || by_bytes {
                return Decision::Fail(Errno::EIO);
            }
        }
    }

    if let Some(fault) = &plan.delay {
        if fault.mask.affects(op) && oracle.trigger(fault.probability) {
            std::thread::sleep(Duration::from_millis(fault.delay_ms));
        }
    }

    let adjusted_size = if matches!(op, Op::Read | Op::Write) {
        let mut s = size;
        if let Some(fault) = &plan.partial {
            if fault.mask.affects(op) && oracle.trigger(fault.probability) {
                s = partial_size(size, fault.factor);
            }
        }
        Some(s)
    } else {
        None
    };

    let corrupt_write = if op == Op::Write {
        write_side_corruption(plan, oracle, write_buf, adjusted_size.unwrap_or(size))
    } else {
        None
    };

    Decision::Mutate {
        size: adjusted_size,
        corrupt_write,
    }
}

fn partial_size(original_size: usize, factor: f32) -> usize {
    let scaled = (original_size as f64 * factor as f64).floor() as usize;
    scaled.max(1).min(original_size.max(1))
}

fn write_side_corruption(
    plan: &FaultPlan,
    oracle: &dyn RandomSource,
    write_buf: Option<&[u8]>,
    len: usize,
) -> Option<Vec<u8>> {
    let fault = plan.corruption.as_ref()?;
    if !fault.mask.affects(Op::Write) || !oracle.trigger(fault.probability) {
        return None;
    }
    let buf = write_buf?;
    let bound = len.min(buf.len());
    match try_copy(&buf[..bound]) {
        Some(mut copy) => {
            corrupt_bytes(&mut copy, fault.percentage, oracle);
            if !fault.silent {
                log::info!("corrupted {} byte(s) of an outgoing write", copy.len());
            }
            Some(copy)
        }
        None => {
            log::error!("allocation failure building write-corruption buffer, passing through uncorrupted");
            None
        }
    }
}

fn try_copy(src: &[u8]) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve(src.len()).ok()?;
    buf.extend_from_slice(src);
    Some(buf)
}

/// Apply read-side corruption and update byte counters after the backend has returned.
///
/// `result` is the backend's return value: a negative errno, or a non-negative transferred
/// size. `read_buf` carries the buffer actually filled by a READ, truncated to `result` bytes
/// before this call mutates it in place.
pub fn post_phase(
    op: Op,
    plan: &FaultPlan,
    ledger: &Ledger,
    oracle: &dyn RandomSource,
    result: i64,
    read_buf: Option<&mut [u8]>,
) {
    if !plan.enabled {
        return;
    }

    if op == Op::Read && result > 0 {
        if let (Some(fault), Some(buf)) = (&plan.corruption, read_buf) {
            if fault.mask.affects(Op::Read) && oracle.trigger(fault.probability) {
                let n = (result as usize).min(buf.len());
                corrupt_bytes(&mut buf[..n], fault.percentage, oracle);
                if !fault.silent {
                    log::info!("corrupted {n} byte(s) of an incoming read");
                }
            }
        }
    }

    if result > 0 {
        ledger.observe_bytes(op, result as u64);
    }
}

/// Mutate `buffer` in place: `k = max(1, floor(len*percentage/100))`, capped at `len`, indices
/// drawn with replacement.
fn corrupt_bytes(buffer: &mut [u8], percentage: f32, oracle: &dyn RandomSource) {
    let len = buffer.len();
    if len == 0 {
        return;
    }
    let mut k = ((len as f64 * percentage as f64) / 100.0).floor() as usize;
    if percentage > 0.0 && k == 0 {
        k = 1;
    }
    k = k.min(len);
    for _ in 0..k {
        let i = oracle.random_index(len);
        buffer[i] = oracle.random_byte();
    }
}
