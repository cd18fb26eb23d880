//! End-to-end scenarios driving the engine and backend directly, without a kernel FUSE mount.

use std::path::Path;

use faultfs::backend::Backend;
use faultfs::engine::{self, Decision};
use faultfs::ops::{Op, OperationMask};
use faultfs::oracle::RandomSource;
use faultfs::plan::{CorruptionFault, CountFault, DelayFault, ErrorFault, FaultPlan, PartialFault};
use faultfs::stats::Ledger;
use tempfile::TempDir;

struct AlwaysTrigger;

impl RandomSource for AlwaysTrigger {
    fn trigger(&self, p: f32) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        true
    }

    fn random_byte(&self) -> u8 {
        0xAA
    }

    fn random_index(&self, len: usize) -> usize {
        len.saturating_sub(1)
    }
}

struct NeverTrigger;

impl RandomSource for NeverTrigger {
    fn trigger(&self, p: f32) -> bool {
        p >= 1.0
    }

    fn random_byte(&self) -> u8 {
        0
    }

    fn random_index(&self, _len: usize) -> usize {
        0
    }
}

fn backend() -> (TempDir, Backend) {
    let dir = TempDir::new().unwrap();
    let backend = Backend::new(dir.path());
    (dir, backend)
}

/// S1: disabled plan is the identity relative to the backend.
#[test]
fn s1_identity_with_fault_injection_disabled() {
    let (_dir, backend) = backend();
    let plan = FaultPlan::default();
    let ledger = Ledger::new();
    let oracle = NeverTrigger;

    let file = backend.create(Path::new("/a"), 0o644).unwrap();
    let data: Vec<u8> = (0..16).collect();

    let decision = engine::pre_phase(Op::Write, &plan, &ledger, &oracle, Some(&data), data.len());
    assert!(matches!(decision, Decision::Pass));
    let n = backend.write(Path::new("/a"), Some(&file), &data, 0).unwrap();
    assert_eq!(n, 16);

    let mut buf = vec![0u8; 16];
    let decision = engine::pre_phase(Op::Read, &plan, &ledger, &oracle, None, 16);
    assert!(matches!(decision, Decision::Pass));
    let n = backend.read(Path::new("/a"), Some(&file), &mut buf, 0).unwrap();
    assert_eq!(n, 16);
    assert_eq!(buf, data);
}

/// S2: deterministic error fault on read leaves the write untouched and the buffer unchanged.
#[test]
fn s2_deterministic_error_on_read() {
    let (_dir, backend) = backend();
    let plan = FaultPlan {
        enabled: true,
        error: Some(ErrorFault {
            probability: 1.0,
            error_code: -5,
            mask: OperationMask::single(Op::Read),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = AlwaysTrigger;

    let file = backend.create(Path::new("/b"), 0o644).unwrap();
    let data = b"1234".to_vec();
    let decision = engine::pre_phase(Op::Write, &plan, &ledger, &oracle, Some(&data), data.len());
    assert!(matches!(decision, Decision::Mutate { .. }));
    let n = backend.write(Path::new("/b"), Some(&file), &data, 0).unwrap();
    assert_eq!(n, 4);

    let decision = engine::pre_phase(Op::Read, &plan, &ledger, &oracle, None, 4);
    match decision {
        Decision::Fail(e) => assert_eq!(e.raw(), 5),
        other => panic!("expected Fail, got {other:?}"),
    }
}

/// S3: partial write fault truncates the transfer; the bytes actually stored are a prefix.
#[test]
fn s3_partial_write() {
    let (_dir, backend) = backend();
    let plan = FaultPlan {
        enabled: true,
        partial: Some(PartialFault {
            probability: 1.0,
            factor: 0.5,
            mask: OperationMask::single(Op::Write),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = AlwaysTrigger;

    let file = backend.create(Path::new("/c"), 0o644).unwrap();
    let data: Vec<u8> = (0..10).collect();

    let decision = engine::pre_phase(Op::Write, &plan, &ledger, &oracle, Some(&data), data.len());
    let size = match decision {
        Decision::Mutate { size, .. } => size.unwrap(),
        other => panic!("expected Mutate, got {other:?}"),
    };
    assert_eq!(size, 5);
    let n = backend.write(Path::new("/c"), Some(&file), &data[..size], 0).unwrap();
    assert_eq!(n, 5);

    let mut buf = vec![0u8; 10];
    let n = backend.read(Path::new("/c"), Some(&file), &mut buf, 0).unwrap();
    assert_eq!(n, 5);
    assert_eq!(&buf[..5], &data[..5]);
}

/// S4: silent write-side corruption still lands in storage, overwriting every byte.
#[test]
fn s4_silent_corruption_on_write() {
    let (_dir, backend) = backend();
    let plan = FaultPlan {
        enabled: true,
        corruption: Some(CorruptionFault {
            probability: 1.0,
            percentage: 100.0,
            silent: true,
            mask: OperationMask::single(Op::Write),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = AlwaysTrigger;

    let file = backend.create(Path::new("/d"), 0o644).unwrap();
    let data = b"ABCDEFGH".to_vec();

    let decision = engine::pre_phase(Op::Write, &plan, &ledger, &oracle, Some(&data), data.len());
    let corrupted = match decision {
        Decision::Mutate { corrupt_write, .. } => corrupt_write.expect("corruption should have fired"),
        other => panic!("expected Mutate, got {other:?}"),
    };
    assert_eq!(corrupted.len(), 8);

    let n = backend.write(Path::new("/d"), Some(&file), &corrupted, 0).unwrap();
    assert_eq!(n, 8);

    let mut buf = vec![0u8; 8];
    let n = backend.read(Path::new("/d"), Some(&file), &mut buf, 0).unwrap();
    assert_eq!(n, 8);
    assert_eq!(buf, corrupted);
}

/// S5: a count fault firing every 3rd call fails calls 3 and 6 only.
#[test]
fn s5_count_triggered_failure() {
    let (_dir, backend) = backend();
    let plan = FaultPlan {
        enabled: true,
        count: Some(CountFault {
            enabled: true,
            every_n: 3,
            after_bytes: 0,
            mask: OperationMask::all(),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = NeverTrigger;
    backend.create(Path::new("/e"), 0o644).unwrap();

    let mut results = vec![];
    for _ in 0..6 {
        let decision = engine::pre_phase(Op::Getattr, &plan, &ledger, &oracle, None, 0);
        let failed = matches!(decision, Decision::Fail(_));
        if !failed {
            backend.getattr(Path::new("/e")).unwrap();
        }
        results.push(failed);
    }
    assert_eq!(results, vec![false, false, true, false, false, true]);
}

/// S6: a delay fault adds at least the configured latency and preserves the backend's result.
#[test]
fn s6_delay_adds_latency() {
    let (_dir, backend) = backend();
    let plan = FaultPlan {
        enabled: true,
        delay: Some(DelayFault {
            probability: 1.0,
            delay_ms: 50,
            mask: OperationMask::single(Op::Getattr),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = AlwaysTrigger;
    backend.create(Path::new("/f"), 0o644).unwrap();

    let start = std::time::Instant::now();
    let decision = engine::pre_phase(Op::Getattr, &plan, &ledger, &oracle, None, 0);
    let elapsed = start.elapsed();
    assert!(matches!(decision, Decision::Mutate { .. }));
    assert!(elapsed >= std::time::Duration::from_millis(50));
    assert!(backend.getattr(Path::new("/f")).is_ok());
}

/// Universal property: a mask restricted to one operation never affects another.
#[test]
fn mask_honored_across_operations() {
    let plan = FaultPlan {
        enabled: true,
        error: Some(ErrorFault {
            probability: 1.0,
            error_code: -5,
            mask: OperationMask::single(Op::Read),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = AlwaysTrigger;
    let decision = engine::pre_phase(Op::Write, &plan, &ledger, &oracle, Some(b"x"), 1);
    assert!(!matches!(decision, Decision::Fail(_)));
}

/// Universal property: bytes_written tracks the backend's reported transfer, not the request.
#[test]
fn byte_counter_tracks_backend_transfer_not_request() {
    let (_dir, backend) = backend();
    let plan = FaultPlan {
        enabled: true,
        partial: Some(PartialFault {
            probability: 1.0,
            factor: 0.25,
            mask: OperationMask::single(Op::Write),
        }),
        ..Default::default()
    };
    let ledger = Ledger::new();
    let oracle = AlwaysTrigger;
    let file = backend.create(Path::new("/g"), 0o644).unwrap();
    let data: Vec<u8> = (0..20).collect();

    let decision = engine::pre_phase(Op::Write, &plan, &ledger, &oracle, Some(&data), data.len());
    let size = match decision {
        Decision::Mutate { size, .. } => size.unwrap(),
        other => panic!("expected Mutate, got {other:?}"),
    };
    let n = backend.write(Path::new("/g"), Some(&file), &data[..size], 0).unwrap();
    engine::post_phase(Op::Write, &plan, &ledger, &oracle, n as i64, None);

    assert_eq!(ledger.snapshot().bytes_written, n as u64);
    assert_ne!(n as u64, data.len() as u64);
}
