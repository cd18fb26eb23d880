//! The validated, immutable-after-load fault plan.

use crate::ops::OperationMask;

/// Returns a POSIX error code on matching operations.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorFault {
    pub probability: f32,
    pub error_code: i32,
    pub mask: OperationMask,
}

/// Mutates bytes in a data buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptionFault {
    pub probability: f32,
    pub percentage: f32,
    pub silent: bool,
    pub mask: OperationMask,
}

/// Sleeps before returning.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayFault {
    pub probability: f32,
    pub delay_ms: u64,
    pub mask: OperationMask,
}

/// Unconditionally fires once wall-clock elapsed since process start exceeds a threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingFault {
    pub enabled: bool,
    pub after_minutes: u64,
    pub mask: OperationMask,
}

/// Shortens a data transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialFault {
    pub probability: f32,
    pub factor: f32,
    pub mask: OperationMask,
}

/// Fires every Nth operation or after a cumulative byte threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CountFault {
    pub enabled: bool,
    pub every_n: u64,
    pub after_bytes: u64,
    pub mask: OperationMask,
}

/// The validated set of fault descriptors in force for the process lifetime.
///
/// `enabled = false` forces the engine to pass every operation straight through regardless of
/// which sub-faults are configured.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultPlan {
    pub enabled: bool,
    pub error: Option<ErrorFault>,
    pub corruption: Option<CorruptionFault>,
    pub delay: Option<DelayFault>,
    pub timing: Option<TimingFault>,
    pub partial: Option<PartialFault>,
    pub count: Option<CountFault>,
}
