//! The closed set of filesystem operations the fault engine can reason about.
//!
//! Every operation the interposition shim dispatches is first classified into one of these
//! variants. Fault affinity masks are sets over this enumeration, so the names here are also
//! the vocabulary the configuration loader accepts in `operations = ...` lines.

use std::fmt;

use bitflags::bitflags;

/// One of the filesystem operations the engine can apply faults to.
///
/// The ordering is significant: `Op::ALL` iterates in this order, and each variant corresponds
/// to exactly one bit in [`OperationMask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Getattr,
    Readdir,
    Create,
    Mknod,
    Read,
    Write,
    Open,
    Release,
    Mkdir,
    Rmdir,
    Unlink,
    Rename,
    Access,
    Chmod,
    Chown,
    Truncate,
    Utimens,
}

impl Op {
    /// All operations, in declaration order. Kept as an array rather than pulling in an
    /// enum-iteration crate since the set is small and fixed.
    pub const ALL: [Op; 17] = [
        Op::Getattr,
        Op::Readdir,
        Op::Create,
        Op::Mknod,
        Op::Read,
        Op::Write,
        Op::Open,
        Op::Release,
        Op::Mkdir,
        Op::Rmdir,
        Op::Unlink,
        Op::Rename,
        Op::Access,
        Op::Chmod,
        Op::Chown,
        Op::Truncate,
        Op::Utimens,
    ];

    /// Number of distinct operations; sizes the ledger's per-operation counter array.
    pub const COUNT: usize = Op::ALL.len();

    /// Stable index into per-operation arrays (the ledger's counters).
    pub fn index(self) -> usize {
        Op::ALL.iter().position(|op| *op == self).expect("Op::ALL is exhaustive")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Getattr => "getattr",
            Op::Readdir => "readdir",
            Op::Create => "create",
            Op::Mknod => "mknod",
            Op::Read => "read",
            Op::Write => "write",
            Op::Open => "open",
            Op::Release => "release",
            Op::Mkdir => "mkdir",
            Op::Rmdir => "rmdir",
            Op::Unlink => "unlink",
            Op::Rename => "rename",
            Op::Access => "access",
            Op::Chmod => "chmod",
            Op::Chown => "chown",
            Op::Truncate => "truncate",
            Op::Utimens => "utimens",
        }
    }

    fn from_str(s: &str) -> Option<Op> {
        Op::ALL.into_iter().find(|op| op.as_str() == s)
    }

    fn bit(self) -> OperationMask {
        OperationMask::from_bits_truncate(1 << self.index())
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// A set over [`Op`], materialized as a 32-bit bitmap.
    ///
    /// Mirrors the grounding implementation's `operations_mask`: a mask of zero affects no
    /// operations, and a fully-set mask (every defined bit, not `u32::MAX`) affects all of
    /// them. `operations = all` and `operations = *` both parse to [`OperationMask::all`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperationMask: u32 {
        const GETATTR  = 1 << 0;
        const READDIR  = 1 << 1;
        const CREATE   = 1 << 2;
        const MKNOD    = 1 << 3;
        const READ     = 1 << 4;
        const WRITE    = 1 << 5;
        const OPEN     = 1 << 6;
        const RELEASE  = 1 << 7;
        const MKDIR    = 1 << 8;
        const RMDIR    = 1 << 9;
        const UNLINK   = 1 << 10;
        const RENAME   = 1 << 11;
        const ACCESS   = 1 << 12;
        const CHMOD    = 1 << 13;
        const CHOWN    = 1 << 14;
        const TRUNCATE = 1 << 15;
        const UTIMENS  = 1 << 16;
    }
}

impl OperationMask {
    pub const NONE: OperationMask = OperationMask::empty();

    pub fn single(op: Op) -> OperationMask {
        op.bit()
    }

    pub fn affects(self, op: Op) -> bool {
        self.contains(op.bit())
    }

    /// Parse a comma-separated operation list, or the literal `all`/`*`.
    ///
    /// Unknown tokens are ignored (and logged), matching the grounding source's tolerant
    /// `config_parse_operations_mask`. An empty string parses to [`OperationMask::NONE`].
    pub fn parse(text: &str) -> OperationMask {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return OperationMask::NONE;
        }
        if trimmed == "all" || trimmed == "*" {
            return OperationMask::all();
        }
        let mut mask = OperationMask::NONE;
        for token in trimmed.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match Op::from_str(token) {
                Some(op) => mask |= op.bit(),
                None => log::warn!("unknown operation name in mask: {token:?}"),
            }
        }
        mask
    }
}
