//! POSIX error code newtype crossing the engine/backend boundary.

use std::fmt;

/// A POSIX errno value.
///
/// The backend and the grounding configuration format both carry errno values as signed
/// integers that are conventionally negative (`-EIO`, `-EACCES`, ...), while `fuser`'s
/// `ReplyXxx::error` methods expect a positive raw errno. [`Errno::raw`] normalizes away the
/// sign so a value loaded from either convention reports to the kernel correctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(i32);

impl Errno {
    pub const EIO: Errno = Errno(libc::EIO);
    pub const EACCES: Errno = Errno(libc::EACCES);
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    pub const ENOENT: Errno = Errno(libc::ENOENT);

    /// Construct from a value that may use either sign convention.
    pub fn new(value: i32) -> Errno {
        Errno(value)
    }

    /// The positive raw errno `fuser`'s reply objects expect.
    pub fn raw(self) -> i32 {
        self.0.abs()
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}

impl From<i32> for Errno {
    fn from(value: i32) -> Errno {
        Errno::new(value)
    }
}
