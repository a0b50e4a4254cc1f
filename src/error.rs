//! The closed error taxonomy from spec §7, exposed both as a normal Rust
//! error type (for internal `?` propagation) and as the negative wire code
//! every syscall reply uses.

use thiserror::Error;

/// Recognised error kinds. Discriminant order is arbitrary; `wire_code`
/// is what actually crosses the IPC boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SosError {
    #[error("end of input")]
    Eof,
    #[error("operation not permitted by mode")]
    Perm,
    #[error("bad file descriptor")]
    NoFile,
    #[error("path does not exist")]
    NoVNode,
    #[error("allocation failure")]
    NoMem,
    #[error("per-process fd table full")]
    NoMore,
    #[error("path too long or malformed")]
    PathInv,
    #[error("internal invariant violation in a driver")]
    CorVNode,
    #[error("operation not supported by this filesystem")]
    NotImp,
    #[error("writer cap on v-node exceeded")]
    WriteFull,
    #[error("reader cap on v-node exceeded")]
    ReadFull,
    #[error("attempted remove of an open file")]
    Open,
    #[error("file already exists")]
    Exist,
    #[error("mode argument not recognised")]
    BadMode,
    #[error("generic failure")]
    Error,
}

impl SosError {
    /// The negative integer a syscall reply carries for this error.
    /// Stable and arbitrary beyond "negative and distinct".
    pub const fn wire_code(self) -> i32 {
        match self {
            SosError::Eof => -1,
            SosError::Perm => -2,
            SosError::NoFile => -3,
            SosError::NoVNode => -4,
            SosError::NoMem => -5,
            SosError::NoMore => -6,
            SosError::PathInv => -7,
            SosError::CorVNode => -8,
            SosError::NotImp => -9,
            SosError::WriteFull => -10,
            SosError::ReadFull => -11,
            SosError::Open => -12,
            SosError::Exist => -13,
            SosError::BadMode => -14,
            SosError::Error => -15,
        }
    }
}

pub type SosResult<T> = Result<T, SosError>;
