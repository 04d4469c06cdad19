//! Broken ownership invariants.
//!
//! None of these are recoverable: continuing past a corrupted reference count
//! risks double frees and use-after-free, so every violation is logged and then
//! terminates the current thread of control (panic) or the whole process
//! (abort), depending on [`ViolationAction`].

use thiserror::Error;

use crate::config::get_config;
use crate::memory::config::ViolationAction;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("header identity mismatch at {addr:#x}: found {found:#010x}, expected {expected:#010x}")]
    IdentityMismatch {
        addr: usize,
        found: u32,
        expected: u32,
    },

    #[error("reference count of group {leader:#x} went negative ({count})")]
    NegativeCount { leader: usize, count: isize },

    #[error("object size {size} is smaller than the {min} byte ownership header")]
    ObjectTooSmall { size: usize, min: usize },

    #[error("object {addr:#x} must be self-managing before it can lead a group")]
    NotSelfManaged { addr: usize },

    #[error("a group must contain at least one object")]
    EmptyGroup,

    #[error("member {index} of group {leader:#x} no longer points at its leader")]
    CorruptMember { leader: usize, index: usize },

    #[error("member index {index} out of range for group of {count}")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("group size mismatch: expected {expected}, found {found}")]
    GroupSizeMismatch { expected: usize, found: usize },

    #[error("object {addr:#x} is not the leader of its group")]
    NotLeader { addr: usize },

    #[error("block {addr:#x} is not a group block from the allocator")]
    UnknownBlock { addr: usize },

    #[error("null object pointer")]
    NullObject,

    #[error("released an empty slot")]
    EmptySlot,

    #[error("object {addr:#x} has no manager")]
    Unmanaged { addr: usize },
}

/// Log `violation` and terminate.
///
/// With [`ViolationAction::Panic`] the panic unwinds unless the final binary
/// is built with `panic = "abort"`: a caller can catch it, and only the current
/// thread ends. [`ViolationAction::Abort`], the default outside this crate's
/// unit tests, always ends the process.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(violation: Violation) -> ! {
    tracing::error!(%violation, "ownership invariant violated");

    match get_config().on_violation() {
        ViolationAction::Abort => std::process::abort(),
        ViolationAction::Panic => panic!("{violation}"),
    }
}

/// Fatal unless `condition` holds.
#[inline]
#[track_caller]
pub(crate) fn ensure(condition: bool, violation: impl FnOnce() -> Violation) {
    if !condition {
        fatal(violation());
    }
}
