//! The fail-fast primitive every other component reports through.
//!
//! Every ownership violation is a programming defect, never a runtime
//! condition: there is no recoverable path. Internal checks produce a
//! `Result<(), Violation>`, and the error side is handed to [`fail`] or
//! [`raise`], which log it and then panic or abort according to
//! [`crate::config::failure_mode`].

use std::cell::Cell;

use thiserror::Error;

use crate::config::{failure_mode, FailureMode};
use crate::RegionMarker;

/// One violated ownership invariant.
///
/// The `Display` strings are the diagnostics printed on failure, and
/// therefore the strings to match with `#[should_panic(expected = ...)]`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A non-nullable handle observed or was assigned a null referent.
    #[error("non-nullable")]
    NonNullable,

    /// A handle was dereferenced while null.
    #[error("try deref null pointer")]
    NullDereference,

    /// The last reference to a heap-origin object was released without
    /// a commit-delete.
    #[error("memory leak")]
    MemoryLeak,

    /// A tracked object was destroyed while handles still referenced it.
    #[error("try delete a living pointer (ref count {count})")]
    LiveObjectDestroyed { count: isize },

    /// [`crate::commit_delete`] was handed a stack-origin object.
    #[error("try delete a stack object")]
    StackOriginDelete,

    /// An unsafe handle was used outside its declared unsafe region.
    #[error("must declare an unsafe region: {0}")]
    UnsafeRegion(RegionFault),
}

/// Why an unsafe-region check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionFault {
    #[error("no unsafe region is active on this thread")]
    NoActiveRegion,

    #[error("the handle was never declared unsafe")]
    Unstamped,

    #[error("active region `{active}` is not the declaring region `{declared}`")]
    Mismatch {
        active: RegionMarker,
        declared: RegionMarker,
    },

    #[error("region `{exiting}` exited out of order (entered at depth {depth}, stack depth {found})")]
    OutOfOrder {
        exiting: RegionMarker,
        depth: usize,
        found: usize,
    },
}

impl From<RegionFault> for Violation {
    #[inline]
    fn from(fault: RegionFault) -> Self {
        Violation::UnsafeRegion(fault)
    }
}

thread_local! {
    /// Set by `fail` on the thread whose panic it starts; cleared the next
    /// time a reference is taken or released outside of a panic.
    static VIOLATION_IN_FLIGHT: Cell<bool> = const { Cell::new(false) };
}

/// Forget a violation whose unwinding has been caught.
#[inline]
pub(crate) fn settle() {
    if !std::thread::panicking() {
        VIOLATION_IN_FLIGHT.set(false);
    }
}

/// `true` while this thread unwinds from a panic started by [`fail`].
///
/// Unwinding from any other panic returns `false`, so handles dropped on
/// the way keep their bookkeeping balanced.
pub(crate) fn unwinding_from_violation() -> bool {
    settle();
    std::thread::panicking() && VIOLATION_IN_FLIGHT.get()
}

/// Report `violation` and never return.
#[cold]
#[track_caller]
pub fn fail(violation: Violation) -> ! {
    log::error!("ownership violation: {violation}");
    VIOLATION_IN_FLIGHT.set(true);
    match failure_mode() {
        FailureMode::Panic => panic!("{violation}"),
        FailureMode::Abort => {
            eprintln!("ERROR: {violation}");
            std::process::abort()
        }
    }
}

/// Like [`fail`], for checks that run inside destructors.
///
/// If the thread is already unwinding, the violation is logged and
/// control returns to the caller: a second panic would abort the process
/// before the first diagnostic reaches the test harness.
#[cold]
#[track_caller]
pub fn raise(violation: Violation) {
    if std::thread::panicking() {
        log::error!("ownership violation while unwinding: {violation}");
        return;
    }
    fail(violation)
}

/// Fail with `violation` unless `condition` holds.
#[inline]
#[track_caller]
pub fn ensure(condition: bool, violation: Violation) {
    if !condition {
        fail(violation)
    }
}
