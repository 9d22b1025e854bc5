//! This crate defines a debug-time verification layer for code that
//! manages object lifetimes by hand. It does not allocate or free anything
//! on its own behalf; it checks, at runtime and in debug builds, the
//! ownership contract that such code assumes but never verifies.
//!
//! Three handle kinds are provided:
//! - `SharedHandle`, a reference-counted handle over a `TrackedObject`.
//!   The referent's storage is freed either by its stack frame or by the
//!   explicit `commit_delete`, and every other ending is reported: leaks,
//!   destruction of objects that are still referenced, null dereferences.
//! - `UniqueHandle`, a move-only handle with exclusive ownership.
//! - `UnsafeHandle`, an untracked handle that may only be used inside the
//!   unsafe region that declared it (see `declare_unsafe` and
//!   `UnsafeScope`).
//!
//! Every violation is fatal: it is logged through `log` and then panics
//! or aborts, according to `config::failure_mode`.
//!
//! Checks are compiled in when debug assertions are enabled or the
//! `checked` feature is selected, and compiled out when the `unchecked`
//! feature is selected; see `CHECKED`. Without checks, only the non-null
//! policy of handles remains.

mod violation;
pub use violation::{ensure, fail, raise, RegionFault, Violation};

pub mod config;

pub mod verify;
pub use verify::CHECKED;

mod tracked;
pub use tracked::{Origin, RefCount, Tracked, TrackedObject};

mod shared;
pub use shared::{commit_delete, Nullability, SharedHandle};

mod unique;
pub use unique::UniqueHandle;

mod marker;
pub use marker::RegionMarker;

mod region;
pub use region::{active_regions, region_depth, UnsafeScope};

mod unsafe_handle;
pub use unsafe_handle::{declare_unsafe, free_unsafe, UnsafeHandle};

#[cfg(test)]
mod test;
