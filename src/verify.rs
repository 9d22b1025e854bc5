//! The two implementations of the verification layer.
//!
//! [`Checked`] counts references, enforces the leak and liveness
//! invariants and keeps the unsafe-region stack. [`Unchecked`] does
//! nothing. [`Active`] names the one selected by the build: checks are
//! compiled in when debug assertions are on or the `checked` feature is
//! selected, unless the `unchecked` feature forces them out.
//!
//! The non-null policy of handles is not part of this interface: it is
//! enforced in every build.

use crate::{Origin, RefCount, RegionMarker};

#[cfg(memsafe_checked)]
use crate::{fail, raise, region, violation::settle, Violation};

pub trait Verifier {
    /// `true` if this implementation checks anything.
    const ENABLED: bool;

    fn add_ref(count: &RefCount);

    /// Drop one reference. With `checked`, a stack-origin count may reach
    /// zero, a heap-origin one may not.
    fn release(count: &RefCount, checked: bool, origin: Origin);

    /// Called when the tracked object itself is destroyed.
    fn destroy(count: &RefCount);

    /// Push `marker` and return the depth it was pushed at.
    fn enter_region(marker: RegionMarker) -> usize;

    fn exit_region(marker: RegionMarker, depth: usize);

    /// Fail unless the innermost active region is `declared`.
    fn check_region(declared: Option<RegionMarker>);
}

#[cfg(memsafe_checked)]
#[derive(Debug, Clone, Copy)]
pub struct Checked;

#[cfg(memsafe_checked)]
impl Verifier for Checked {
    const ENABLED: bool = true;

    #[inline]
    fn add_ref(count: &RefCount) {
        settle();
        let now = count.increment();
        log::trace!("add_ref {:p} -> {now}", count);
    }

    #[inline]
    fn release(count: &RefCount, checked: bool, origin: Origin) {
        let remaining = count.decrement();
        log::trace!("release {:p} ({origin:?}) -> {remaining}", count);
        if !checked {
            return;
        }
        let balanced = match origin {
            Origin::Stack => remaining >= 0,
            Origin::Heap => remaining > 0,
        };
        if !balanced {
            raise(Violation::MemoryLeak);
        }
    }

    #[inline]
    fn destroy(count: &RefCount) {
        let living = count.get();
        if living != 0 {
            raise(Violation::LiveObjectDestroyed { count: living });
        }
    }

    #[inline]
    fn enter_region(marker: RegionMarker) -> usize {
        region::push(marker)
    }

    #[inline]
    fn exit_region(marker: RegionMarker, depth: usize) {
        if let Err(violation) = region::pop(marker, depth) {
            raise(violation);
        }
    }

    #[inline]
    fn check_region(declared: Option<RegionMarker>) {
        if let Err(violation) = region::check(declared) {
            fail(violation);
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Unchecked;

impl Verifier for Unchecked {
    const ENABLED: bool = false;

    #[inline(always)]
    fn add_ref(_count: &RefCount) {}

    #[inline(always)]
    fn release(_count: &RefCount, _checked: bool, _origin: Origin) {}

    #[inline(always)]
    fn destroy(_count: &RefCount) {}

    #[inline(always)]
    fn enter_region(_marker: RegionMarker) -> usize {
        0
    }

    #[inline(always)]
    fn exit_region(_marker: RegionMarker, _depth: usize) {}

    #[inline(always)]
    fn check_region(_declared: Option<RegionMarker>) {}
}

#[cfg(memsafe_checked)]
pub type Active = Checked;

#[cfg(not(memsafe_checked))]
pub type Active = Unchecked;

/// Whether this build runs the checks.
pub const CHECKED: bool = <Active as Verifier>::ENABLED;
