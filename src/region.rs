use std::cell::RefCell;
use std::marker::PhantomData;

use crate::verify::{Active, Verifier};
use crate::RegionMarker;

#[cfg(memsafe_checked)]
use crate::{RegionFault, Violation};

thread_local! {
    /// Register of the unsafe regions active on this thread, innermost
    /// last.
    ///
    /// It is deliberately per thread: a region declared on one thread
    /// never satisfies a check on another. Entries are pushed and popped
    /// only by `UnsafeScope`, in LIFO order.
    static UNSAFE_REGIONS: RefCell<Vec<RegionMarker>> = const { RefCell::new(Vec::new()) };
}

#[cfg(memsafe_checked)]
pub(crate) fn push(marker: RegionMarker) -> usize {
    let depth = UNSAFE_REGIONS.with_borrow_mut(|stack| {
        stack.push(marker);
        stack.len() - 1
    });
    log::trace!("enter unsafe region `{marker}` at depth {depth}");
    depth
}

/// Pop `marker`, which must be the innermost region and sit at `depth`.
///
/// On an out-of-order exit the marker is still removed, so that the
/// register stays consistent for the regions that are still active.
#[cfg(memsafe_checked)]
pub(crate) fn pop(marker: RegionMarker, depth: usize) -> Result<(), Violation> {
    let found = UNSAFE_REGIONS.with_borrow_mut(|stack| {
        let found = stack.len();
        match stack.iter().rposition(|m| *m == marker) {
            Some(index) if index == depth && index + 1 == found => {
                stack.pop();
                Ok(())
            }
            Some(index) => {
                stack.remove(index);
                Err(found)
            }
            None => Err(found),
        }
    });
    log::trace!("exit unsafe region `{marker}` at depth {depth}");
    found.map_err(|found| {
        Violation::from(RegionFault::OutOfOrder {
            exiting: marker,
            depth,
            found,
        })
    })
}

/// The innermost active region must be the one `declared` names.
#[cfg(memsafe_checked)]
pub(crate) fn check(declared: Option<RegionMarker>) -> Result<(), Violation> {
    let active = UNSAFE_REGIONS
        .with_borrow(|stack| stack.last().copied())
        .ok_or(RegionFault::NoActiveRegion)?;
    let declared = declared.ok_or(RegionFault::Unstamped)?;
    if active != declared {
        return Err(RegionFault::Mismatch { active, declared }.into());
    }
    Ok(())
}

/// Snapshot of the regions active on this thread, outermost first.
/// Always empty in unchecked builds.
pub fn active_regions() -> Vec<RegionMarker> {
    UNSAFE_REGIONS.with_borrow(|stack| stack.clone())
}

#[inline]
pub fn region_depth() -> usize {
    UNSAFE_REGIONS.with_borrow(|stack| stack.len())
}

/// Scope guard for an unsafe region.
///
/// Entering pushes the marker onto this thread's register, dropping the
/// guard pops it, on every exit path. Regions nest; a guard dropped
/// while an inner region is still active is reported as
/// [`crate::RegionFault::OutOfOrder`].
#[must_use = "the unsafe region ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct UnsafeScope {
    marker: RegionMarker,
    depth: usize,
    // Regions belong to the thread that entered them.
    _not_send: PhantomData<*const ()>,
}

impl UnsafeScope {
    pub fn enter(marker: impl Into<RegionMarker>) -> Self {
        let marker = marker.into();
        let depth = Active::enter_region(marker);
        Self {
            marker,
            depth,
            _not_send: PhantomData,
        }
    }

    #[inline]
    pub fn marker(&self) -> RegionMarker {
        self.marker
    }
}

impl Drop for UnsafeScope {
    #[inline]
    fn drop(&mut self) {
        Active::exit_region(self.marker, self.depth);
    }
}
