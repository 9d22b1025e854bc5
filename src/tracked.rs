#[cfg(memsafe_checked)]
use std::sync::atomic::{AtomicIsize, Ordering};

use crate::verify::{Active, Verifier};

/// Where a tracked object's storage lives.
///
/// Decides which leak invariant applies when a [`crate::SharedHandle`]
/// releases its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Freed when the enclosing stack frame unwinds.
    Stack,
    /// Freed only by [`crate::commit_delete`].
    Heap,
}

/// The debug reference count embedded in every tracked object.
///
/// Dropping a `RefCount` is dropping the object that contains it: at that
/// moment the count must be zero, otherwise some handle still refers to
/// the object and the drop fails with
/// [`crate::Violation::LiveObjectDestroyed`].
///
/// In unchecked builds this is a zero-sized type and all the counting
/// compiles away.
pub struct RefCount {
    #[cfg(memsafe_checked)]
    count: AtomicIsize,
}

impl RefCount {
    #[inline]
    pub const fn new() -> Self {
        Self {
            #[cfg(memsafe_checked)]
            count: AtomicIsize::new(0),
        }
    }

    /// The number of live handles.
    #[cfg(memsafe_checked)]
    #[inline]
    pub fn get(&self) -> isize {
        self.count.load(Ordering::Acquire)
    }

    /// Always zero: nothing is counted in unchecked builds.
    #[cfg(not(memsafe_checked))]
    #[inline]
    pub fn get(&self) -> isize {
        0
    }

    #[cfg(memsafe_checked)]
    #[inline]
    pub(crate) fn increment(&self) -> isize {
        self.count.fetch_add(1, Ordering::AcqRel) + 1
    }

    #[cfg(memsafe_checked)]
    #[inline]
    pub(crate) fn decrement(&self) -> isize {
        self.count.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl Default for RefCount {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

// A cloned object is a new object: no handle refers to it yet.
impl Clone for RefCount {
    #[inline]
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RefCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RefCount").field(&self.get()).finish()
    }
}

impl Drop for RefCount {
    #[inline]
    fn drop(&mut self) {
        Active::destroy(self);
    }
}

/// A value whose lifetime is monitored through a debug reference count.
///
/// Implementors embed a [`RefCount`] and return it from
/// [`TrackedObject::ref_counter`]; everything else is provided.
///
/// ```
/// use ownership_debug_tools::{RefCount, TrackedObject};
///
/// #[derive(Default)]
/// struct Node {
///     count: RefCount,
///     value: i32,
/// }
///
/// impl TrackedObject for Node {
///     fn ref_counter(&self) -> &RefCount {
///         &self.count
///     }
/// }
/// ```
pub trait TrackedObject {
    fn ref_counter(&self) -> &RefCount;

    /// Handles call this for every reference they capture. Calling it by
    /// hand unbalances the count.
    #[inline]
    fn add_ref(&self) {
        Active::add_ref(self.ref_counter());
    }

    /// Handles call this for every reference they drop.
    ///
    /// With `checked`, the count left behind must be non-negative for a
    /// stack-origin object and strictly positive for a heap-origin one:
    /// the last reference to a heap object is only ever dropped by
    /// [`crate::commit_delete`], which releases unchecked.
    #[inline]
    fn release(&self, checked: bool, origin: Origin) {
        Active::release(self.ref_counter(), checked, origin);
    }

    #[inline]
    fn ref_count(&self) -> isize {
        self.ref_counter().get()
    }
}

/// Gives any value tracked-object semantics.
#[derive(Debug, Default, Clone)]
pub struct Tracked<T> {
    count: RefCount,
    value: T,
}

impl<T> Tracked<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self {
            count: RefCount::new(),
            value,
        }
    }

    /// Destroys the tracked wrapper, with the usual liveness check.
    #[inline]
    pub fn into_inner(self) -> T {
        let Tracked { count, value } = self;
        drop(count);
        value
    }
}

impl<T> TrackedObject for Tracked<T> {
    #[inline]
    fn ref_counter(&self) -> &RefCount {
        &self.count
    }
}

impl<T> core::ops::Deref for Tracked<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> core::ops::DerefMut for Tracked<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
