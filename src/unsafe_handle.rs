use std::ptr::NonNull;

use crate::verify::{Active, Verifier};
use crate::{fail, RegionMarker, UnsafeScope, Violation};

/// Untracked raw-pointer handle whose every use is policed by the
/// unsafe-region register.
///
/// A handle is usable only while the innermost unsafe region on the
/// current thread is the one that declared it (see [`declare_unsafe`]).
/// Dereferencing it outside any region, after the declaring region has
/// exited, or inside a different region fails with
/// [`Violation::UnsafeRegion`].
///
/// There is no reference counting: the referent's lifetime is entirely
/// the caller's business.
pub struct UnsafeHandle<T> {
    pointer: Option<NonNull<T>>,
    origin: Option<RegionMarker>,
}

impl<T> UnsafeHandle<T> {
    #[inline]
    pub const fn null() -> Self {
        Self {
            pointer: None,
            origin: None,
        }
    }

    /// Handle to a fresh heap value, to be freed with [`free_unsafe`].
    #[inline]
    pub fn from_box(value: Box<T>) -> Self {
        Self {
            pointer: Some(NonNull::from(Box::leak(value))),
            origin: None,
        }
    }

    /// # Safety
    ///
    /// `pointer` must be null or valid for reads and writes for as long as
    /// this handle and its duplicates dereference it, and must only be
    /// passed to [`free_unsafe`] if it was obtained from [`Box::into_raw`].
    #[inline]
    pub unsafe fn from_raw(pointer: *mut T) -> Self {
        Self {
            pointer: NonNull::new(pointer),
            origin: None,
        }
    }

    /// Copying an unsafe handle is itself an unsafe operation: it must
    /// happen inside the region that declared `self`. The copy belongs to
    /// the same region.
    ///
    /// # Safety
    ///
    /// The caller must not hold references obtained through two handles to
    /// the same value at once if either is mutable.
    pub unsafe fn duplicate(&self) -> Self {
        self.check_unsafe();
        Self {
            pointer: self.pointer,
            origin: self.origin,
        }
    }

    /// Copy-assignment: checked against the region that declared `self`.
    ///
    /// # Safety
    ///
    /// As for [`UnsafeHandle::duplicate`].
    pub unsafe fn assign_from(&mut self, other: &Self) {
        self.check_unsafe();
        self.pointer = other.pointer;
    }

    /// The region that declared this handle, if any.
    #[inline]
    pub fn origin_marker(&self) -> Option<RegionMarker> {
        self.origin
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.pointer.is_none()
    }

    #[inline]
    pub fn get(&self) -> *mut T {
        self.pointer.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    #[inline]
    fn check_unsafe(&self) {
        Active::check_region(self.origin);
    }

    fn checked_pointer(&self) -> NonNull<T> {
        self.check_unsafe();
        match self.pointer {
            Some(pointer) => pointer,
            None => fail(Violation::NullDereference),
        }
    }
}

impl<T> Default for UnsafeHandle<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T> core::ops::Deref for UnsafeHandle<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        // Safety: the pointer is valid per the `from_raw` contract.
        unsafe { self.checked_pointer().as_ref() }
    }
}

impl<T> core::ops::DerefMut for UnsafeHandle<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as for `deref`; aliasing across duplicates is excluded by
        // the `duplicate` contract.
        unsafe { self.checked_pointer().as_mut() }
    }
}

impl<T> std::fmt::Debug for UnsafeHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsafeHandle")
            .field("pointer", &self.get())
            .field("origin", &self.origin)
            .finish()
    }
}

/// Enter an unsafe region named `marker` and stamp `handle` with it.
///
/// The handle is usable until the returned guard is dropped, as long as
/// no other region is entered on top of it.
///
/// ```
/// use ownership_debug_tools::{declare_unsafe, UnsafeHandle};
///
/// let mut handle = UnsafeHandle::from_box(Box::new(3));
/// {
///     let _region = declare_unsafe(&mut handle, "example");
///     *handle += 1;
///     unsafe { ownership_debug_tools::free_unsafe(&mut handle) };
/// }
/// assert!(handle.is_null());
/// ```
pub fn declare_unsafe<T>(
    handle: &mut UnsafeHandle<T>,
    marker: impl Into<RegionMarker>,
) -> UnsafeScope {
    let scope = UnsafeScope::enter(marker);
    handle.origin = Some(scope.marker());
    scope
}

/// Free the referent of `handle` and null it. Must run inside the
/// declaring region, like any other use.
///
/// # Safety
///
/// The pointer must come from [`UnsafeHandle::from_box`] or
/// [`Box::into_raw`], and no duplicate of `handle` may be dereferenced
/// afterwards.
pub unsafe fn free_unsafe<T>(handle: &mut UnsafeHandle<T>) {
    handle.check_unsafe();
    if let Some(pointer) = handle.pointer.take() {
        log::debug!("free unsafe {:p}", pointer.as_ptr());
        drop(Box::from_raw(pointer.as_ptr()));
    }
}

/// [`declare_unsafe`] with the enclosing function as marker.
///
/// Bind the result to a named variable: the region ends when it drops.
#[macro_export]
macro_rules! declare_unsafe {
    ($handle:expr) => {
        $crate::declare_unsafe(&mut $handle, $crate::region_marker!())
    };
}
