use std::ptr::NonNull;

use crate::violation::unwinding_from_violation;
use crate::{ensure, fail, Origin, TrackedObject, Violation, CHECKED};

/// Whether a handle may hold a null referent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nullability {
    /// Constructing or assigning null fails with
    /// [`Violation::NonNullable`].
    #[default]
    NonNull,
    Nullable,
}

impl Nullability {
    #[inline]
    pub fn allows_null(self) -> bool {
        self == Nullability::Nullable
    }
}

/// Reference-counted handle over a [`TrackedObject`].
///
/// A `SharedHandle` never owns the storage of its referent. Every live
/// handle holds exactly one reference in the referent's count. Storage is
/// freed either by the stack frame that owns a stack-origin object, or by
/// [`commit_delete`] for a heap-origin one; any other ending is reported:
///
/// - dropping the last handle to a heap object is a leak
///   ([`Violation::MemoryLeak`]),
/// - destroying an object that handles still refer to is
///   [`Violation::LiveObjectDestroyed`],
/// - dereferencing a null handle is [`Violation::NullDereference`].
///
/// Every constructor that takes a referent defaults to
/// [`Nullability::NonNull`]; only [`SharedHandle::null`] (and `Default`)
/// produce a nullable handle.
///
/// Handles are neither `Send` nor `Sync`; only the count they update is
/// atomic.
///
/// Only `Deref` is provided, since several handles may share a referent:
/// mutating the payload through a handle needs interior mutability in `T`
/// (`Cell`, `RefCell`).
pub struct SharedHandle<T: TrackedObject> {
    pointer: Option<NonNull<T>>,
    origin: Origin,
    nullability: Nullability,
}

impl<T: TrackedObject> SharedHandle<T> {
    /// A nullable handle with no referent.
    #[inline]
    pub const fn null() -> Self {
        Self {
            pointer: None,
            origin: Origin::Heap,
            nullability: Nullability::Nullable,
        }
    }

    /// Non-nullable handle to a stack-origin object.
    ///
    /// # Safety
    ///
    /// `referent` must outlive every dereference of this handle and of its
    /// clones. Checked builds report an object that is destroyed while
    /// handles still refer to it, but unchecked builds do not.
    #[inline]
    pub unsafe fn from_ref(referent: &T) -> Self {
        Self::from_ref_with(referent, Nullability::NonNull)
    }

    /// # Safety
    ///
    /// See [`SharedHandle::from_ref`].
    #[inline]
    pub unsafe fn from_ref_with(referent: &T, nullability: Nullability) -> Self {
        referent.add_ref();
        Self {
            pointer: Some(NonNull::from(referent)),
            origin: Origin::Stack,
            nullability,
        }
    }

    /// Non-nullable handle to a heap-origin object. The object must be
    /// freed with [`commit_delete`].
    #[inline]
    pub fn from_box(referent: Box<T>) -> Self {
        Self::from_option(Some(referent), Nullability::NonNull)
    }

    /// Heap-origin handle; `None` is only accepted by a nullable handle.
    pub fn from_option(referent: Option<Box<T>>, nullability: Nullability) -> Self {
        let pointer = referent.map(|boxed| NonNull::from(Box::leak(boxed)));
        // Safety: the pointer, if any, comes from `Box::leak`.
        unsafe { Self::from_non_null(pointer, nullability) }
    }

    /// Heap-origin handle from a raw pointer.
    ///
    /// # Safety
    ///
    /// `pointer` must be null or obtained from [`Box::into_raw`], and must
    /// only be freed through [`commit_delete`].
    #[inline]
    pub unsafe fn from_raw(pointer: *mut T, nullability: Nullability) -> Self {
        Self::from_non_null(NonNull::new(pointer), nullability)
    }

    unsafe fn from_non_null(pointer: Option<NonNull<T>>, nullability: Nullability) -> Self {
        if let Some(referent) = pointer {
            referent.as_ref().add_ref();
        }
        ensure(
            pointer.is_some() || nullability.allows_null(),
            Violation::NonNullable,
        );
        Self {
            pointer,
            origin: Origin::Heap,
            nullability,
        }
    }

    /// Copy-assignment: share `other`'s referent.
    ///
    /// The new referent is counted before the old one is released, so
    /// assigning a handle to itself is balanced. The old referent is
    /// released with the old origin. `self` keeps its own nullability,
    /// and a non-nullable `self` refuses a null `other`.
    pub fn assign(&mut self, other: &Self) {
        match other.pointer {
            // Safety: `other` holds a counted reference, so the referent
            // is alive.
            Some(referent) => unsafe { referent.as_ref() }.add_ref(),
            None => ensure(self.nullability.allows_null(), Violation::NonNullable),
        }
        if let Some(previous) = self.pointer {
            // Safety: `self` still holds its counted reference.
            unsafe { previous.as_ref() }.release(true, self.origin);
        }
        self.origin = other.origin;
        self.pointer = other.pointer;
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.pointer.is_none()
    }

    #[inline]
    pub fn get(&self) -> *const T {
        self.pointer
            .map_or(std::ptr::null(), |p| p.as_ptr() as *const T)
    }

    #[inline]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    #[inline]
    pub fn nullability(&self) -> Nullability {
        self.nullability
    }
}

impl<T: TrackedObject> Default for SharedHandle<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: TrackedObject> Clone for SharedHandle<T> {
    /// The clone keeps the origin and the nullability of `self`.
    fn clone(&self) -> Self {
        match self.pointer {
            // Safety: `self` holds a counted reference.
            Some(referent) => unsafe { referent.as_ref() }.add_ref(),
            None => ensure(self.nullability.allows_null(), Violation::NonNullable),
        }
        Self {
            pointer: self.pointer,
            origin: self.origin,
            nullability: self.nullability,
        }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        self.assign(source)
    }
}

impl<T: TrackedObject> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        // While unwinding from a violation the referent may already be
        // gone; leave the count alone.
        if unwinding_from_violation() {
            return;
        }
        if let Some(referent) = self.pointer.take() {
            // Safety: `self` held a counted reference up to this point.
            unsafe { referent.as_ref() }.release(true, self.origin);
        }
    }
}

impl<T: TrackedObject> core::ops::Deref for SharedHandle<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        match self.pointer {
            // Safety: `self` holds a counted reference, and the
            // constructors' contracts keep the referent alive meanwhile.
            Some(referent) => unsafe { referent.as_ref() },
            None => fail(Violation::NullDereference),
        }
    }
}

impl<T: TrackedObject> std::fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedHandle")
            .field("pointer", &self.get())
            .field("origin", &self.origin)
            .field("nullability", &self.nullability)
            .finish()
    }
}

/// Free the heap-origin referent of `handle` and null the handle.
///
/// This is the only sanctioned way to free a heap-origin tracked object.
/// The handle's own reference is released unchecked, then the object is
/// destroyed: if any other handle still refers to it, the destruction
/// fails with [`Violation::LiveObjectDestroyed`]. Committing a null
/// handle is a [`Violation::NullDereference`], and checked builds refuse
/// a stack-origin handle with [`Violation::StackOriginDelete`].
///
/// # Safety
///
/// The referent must be heap-origin, and no other handle to it may be
/// dereferenced afterwards. Checked builds report the second case as
/// described above, unchecked builds do not.
pub unsafe fn commit_delete<T: TrackedObject>(handle: &mut SharedHandle<T>) {
    let Some(referent) = handle.pointer else {
        fail(Violation::NullDereference)
    };
    ensure(
        !CHECKED || handle.origin == Origin::Heap,
        Violation::StackOriginDelete,
    );
    handle.pointer = None;
    referent.as_ref().release(false, handle.origin);
    log::debug!("commit-delete {:p}", referent.as_ptr());
    drop(Box::from_raw(referent.as_ptr()));
}
