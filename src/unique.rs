use crate::{ensure, fail, Violation};

/// Move-only handle with exclusive ownership of a heap value.
///
/// Rust moves already make a moved-from variable unusable; the explicit
/// [`UniqueHandle::take`] and [`UniqueHandle::move_assign`] model the
/// moves that leave a null source behind, which then fails on
/// dereference with [`Violation::NullDereference`].
///
/// Unless `NULLABLE` is set, a handle may not be built from null and a
/// null handle may not be moved from ([`Violation::NonNullable`]).
/// `UniqueHandle` is independent of [`crate::TrackedObject`] and always
/// frees its value when dropped.
pub struct UniqueHandle<T, const NULLABLE: bool = false> {
    pointer: Option<Box<T>>,
}

impl<T, const NULLABLE: bool> UniqueHandle<T, NULLABLE> {
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }

    #[inline]
    pub fn from_box(value: Box<T>) -> Self {
        Self {
            pointer: Some(value),
        }
    }

    pub fn from_option(value: Option<Box<T>>) -> Self {
        if !NULLABLE {
            ensure(value.is_some(), Violation::NonNullable);
        }
        Self { pointer: value }
    }

    /// Move construction: the returned handle owns the value and `self`
    /// is left null.
    pub fn take(&mut self) -> Self {
        if !NULLABLE {
            ensure(self.pointer.is_some(), Violation::NonNullable);
        }
        Self {
            pointer: self.pointer.take(),
        }
    }

    /// Move assignment: frees the value `self` owns, then takes over the
    /// value of `source` and leaves `source` null.
    pub fn move_assign(&mut self, source: &mut Self) {
        if !NULLABLE {
            ensure(source.pointer.is_some(), Violation::NonNullable);
        }
        if let Some(previous) = self.pointer.take() {
            log::debug!("unique handle frees {:p} on move-assign", &*previous);
            drop(previous);
        }
        self.pointer = source.pointer.take();
    }

    /// Gives up ownership without freeing.
    #[inline]
    pub fn into_inner(mut self) -> Option<Box<T>> {
        self.pointer.take()
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.pointer.is_none()
    }

    #[inline]
    pub fn get(&self) -> *const T {
        self.pointer
            .as_deref()
            .map_or(std::ptr::null(), |value| value as *const T)
    }
}

impl<T> UniqueHandle<T, true> {
    #[inline]
    pub const fn null() -> Self {
        Self { pointer: None }
    }
}

// Only a nullable handle has a default.
impl<T> Default for UniqueHandle<T, true> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T, const NULLABLE: bool> Drop for UniqueHandle<T, NULLABLE> {
    fn drop(&mut self) {
        if let Some(value) = self.pointer.take() {
            log::trace!("unique handle frees {:p}", &*value);
        }
    }
}

impl<T, const NULLABLE: bool> core::ops::Deref for UniqueHandle<T, NULLABLE> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        match &self.pointer {
            Some(value) => &**value,
            None => fail(Violation::NullDereference),
        }
    }
}

impl<T, const NULLABLE: bool> core::ops::DerefMut for UniqueHandle<T, NULLABLE> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.pointer {
            Some(value) => &mut **value,
            None => fail(Violation::NullDereference),
        }
    }
}

impl<T: std::fmt::Debug, const NULLABLE: bool> std::fmt::Debug for UniqueHandle<T, NULLABLE> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UniqueHandle").field(&self.pointer).finish()
    }
}
