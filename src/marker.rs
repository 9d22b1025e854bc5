//! Defines the `RegionMarker` struct.
//! It is a wrapper of the `&'static str` naming the call context that
//! declared an unsafe region. It is not a simple type alias, so that the
//! compiler can warn someone passing an arbitrary string where a marker
//! is expected.

/// Identity of the call context that declared an unsafe region.
///
/// Two markers are equal when their names are equal, so the same
/// function entering a region twice produces equal markers.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RegionMarker(&'static str);

impl core::ops::Deref for RegionMarker {
    type Target = str;
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.0
    }
}

impl From<&'static str> for RegionMarker {
    #[inline]
    fn from(value: &'static str) -> Self {
        Self(value)
    }
}

impl RegionMarker {
    #[inline]
    pub const fn const_from(name: &'static str) -> Self {
        Self(name)
    }

    #[inline]
    pub const fn name(&self) -> &'static str {
        self.0
    }
}

impl std::fmt::Display for RegionMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// The [`RegionMarker`] of the enclosing function, e.g.
/// `my_crate::parser::parse`.
///
/// Inside a closure the path ends in `{{closure}}`.
#[macro_export]
macro_rules! region_marker {
    () => {{
        fn __region_marker() {}
        fn __name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = __name_of(__region_marker);
        $crate::RegionMarker::const_from(
            name.strip_suffix("::__region_marker").unwrap_or(name),
        )
    }};
}
