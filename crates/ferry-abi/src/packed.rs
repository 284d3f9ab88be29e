use core::fmt;

/// A `(pointer, length)` pair describing a byte region in guest linear memory,
/// packed into the single `i64` the guest ABI passes around.
///
/// Encoding:
/// - lower 32 bits: `pointer` (unsigned)
/// - upper 32 bits: `length` (unsigned)
///
/// This is a plain value. Ownership of the region it describes is tracked on the
/// host side by a slice handle, not by this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PackedSlice(u64);

impl PackedSlice {
    /// Packs `(pointer, length)`.
    #[inline]
    pub const fn new(pointer: u32, length: u32) -> Self {
        Self((length as u64) << 32 | (pointer as u64))
    }

    #[inline]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn pointer(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    #[inline]
    pub const fn len(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Unpacks into `(pointer, length)`.
    #[inline]
    pub const fn decode(self) -> (u32, u32) {
        (self.pointer(), self.len())
    }

    /// `true` when either half is zero. Such a value never describes a live
    /// allocation.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.pointer() == 0 || self.len() == 0
    }
}

impl fmt::Debug for PackedSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedSlice")
            .field("pointer", &self.pointer())
            .field("len", &self.len())
            .finish()
    }
}

impl From<PackedSlice> for u64 {
    fn from(value: PackedSlice) -> Self {
        value.raw()
    }
}
