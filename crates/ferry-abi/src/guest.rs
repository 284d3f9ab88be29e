//! Helpers for implementing Ferry guest modules in Rust.
//!
//! A guest exports `allocateBytes`/`freeBytes` on top of [`allocate`] and [`free`],
//! reads host input with [`read_bytes`], and hands results back with
//! [`return_bytes`]. The host frees every returned buffer through `freeBytes`
//! exactly once.

use crate::PackedSlice;
use alloc::vec::Vec;

/// Allocate `len` bytes in guest memory and return the packed slice.
///
/// This is a simple `Vec<u8>`-backed allocator. The packed value carries the
/// length, so [`free`] can rebuild the allocation from it alone.
#[inline]
pub fn allocate(len: u32) -> u64 {
    if len == 0 {
        return 0;
    }

    let cap = usize::try_from(len).unwrap_or(usize::MAX);
    let mut buf = Vec::<u8>::with_capacity(cap);
    let ptr = buf.as_mut_ptr();
    core::mem::forget(buf);
    PackedSlice::new(ptr as u32, len).raw()
}

/// Free a buffer previously returned by [`allocate`] or [`return_bytes`].
///
/// # Safety
///
/// - `value` must have been returned by [`allocate`] or [`return_bytes`].
/// - The buffer must not be used after calling this function.
#[inline]
pub unsafe fn free(value: u64) {
    let slice = PackedSlice::from_raw(value);
    if slice.is_null() {
        return;
    }

    let cap = usize::try_from(slice.len()).unwrap_or(usize::MAX);
    // Safety: caller must uphold the contract described above.
    drop(Vec::<u8>::from_raw_parts(slice.pointer() as *mut u8, 0, cap));
}

/// Borrow the bytes described by a packed slice handed in by the host.
///
/// # Safety
///
/// The host must provide a slice that is live in this guest's linear memory for
/// the duration of the borrow.
#[inline]
pub unsafe fn read_bytes<'a>(value: u64) -> &'a [u8] {
    let slice = PackedSlice::from_raw(value);
    if slice.is_null() {
        return &[];
    }
    let len = usize::try_from(slice.len()).unwrap_or(usize::MAX);
    // Safety: caller must uphold pointer validity.
    core::slice::from_raw_parts(slice.pointer() as *const u8, len)
}

/// Allocate a buffer of exactly `bytes.len()` bytes, copy `bytes` into it and
/// return the packed slice for the host.
#[inline]
pub fn return_bytes(bytes: &[u8]) -> u64 {
    let Ok(len) = u32::try_from(bytes.len()) else {
        return 0;
    };
    let packed = allocate(len);
    if packed == 0 {
        return 0;
    }

    let ptr = PackedSlice::from_raw(packed).pointer() as *mut u8;
    // Safety: `allocate` reserved `len` bytes of capacity at `ptr`.
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
    }
    packed
}
