use crate::error::BridgeError;

/// Byte-addressable guest linear memory.
///
/// Guest memory can grow (and move) on any allocation, free or call, so
/// implementations must resolve `pointer` against the *current* memory on every
/// access and never hand out a view that outlives the call.
pub trait GuestMemory {
    /// Copies `out.len()` bytes starting at `pointer` into `out`.
    fn read(&self, pointer: u32, out: &mut [u8]) -> Result<(), BridgeError>;

    /// Copies `data` into guest memory starting at `pointer`.
    fn write(&mut self, pointer: u32, data: &[u8]) -> Result<(), BridgeError>;
}

impl<M: GuestMemory + ?Sized> GuestMemory for &mut M {
    fn read(&self, pointer: u32, out: &mut [u8]) -> Result<(), BridgeError> {
        (**self).read(pointer, out)
    }

    fn write(&mut self, pointer: u32, data: &[u8]) -> Result<(), BridgeError> {
        (**self).write(pointer, data)
    }
}
