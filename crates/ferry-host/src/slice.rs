use crate::error::BridgeError;
use ferry_abi::PackedSlice;

/// Owning handle to a region of guest memory returned by a guest allocation or
/// call.
///
/// Handles are only created from values the guest just returned; application
/// code cannot build one from an arbitrary integer. A handle is valid until it
/// is freed, after which every access fails with [`BridgeError::UseAfterFree`].
#[derive(Debug)]
pub struct SliceHandle {
    packed: PackedSlice,
    valid: bool,
}

impl SliceHandle {
    pub(crate) fn from_guest(value: u64) -> Result<Self, BridgeError> {
        let packed = PackedSlice::from_raw(value);
        if packed.is_null() {
            return Err(BridgeError::InvalidArgument(format!(
                "guest returned a null slice (pointer={}, len={})",
                packed.pointer(),
                packed.len()
            )));
        }
        Ok(Self {
            packed,
            valid: true,
        })
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// `(pointer, length)` of the region.
    pub fn decode(&self) -> Result<(u32, u32), BridgeError> {
        self.packed().map(PackedSlice::decode)
    }

    pub fn packed(&self) -> Result<PackedSlice, BridgeError> {
        if !self.valid {
            return Err(BridgeError::UseAfterFree);
        }
        Ok(self.packed)
    }

    pub fn byte_length(&self) -> Result<usize, BridgeError> {
        self.packed().map(|packed| packed.len() as usize)
    }

    /// Length without the validity check; callers must already know the handle
    /// is live.
    pub(crate) fn len_unchecked(&self) -> usize {
        self.packed.len() as usize
    }

    /// Marks the handle as freed. This is a one-way transition.
    pub fn invalidate(&mut self) -> Result<(), BridgeError> {
        if !self.valid {
            return Err(BridgeError::UseAfterFree);
        }
        self.valid = false;
        Ok(())
    }
}

impl Drop for SliceHandle {
    fn drop(&mut self) {
        if self.valid {
            tracing::warn!(
                pointer = self.packed.pointer(),
                len = self.packed.len(),
                "guest slice dropped without being freed"
            );
        }
    }
}
