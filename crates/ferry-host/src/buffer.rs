use crate::error::{BridgeError, Rejected};
use crate::memory::GuestMemory;
use crate::slice::SliceHandle;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    Int,
    Float,
}

/// Element type of a [`Buffer`]: numeric kind, signedness and bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType {
    kind: NumericKind,
    signed: bool,
    bits: u8,
}

impl ElementType {
    pub const U8: Self = Self::int(false, 8);
    pub const I8: Self = Self::int(true, 8);
    pub const U16: Self = Self::int(false, 16);
    pub const I16: Self = Self::int(true, 16);
    pub const U32: Self = Self::int(false, 32);
    pub const I32: Self = Self::int(true, 32);
    pub const U64: Self = Self::int(false, 64);
    pub const I64: Self = Self::int(true, 64);
    pub const F32: Self = Self::float(32);
    pub const F64: Self = Self::float(64);

    const fn int(signed: bool, bits: u8) -> Self {
        Self {
            kind: NumericKind::Int,
            signed,
            bits,
        }
    }

    const fn float(bits: u8) -> Self {
        Self {
            kind: NumericKind::Float,
            signed: true,
            bits,
        }
    }

    /// Integers may be 8, 16, 32 or 64 bits wide; floats 32 or 64 bits and
    /// always signed.
    pub fn new(kind: NumericKind, signed: bool, bits: u8) -> Result<Self, BridgeError> {
        let supported = match kind {
            NumericKind::Int => matches!(bits, 8 | 16 | 32 | 64),
            NumericKind::Float => signed && matches!(bits, 32 | 64),
        };
        if !supported {
            return Err(BridgeError::InvalidArgument(format!(
                "unsupported element type: {kind:?} signed={signed} bits={bits}"
            )));
        }
        Ok(Self { kind, signed, bits })
    }

    pub fn kind(self) -> NumericKind {
        self.kind
    }

    pub fn is_signed(self) -> bool {
        self.signed
    }

    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Width of one element in bytes.
    pub fn width(self) -> usize {
        usize::from(self.bits / 8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageState {
    Local,
    Remote,
}

impl fmt::Display for StorageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageState::Local => "local",
            StorageState::Remote => "remote",
        })
    }
}

#[derive(Debug)]
pub enum Storage {
    /// Host-owned bytes.
    Local(Vec<u8>),
    /// Bytes living in guest memory.
    Remote(SliceHandle),
}

/// A typed sequence of numeric elements whose bytes live either on the host or
/// in guest memory, never both.
///
/// Remote contents are always read through the [`GuestMemory`] passed to the
/// call, so a buffer stays correct across guest memory growth.
#[derive(Debug)]
pub struct Buffer {
    element: ElementType,
    storage: Storage,
}

impl Buffer {
    pub fn local(element: ElementType, bytes: Vec<u8>) -> Result<Self, BridgeError> {
        check_width(element, bytes.len())?;
        Ok(Self {
            element,
            storage: Storage::Local(bytes),
        })
    }

    /// Wraps a live guest slice. On rejection the slice is handed back so the
    /// caller can free it.
    pub fn remote(element: ElementType, slice: SliceHandle) -> Result<Self, Rejected<SliceHandle>> {
        let len = match slice.byte_length() {
            Ok(len) => len,
            Err(err) => return Err(Rejected::new(err, slice)),
        };
        if let Err(err) = check_width(element, len) {
            return Err(Rejected::new(err, slice));
        }
        Ok(Self {
            element,
            storage: Storage::Remote(slice),
        })
    }

    pub fn element_type(&self) -> ElementType {
        self.element
    }

    pub fn state(&self) -> StorageState {
        match self.storage {
            Storage::Local(_) => StorageState::Local,
            Storage::Remote(_) => StorageState::Remote,
        }
    }

    pub fn byte_length(&self) -> usize {
        match &self.storage {
            Storage::Local(bytes) => bytes.len(),
            Storage::Remote(slice) => slice.len_unchecked(),
        }
    }

    pub fn element_count(&self) -> usize {
        self.byte_length() / self.element.width()
    }

    /// The guest slice, while the buffer is remote.
    pub fn slice(&self) -> Option<&SliceHandle> {
        match &self.storage {
            Storage::Remote(slice) => Some(slice),
            Storage::Local(_) => None,
        }
    }

    /// Copies out the current contents, wherever they live.
    pub fn to_vec<M: GuestMemory + ?Sized>(&self, memory: &M) -> Result<Vec<u8>, BridgeError> {
        match &self.storage {
            Storage::Local(bytes) => Ok(bytes.clone()),
            Storage::Remote(slice) => {
                let (pointer, len) = slice.decode()?;
                let mut out = vec![0; len as usize];
                memory.read(pointer, &mut out)?;
                Ok(out)
            }
        }
    }

    /// Moves the local bytes into `slice` and makes the buffer remote. Returns
    /// the displaced host bytes.
    ///
    /// The buffer is unchanged on failure and `slice` is handed back.
    pub fn exchange_to_remote<M: GuestMemory + ?Sized>(
        &mut self,
        slice: SliceHandle,
        memory: &mut M,
    ) -> Result<Vec<u8>, Rejected<SliceHandle>> {
        let bytes = match &self.storage {
            Storage::Local(bytes) => bytes,
            Storage::Remote(_) => {
                return Err(Rejected::new(
                    BridgeError::AlreadyInState {
                        state: StorageState::Remote,
                    },
                    slice,
                ))
            }
        };
        let (pointer, len) = match slice.decode() {
            Ok(decoded) => decoded,
            Err(err) => return Err(Rejected::new(err, slice)),
        };
        if len as usize != bytes.len() {
            return Err(Rejected::new(
                BridgeError::LengthMismatch {
                    expected: bytes.len(),
                    found: len as usize,
                },
                slice,
            ));
        }
        if let Err(err) = memory.write(pointer, bytes) {
            return Err(Rejected::new(err, slice));
        }

        match std::mem::replace(&mut self.storage, Storage::Remote(slice)) {
            Storage::Local(bytes) => Ok(bytes),
            Storage::Remote(_) => unreachable!("storage state checked above"),
        }
    }

    /// Copies the guest bytes into `storage` and makes the buffer local.
    /// Returns the displaced slice, which the caller now owns and must free.
    ///
    /// The buffer is unchanged on failure and `storage` is handed back.
    pub fn exchange_to_local<M: GuestMemory + ?Sized>(
        &mut self,
        mut storage: Vec<u8>,
        memory: &M,
    ) -> Result<SliceHandle, Rejected<Vec<u8>>> {
        let slice = match &self.storage {
            Storage::Remote(slice) => slice,
            Storage::Local(_) => {
                return Err(Rejected::new(
                    BridgeError::AlreadyInState {
                        state: StorageState::Local,
                    },
                    storage,
                ))
            }
        };
        let (pointer, len) = match slice.decode() {
            Ok(decoded) => decoded,
            Err(err) => return Err(Rejected::new(err, storage)),
        };
        if len as usize != storage.len() {
            return Err(Rejected::new(
                BridgeError::LengthMismatch {
                    expected: len as usize,
                    found: storage.len(),
                },
                storage,
            ));
        }
        if let Err(err) = memory.read(pointer, &mut storage) {
            return Err(Rejected::new(err, storage));
        }

        match std::mem::replace(&mut self.storage, Storage::Local(storage)) {
            Storage::Remote(slice) => Ok(slice),
            Storage::Local(_) => unreachable!("storage state checked above"),
        }
    }

    pub fn into_storage(self) -> Storage {
        self.storage
    }

    /// The host bytes, or the buffer itself when it is still remote.
    pub fn into_local(self) -> Result<Vec<u8>, Self> {
        match self.storage {
            Storage::Local(bytes) => Ok(bytes),
            storage @ Storage::Remote(_) => Err(Self {
                element: self.element,
                storage,
            }),
        }
    }
}

fn check_width(element: ElementType, len: usize) -> Result<(), BridgeError> {
    if len % element.width() != 0 {
        return Err(BridgeError::InvalidArgument(format!(
            "byte length {len} is not a multiple of the {}-byte element width",
            element.width()
        )));
    }
    Ok(())
}
