use crate::buffer::StorageState;
use crate::fetch::FetchError;
use crate::loader::LoadError;
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Malformed constructor input (e.g. a null packed slice or a byte length
    /// that is not a multiple of the element width).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A slice handle was used or freed after it had already been freed.
    #[error("guest slice used after it was freed")]
    UseAfterFree,
    #[error("byte length mismatch: expected {expected}, found {found}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("buffer is already {state}")]
    AlreadyInState { state: StorageState },
    /// The guest reported an error, or returned a payload the protocol does not
    /// define.
    #[error("application error: {id}")]
    ApplicationError { id: String },
    /// The guest kept reporting pending tasks for every permitted invoke round.
    #[error("guest still reported pending tasks after {rounds} invoke rounds")]
    ResourceExhausted { rounds: u32 },
    /// The runtime failed a guest export call (trap, out-of-bounds memory
    /// access, ...).
    #[error("guest `{operation}` failed: {message}")]
    Guest {
        operation: &'static str,
        message: String,
    },
    #[error(transparent)]
    Load(#[from] LoadError),
    /// Only surfaced for passthrough requests; task effects that fail are
    /// reported back to the guest instead.
    #[error(transparent)]
    ExternalEffectFailed(#[from] FetchError),
}

impl BridgeError {
    pub fn application(id: impl Into<String>) -> Self {
        BridgeError::ApplicationError { id: id.into() }
    }

    /// The guest-reported identifier, if this is an [`BridgeError::ApplicationError`].
    pub fn application_id(&self) -> Option<&str> {
        match self {
            BridgeError::ApplicationError { id } => Some(id),
            _ => None,
        }
    }
}

/// An operation refused its argument. The argument is handed back so storage
/// that must be released explicitly (guest slices) is never dropped silently.
pub struct Rejected<T> {
    pub error: BridgeError,
    pub value: T,
}

impl<T> Rejected<T> {
    pub(crate) fn new(error: BridgeError, value: T) -> Self {
        Self { error, value }
    }

    pub fn into_parts(self) -> (BridgeError, T) {
        (self.error, self.value)
    }
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}

impl<T> std::error::Error for Rejected<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
