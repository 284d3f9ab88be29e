use crate::buffer::{Buffer, ElementType, Storage, StorageState};
use crate::error::BridgeError;
use crate::guest::GuestAbi;
use crate::slice::SliceHandle;
use ferry_abi::{exports, Envelope, InvokeOutput, PackedSlice, TaskResult, TaskTicket};
use parking_lot::Mutex;
use serde::de::{DeserializeOwned, DeserializeSeed, IgnoredAny, MapAccess, Visitor};
use serde::{Deserializer, Serialize};
use serde_json::Value;

/// Reported when guest output is not a single JSON document.
pub const MALFORMED_OUTPUT: &str = "malformed_output";
/// Reported when `invoke` output carries neither a response nor pending tasks.
pub const UNEXPECTED_OUTPUT: &str = "unexpected_output";
/// Reported when `getTask` output does not describe a task the host can run.
pub const UNSUPPORTED_TASK: &str = "unsupported_task";

/// Typed view of the guest protocol used by the task driver.
pub trait Application: Send + Sync {
    fn invoke(&self, envelope: &Envelope) -> Result<InvokeOutput, BridgeError>;

    fn get_task(&self, request_id: u32, task_id: u32) -> Result<TaskTicket, BridgeError>;

    fn complete_task(
        &self,
        request_id: u32,
        task_id: u32,
        result: &TaskResult,
    ) -> Result<Value, BridgeError>;
}

/// JSON-over-guest-memory calls into one guest.
///
/// Each call encodes its input, copies it into a fresh guest allocation, calls
/// the export, copies the output back and frees both slices, whatever the
/// outcome. Calls are serialized; the guest never sees two at once.
pub struct CallBridge<G> {
    guest: Mutex<G>,
}

impl<G: GuestAbi> CallBridge<G> {
    pub fn new(guest: G) -> Self {
        Self {
            guest: Mutex::new(guest),
        }
    }

    /// Runs `f` with exclusive access to the guest.
    pub fn with_guest<R>(&self, f: impl FnOnce(&mut G) -> R) -> R {
        f(&mut self.guest.lock())
    }

    pub fn into_inner(self) -> G {
        self.guest.into_inner()
    }

    pub fn invoke_value<T: Serialize + ?Sized>(&self, input: &T) -> Result<Value, BridgeError> {
        let input = encode(input)?;
        self.call(exports::INVOKE, Some(input), |guest, input| {
            guest.invoke(packed_input(input)?.raw())
        })
    }

    pub fn get_task_value(&self, request_id: u32, task_id: u32) -> Result<Value, BridgeError> {
        self.call(exports::GET_TASK, None, |guest, _| {
            guest.get_task(request_id, task_id)
        })
    }

    pub fn complete_task_value<T: Serialize + ?Sized>(
        &self,
        request_id: u32,
        task_id: u32,
        result: &T,
    ) -> Result<Value, BridgeError> {
        let input = encode(result)?;
        self.call(exports::COMPLETE_TASK, Some(input), |guest, input| {
            guest.complete_task(request_id, task_id, packed_input(input)?.raw())
        })
    }

    fn call(
        &self,
        operation: &'static str,
        input: Option<Vec<u8>>,
        call: impl FnOnce(&mut G, Option<&SliceHandle>) -> Result<u64, BridgeError>,
    ) -> Result<Value, BridgeError> {
        let input_len = input.as_ref().map_or(0, Vec::len);
        let mut guard = self.guest.lock();
        let guest = &mut *guard;

        let input = input.map(|bytes| stage(guest, bytes)).transpose()?;

        let output = call(guest, input.as_ref().and_then(Buffer::slice))
            .and_then(SliceHandle::from_guest)
            .and_then(|slice| drain(guest, slice));
        let released = match input {
            Some(buffer) => release(guest, buffer).map(drop),
            None => Ok(()),
        };
        drop(guard);

        let output = output?;
        released?;

        tracing::debug!(
            operation,
            input_bytes = input_len,
            output_bytes = output.len(),
            "guest call finished"
        );
        decode_output(operation, &output)
    }
}

impl<G: GuestAbi> Application for CallBridge<G> {
    fn invoke(&self, envelope: &Envelope) -> Result<InvokeOutput, BridgeError> {
        let value = self.invoke_value(envelope)?;
        classify_invoke_output(value)
    }

    fn get_task(&self, request_id: u32, task_id: u32) -> Result<TaskTicket, BridgeError> {
        let value = self.get_task_value(request_id, task_id)?;
        parse(exports::GET_TASK, value, UNSUPPORTED_TASK)
    }

    fn complete_task(
        &self,
        request_id: u32,
        task_id: u32,
        result: &TaskResult,
    ) -> Result<Value, BridgeError> {
        self.complete_task_value(request_id, task_id, result)
    }
}

impl<G> std::fmt::Debug for CallBridge<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBridge").finish_non_exhaustive()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, BridgeError> {
    serde_json::to_vec(value)
        .map_err(|err| BridgeError::InvalidArgument(format!("failed to encode guest input: {err}")))
}

fn packed_input(input: Option<&SliceHandle>) -> Result<PackedSlice, BridgeError> {
    input
        .ok_or(BridgeError::AlreadyInState {
            state: StorageState::Local,
        })?
        .packed()
}

fn allocate<G: GuestAbi + ?Sized>(guest: &mut G, size: u32) -> Result<SliceHandle, BridgeError> {
    let value = guest.allocate_bytes(size)?;
    SliceHandle::from_guest(value)
}

/// Invalidates `slice` before handing it to `freeBytes`, so a failing export
/// can never lead to a second free.
fn free<G: GuestAbi + ?Sized>(guest: &mut G, mut slice: SliceHandle) -> Result<(), BridgeError> {
    let packed = slice.packed()?;
    slice.invalidate()?;
    guest.free_bytes(packed.raw())
}

/// Copies `bytes` into a new guest allocation.
fn stage<G: GuestAbi + ?Sized>(guest: &mut G, bytes: Vec<u8>) -> Result<Buffer, BridgeError> {
    let size = u32::try_from(bytes.len()).map_err(|_| {
        BridgeError::InvalidArgument(format!("guest input of {} bytes is too large", bytes.len()))
    })?;
    let mut buffer = Buffer::local(ElementType::U8, bytes)?;
    let slice = allocate(guest, size)?;
    match buffer.exchange_to_remote(slice, guest) {
        Ok(_) => Ok(buffer),
        Err(rejected) => {
            let (err, slice) = rejected.into_parts();
            free_after_failure(guest, slice);
            Err(err)
        }
    }
}

/// Copies a guest output slice back to the host and frees it.
fn drain<G: GuestAbi + ?Sized>(guest: &mut G, slice: SliceHandle) -> Result<Vec<u8>, BridgeError> {
    match Buffer::remote(ElementType::U8, slice) {
        Ok(buffer) => release(guest, buffer),
        Err(rejected) => {
            let (err, slice) = rejected.into_parts();
            free_after_failure(guest, slice);
            Err(err)
        }
    }
}

/// Turns a remote buffer local and frees the slice it held. The slice is freed
/// even when the copy fails.
fn release<G: GuestAbi + ?Sized>(guest: &mut G, mut buffer: Buffer) -> Result<Vec<u8>, BridgeError> {
    let storage = vec![0; buffer.byte_length()];
    match buffer.exchange_to_local(storage, &*guest) {
        Ok(slice) => {
            free(guest, slice)?;
            buffer.into_local().map_err(|_| BridgeError::AlreadyInState {
                state: StorageState::Remote,
            })
        }
        Err(rejected) => {
            if let Storage::Remote(slice) = buffer.into_storage() {
                free_after_failure(guest, slice);
            }
            Err(rejected.error)
        }
    }
}

fn free_after_failure<G: GuestAbi + ?Sized>(guest: &mut G, slice: SliceHandle) {
    if let Err(err) = free(guest, slice) {
        tracing::warn!(error = %err, "failed to free guest slice after an earlier error");
    }
}

/// Parses the first JSON document of a guest output.
///
/// An `error` field wins over everything else in the document, including
/// bytes that follow it. Without one, the output must be exactly one document.
fn decode_output(operation: &'static str, bytes: &[u8]) -> Result<Value, BridgeError> {
    let mut documents = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
    let value = match documents.next() {
        Some(Ok(value)) => value,
        Some(Err(err)) => {
            if let Some(id) = scan_error_id(bytes) {
                tracing::debug!(
                    operation,
                    id = %id,
                    "guest reported an error in malformed output"
                );
                return Err(BridgeError::ApplicationError { id });
            }
            tracing::warn!(operation, error = %err, "guest output is not valid JSON");
            return Err(BridgeError::application(MALFORMED_OUTPUT));
        }
        None => {
            tracing::warn!(operation, "guest output is empty");
            return Err(BridgeError::application(MALFORMED_OUTPUT));
        }
    };

    if let Some(error) = value.get("error") {
        let id = guest_error_id(error);
        tracing::debug!(operation, id = %id, "guest reported an error");
        return Err(BridgeError::ApplicationError { id });
    }

    let consumed = documents.byte_offset();
    if !bytes[consumed..].iter().all(u8::is_ascii_whitespace) {
        tracing::warn!(
            operation,
            trailing_bytes = bytes.len() - consumed,
            "guest output has trailing data"
        );
        return Err(BridgeError::application(MALFORMED_OUTPUT));
    }

    Ok(value)
}

/// Reads the top-level object of `bytes` as far as it parses and returns the
/// id of an `error` member seen on the way.
fn scan_error_id(bytes: &[u8]) -> Option<String> {
    let mut id = None;
    let mut deserializer = serde_json::Deserializer::from_slice(bytes);
    // The document is already known to be malformed; only the id matters.
    let _ = ErrorScan(&mut id).deserialize(&mut deserializer);
    id
}

struct ErrorScan<'a>(&'a mut Option<String>);

impl<'de> DeserializeSeed<'de> for ErrorScan<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for ErrorScan<'_> {
    type Value = ();

    fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("a guest output object")
    }

    fn visit_map<M: MapAccess<'de>>(self, mut map: M) -> Result<(), M::Error> {
        while let Some(key) = map.next_key::<String>()? {
            if key == "error" {
                let error: Value = map.next_value()?;
                *self.0 = Some(guest_error_id(&error));
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(())
    }
}

fn guest_error_id(error: &Value) -> String {
    match error {
        Value::String(id) => id.clone(),
        Value::Object(fields) => match fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => error.to_string(),
        },
        other => other.to_string(),
    }
}

fn classify_invoke_output(value: Value) -> Result<InvokeOutput, BridgeError> {
    let Value::Object(mut fields) = value else {
        tracing::warn!("guest `invoke` output is not an object");
        return Err(BridgeError::application(UNEXPECTED_OUTPUT));
    };

    if let Some(response) = fields.remove("httpResponse") {
        return parse(exports::INVOKE, response, MALFORMED_OUTPUT).map(InvokeOutput::HttpResponse);
    }
    if let Some(pending) = fields.remove("pendingTasks") {
        return parse(exports::INVOKE, pending, MALFORMED_OUTPUT).map(InvokeOutput::PendingTasks);
    }

    tracing::warn!(
        keys = ?fields.keys().collect::<Vec<_>>(),
        "guest `invoke` output has neither `httpResponse` nor `pendingTasks`"
    );
    Err(BridgeError::application(UNEXPECTED_OUTPUT))
}

fn parse<T: DeserializeOwned>(
    operation: &'static str,
    value: Value,
    id: &'static str,
) -> Result<T, BridgeError> {
    serde_json::from_value(value).map_err(|err| {
        tracing::warn!(operation, error = %err, "guest output does not match the protocol");
        BridgeError::application(id)
    })
}

#[cfg(test)]
mod tests;
