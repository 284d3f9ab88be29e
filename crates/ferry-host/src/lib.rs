//! `ferry-host` moves byte buffers in and out of a sandboxed WebAssembly guest
//! and lets that synchronous guest request asynchronous effects (outbound HTTP)
//! through a resumable task protocol:
//!
//! 1. the host `invoke`s the guest with a request envelope;
//! 2. the guest either answers, or returns the ids of tasks it needs performed;
//! 3. the host fetches each task with `getTask`, performs it, reports the
//!    outcome with `completeTask`, and invokes the same envelope again.
//!
//! Guest-owned memory is only ever reached through a [`SliceHandle`], owned by
//! exactly one [`Buffer`] or bridge operation, and freed exactly once.

mod bridge;
mod buffer;
mod driver;
mod error;
mod fetch;
mod gateway;
mod guest;
mod ids;
mod loader;
mod memory;
pub mod metrics;
mod slice;
#[cfg(test)]
mod test_guests;

pub use bridge::{
    Application, CallBridge, MALFORMED_OUTPUT, UNEXPECTED_OUTPUT, UNSUPPORTED_TASK,
};
pub use buffer::{Buffer, ElementType, NumericKind, Storage, StorageState};
pub use driver::TaskDriver;
pub use error::{BridgeError, Rejected};
pub use fetch::{FetchError, HttpFetch, ReqwestFetch};
pub use gateway::{Gateway, Route};
pub use guest::{GuestAbi, WasmGuest};
pub use ids::{RequestIdLease, RequestIds};
pub use loader::{GuestSource, LoadError, Loader, WasmApplication};
pub use memory::GuestMemory;
pub use metrics::{DriverMetricsSink, NoopMetricsSink, TestMetricsSink, TestMetricsSnapshot};
pub use slice::SliceHandle;

pub use ferry_abi::{
    Envelope, Header, HttpRequest, HttpResponse, InvokeOutput, PackedSlice, PendingTasks,
    TaskData, TaskErrorCode, TaskResult, TaskTicket,
};
pub use ferry_config::{DriverConfig, GatewayConfig, GuestConfig};
