#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod guest;
mod packed;
mod wire;

pub use packed::PackedSlice;
pub use wire::{
    Envelope, ErrorOutput, GuestErrorId, Header, HttpRequest, HttpResponse, InvokeOutput,
    PendingTasks, TaskData, TaskErrorCode, TaskResult, TaskTicket,
};

/// Names of the exports every guest module must provide.
pub mod exports {
    pub const MEMORY: &str = "memory";
    pub const INITIALIZE: &str = "initialize";
    pub const ALLOCATE_BYTES: &str = "allocateBytes";
    pub const FREE_BYTES: &str = "freeBytes";
    pub const INVOKE: &str = "invoke";
    pub const GET_TASK: &str = "getTask";
    pub const COMPLETE_TASK: &str = "completeTask";
}
