use alloc::string::String;
use alloc::vec::Vec;
use serde::{Deserialize, Serialize};

// === HTTP records =============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub content: String,
}

impl HttpRequest {
    /// A bodiless `GET` for `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".into(),
            headers: Vec::new(),
            content: String::new(),
        }
    }

    /// `GET` and `HEAD` requests never carry a body on the wire.
    pub fn allows_body(&self) -> bool {
        !(self.method.eq_ignore_ascii_case("GET") || self.method.eq_ignore_ascii_case("HEAD"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub content: String,
}

// === Invoke ===================================================================

/// Top-level unit of work handed to the guest `invoke` export.
///
/// `request_id` is the key the guest uses to find its own per-request state when
/// the same envelope is invoked again after pending tasks were completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub request_id: u32,
    pub http_request: HttpRequest,
}

/// Successful output of the guest `invoke` export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum InvokeOutput {
    /// The request finished.
    HttpResponse(HttpResponse),
    /// The guest needs the host to perform these tasks before it can continue.
    PendingTasks(PendingTasks),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingTasks {
    pub task_ids: Vec<u32>,
}

// === Tasks ====================================================================

/// Output of the guest `getTask` export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskTicket {
    pub task_id: u32,
    pub data: TaskData,
}

/// Effect the guest wants the host to perform. Only outbound HTTP exists today.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskData {
    Http { request: HttpRequest },
}

/// Input of the guest `completeTask` export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskResult {
    Response(HttpResponse),
    Error(TaskErrorCode),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorCode {
    ConnectFailed,
    Timeout,
    InvalidRequest,
    BodyFailed,
    RequestFailed,
}

impl TaskErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            TaskErrorCode::ConnectFailed => "connect_failed",
            TaskErrorCode::Timeout => "timeout",
            TaskErrorCode::InvalidRequest => "invalid_request",
            TaskErrorCode::BodyFailed => "body_failed",
            TaskErrorCode::RequestFailed => "request_failed",
        }
    }
}

impl core::fmt::Display for TaskErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === Errors ===================================================================

/// Shape of any guest output that reports a failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorOutput {
    pub error: GuestErrorId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestErrorId {
    pub id: String,
}

impl ErrorOutput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            error: GuestErrorId { id: id.into() },
        }
    }
}
