//! Example Ferry guest that proxies `GET /app/proxy?url=<target>` through one
//! host HTTP task per request.
//!
//! The first `invoke` for a request id queues a task and reports it pending.
//! Once the host completed the task, the next `invoke` answers with the
//! upstream response, or a `502` when the fetch failed.

use ferry_abi::{
    guest, Envelope, ErrorOutput, Header, HttpRequest, HttpResponse, InvokeOutput, PendingTasks,
    TaskData, TaskResult, TaskTicket,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use url::Url;

pub const PROXY_PATH: &str = "/app/proxy";
pub const PROXY_HEADER: &str = "x-proxied-by";

/// Every request issues exactly one task, so the id is fixed.
const FETCH_TASK: u32 = 1;

static PROXY: Mutex<Proxy> = Mutex::new(Proxy::new());

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Waiting(HttpRequest),
    Done(TaskResult),
}

/// Per-request proxy state, keyed by the host's request id.
#[derive(Debug, Default)]
pub struct Proxy {
    requests: BTreeMap<u32, Pending>,
}

impl Proxy {
    pub const fn new() -> Self {
        Self {
            requests: BTreeMap::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.requests.len()
    }

    pub fn invoke(&mut self, envelope: &Envelope) -> InvokeOutput {
        let request_id = envelope.request_id;
        match self.requests.remove(&request_id) {
            Some(Pending::Done(result)) => return InvokeOutput::HttpResponse(finish(result)),
            Some(waiting @ Pending::Waiting(_)) => {
                self.requests.insert(request_id, waiting);
                return pending();
            }
            None => {}
        }

        let Ok(url) = Url::parse(&envelope.http_request.url) else {
            return InvokeOutput::HttpResponse(plain(400, "invalid request url"));
        };
        if url.path() != PROXY_PATH {
            return InvokeOutput::HttpResponse(plain(404, "not found"));
        }
        let Some(target) = url
            .query_pairs()
            .find_map(|(key, value)| (key == "url").then(|| value.into_owned()))
        else {
            return InvokeOutput::HttpResponse(plain(400, "missing `url` query parameter"));
        };

        self.requests
            .insert(request_id, Pending::Waiting(HttpRequest::get(target)));
        pending()
    }

    pub fn get_task(&self, request_id: u32, task_id: u32) -> Result<TaskTicket, ErrorOutput> {
        match self.requests.get(&request_id) {
            Some(Pending::Waiting(request)) if task_id == FETCH_TASK => Ok(TaskTicket {
                task_id,
                data: TaskData::Http {
                    request: request.clone(),
                },
            }),
            _ => Err(ErrorOutput::new("no_such_task")),
        }
    }

    pub fn complete_task(
        &mut self,
        request_id: u32,
        task_id: u32,
        result: TaskResult,
    ) -> Result<(), ErrorOutput> {
        match self.requests.get_mut(&request_id) {
            Some(state @ Pending::Waiting(_)) if task_id == FETCH_TASK => {
                *state = Pending::Done(result);
                Ok(())
            }
            _ => Err(ErrorOutput::new("no_such_task")),
        }
    }
}

fn pending() -> InvokeOutput {
    InvokeOutput::PendingTasks(PendingTasks {
        task_ids: vec![FETCH_TASK],
    })
}

fn finish(result: TaskResult) -> HttpResponse {
    let mut response = match result {
        TaskResult::Response(response) => response,
        TaskResult::Error(code) => plain(502, code.as_str()),
    };
    response.headers.push(Header::new(PROXY_HEADER, "ferry"));
    response
}

fn plain(status: u16, content: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: vec![Header::new("content-type", "text/plain")],
        content: content.into(),
    }
}

fn respond<T: Serialize>(value: &T) -> u64 {
    match serde_json::to_vec(value) {
        Ok(bytes) => guest::return_bytes(&bytes),
        Err(_) => 0,
    }
}

fn with_proxy<R>(f: impl FnOnce(&mut Proxy) -> R) -> R {
    let mut proxy = PROXY.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut proxy)
}

#[no_mangle]
pub extern "C" fn initialize() {
    with_proxy(|proxy| *proxy = Proxy::new());
}

#[export_name = "allocateBytes"]
pub extern "C" fn allocate_bytes(len: u32) -> u64 {
    guest::allocate(len)
}

/// Frees a buffer previously returned by [`allocate_bytes`] or any other export.
///
/// # Safety
///
/// `value` must be a packed slice this guest handed out, and it must not be used
/// after calling this function.
#[export_name = "freeBytes"]
pub unsafe extern "C" fn free_bytes(value: u64) {
    guest::free(value);
}

#[no_mangle]
pub extern "C" fn invoke(input: u64) -> u64 {
    let bytes = unsafe { guest::read_bytes(input) };
    let Ok(envelope) = serde_json::from_slice::<Envelope>(bytes) else {
        return respond(&ErrorOutput::new("invalid_input"));
    };
    let output = with_proxy(|proxy| proxy.invoke(&envelope));
    respond(&output)
}

#[export_name = "getTask"]
pub extern "C" fn get_task(request_id: u32, task_id: u32) -> u64 {
    match with_proxy(|proxy| proxy.get_task(request_id, task_id)) {
        Ok(ticket) => respond(&ticket),
        Err(error) => respond(&error),
    }
}

#[export_name = "completeTask"]
pub extern "C" fn complete_task(request_id: u32, task_id: u32, input: u64) -> u64 {
    let bytes = unsafe { guest::read_bytes(input) };
    let Ok(result) = serde_json::from_slice::<TaskResult>(bytes) else {
        return respond(&ErrorOutput::new("invalid_input"));
    };
    match with_proxy(|proxy| proxy.complete_task(request_id, task_id, result)) {
        Ok(()) => respond(&serde_json::json!({})),
        Err(error) => respond(&error),
    }
}
