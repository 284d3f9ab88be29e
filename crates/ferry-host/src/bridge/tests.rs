use super::*;
use crate::memory::GuestMemory;
use ferry_abi::{HttpRequest, HttpResponse, PendingTasks, TaskData, TaskErrorCode};
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};

enum Reply {
    Bytes(Vec<u8>),
    Raw(u64),
    Trap,
}

/// In-process guest with a bump allocator that records every allocation, free
/// and call input.
struct ScriptedGuest {
    memory: Vec<u8>,
    heap: u32,
    live: BTreeMap<u32, u32>,
    frees: Vec<PackedSlice>,
    inputs: Vec<Vec<u8>>,
    replies: VecDeque<Reply>,
    refuse_allocation: bool,
}

impl ScriptedGuest {
    fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            memory: vec![0; 64 * 1024],
            heap: 1024,
            live: BTreeMap::new(),
            frees: Vec::new(),
            inputs: Vec::new(),
            replies: replies.into_iter().collect(),
            refuse_allocation: false,
        }
    }

    fn replying(bytes: &[u8]) -> Self {
        Self::new([Reply::Bytes(bytes.to_vec())])
    }

    fn reply(&mut self, operation: &'static str) -> Result<u64, BridgeError> {
        match self.replies.pop_front() {
            Some(Reply::Bytes(bytes)) => {
                let value = self.allocate_bytes(bytes.len() as u32)?;
                let pointer = PackedSlice::from_raw(value).pointer();
                self.write(pointer, &bytes)?;
                Ok(value)
            }
            Some(Reply::Raw(value)) => Ok(value),
            Some(Reply::Trap) => Err(BridgeError::Guest {
                operation,
                message: "wasm trap: unreachable".into(),
            }),
            None => panic!("no scripted reply left for `{operation}`"),
        }
    }

    fn record_input(&mut self, input: u64) -> Result<(), BridgeError> {
        let (pointer, len) = PackedSlice::from_raw(input).decode();
        let mut bytes = vec![0; len as usize];
        self.read(pointer, &mut bytes)?;
        self.inputs.push(bytes);
        Ok(())
    }

    fn input_json(&self, index: usize) -> Value {
        serde_json::from_slice(&self.inputs[index]).unwrap()
    }
}

impl GuestMemory for ScriptedGuest {
    fn read(&self, pointer: u32, out: &mut [u8]) -> Result<(), BridgeError> {
        let start = pointer as usize;
        let bytes = self
            .memory
            .get(start..start + out.len())
            .ok_or_else(|| BridgeError::Guest {
                operation: "memory.read",
                message: "out of bounds memory access".into(),
            })?;
        out.copy_from_slice(bytes);
        Ok(())
    }

    fn write(&mut self, pointer: u32, data: &[u8]) -> Result<(), BridgeError> {
        let start = pointer as usize;
        let bytes = self
            .memory
            .get_mut(start..start + data.len())
            .ok_or_else(|| BridgeError::Guest {
                operation: "memory.write",
                message: "out of bounds memory access".into(),
            })?;
        bytes.copy_from_slice(data);
        Ok(())
    }
}

impl GuestAbi for ScriptedGuest {
    fn allocate_bytes(&mut self, size: u32) -> Result<u64, BridgeError> {
        if self.refuse_allocation {
            return Ok(0);
        }
        let pointer = self.heap;
        self.heap += size;
        self.live.insert(pointer, size);
        Ok(PackedSlice::new(pointer, size).raw())
    }

    fn free_bytes(&mut self, slice: u64) -> Result<(), BridgeError> {
        let slice = PackedSlice::from_raw(slice);
        self.frees.push(slice);
        self.live.remove(&slice.pointer());
        Ok(())
    }

    fn invoke(&mut self, input: u64) -> Result<u64, BridgeError> {
        self.record_input(input)?;
        self.reply(exports::INVOKE)
    }

    fn get_task(&mut self, _request_id: u32, _task_id: u32) -> Result<u64, BridgeError> {
        self.reply(exports::GET_TASK)
    }

    fn complete_task(
        &mut self,
        _request_id: u32,
        _task_id: u32,
        result: u64,
    ) -> Result<u64, BridgeError> {
        self.record_input(result)?;
        self.reply(exports::COMPLETE_TASK)
    }
}

fn envelope() -> Envelope {
    Envelope {
        request_id: 1,
        http_request: HttpRequest::get("https://example.test/app/items"),
    }
}

#[test]
fn invoke_round_trips_json_and_frees_both_slices() {
    let bridge = CallBridge::new(ScriptedGuest::replying(br#"{"ok":true}"#));

    let output = bridge.invoke_value(&json!({ "hello": "guest" })).unwrap();

    assert_eq!(output, json!({ "ok": true }));
    let guest = bridge.into_inner();
    assert_eq!(guest.input_json(0), json!({ "hello": "guest" }));
    assert!(guest.live.is_empty(), "leaked slices: {:?}", guest.live);
    assert_eq!(guest.frees.len(), 2);
}

#[test]
fn error_field_becomes_application_error() {
    let bridge = CallBridge::new(ScriptedGuest::replying(
        br#"{"error":{"id":"not_found"},"httpResponse":{"status":200}}"#,
    ));

    let err = bridge.invoke(&envelope()).unwrap_err();

    assert_eq!(err.application_id(), Some("not_found"));
    assert!(bridge.into_inner().live.is_empty());
}

#[test]
fn error_string_is_used_as_id() {
    let bridge = CallBridge::new(ScriptedGuest::replying(br#"{"error":"bad_request"}"#));
    let err = bridge.invoke_value(&json!({})).unwrap_err();
    assert_eq!(err.application_id(), Some("bad_request"));
}

#[test]
fn error_wins_over_trailing_garbage() {
    let bridge = CallBridge::new(ScriptedGuest::replying(
        br#"{"error":{"id":"boom"}} <<<not json"#,
    ));
    let err = bridge.invoke_value(&json!({})).unwrap_err();
    assert_eq!(err.application_id(), Some("boom"));
}

#[test]
fn error_wins_over_a_malformed_rest_of_document() {
    for reply in [
        &br#"{"error":{"id":"boom"},"httpResponse":"#[..],
        br#"{"error":{"id":"boom"},"httpResponse":{"status":}}"#,
        br#"{"pendingTasks":{"taskIds":[1]},"error":"boom","#,
    ] {
        let bridge = CallBridge::new(ScriptedGuest::replying(reply));
        let err = bridge.invoke(&envelope()).unwrap_err();
        assert_eq!(err.application_id(), Some("boom"), "reply {reply:?}");
        assert!(bridge.into_inner().live.is_empty());
    }
}

#[test]
fn truncated_error_member_is_malformed() {
    let bridge = CallBridge::new(ScriptedGuest::replying(br#"{"error":{"id":"bo"#));
    let err = bridge.invoke_value(&json!({})).unwrap_err();
    assert_eq!(err.application_id(), Some(MALFORMED_OUTPUT));
}

#[test]
fn unparseable_output_is_malformed() {
    for reply in [&b"not json"[..], br#"{"ok":true} trailing"#, b"   "] {
        let bridge = CallBridge::new(ScriptedGuest::replying(reply));
        let err = bridge.invoke_value(&json!({})).unwrap_err();
        assert_eq!(err.application_id(), Some(MALFORMED_OUTPUT), "reply {reply:?}");
        assert!(bridge.into_inner().live.is_empty());
    }
}

#[test]
fn trap_still_frees_the_input() {
    let bridge = CallBridge::new(ScriptedGuest::new([Reply::Trap]));

    let err = bridge.invoke_value(&json!({ "x": 1 })).unwrap_err();

    assert!(matches!(err, BridgeError::Guest { operation: "invoke", .. }), "got {err:?}");
    let guest = bridge.into_inner();
    assert!(guest.live.is_empty());
    assert_eq!(guest.frees.len(), 1);
}

#[test]
fn null_output_is_invalid_and_input_is_freed() {
    let bridge = CallBridge::new(ScriptedGuest::new([Reply::Raw(0)]));

    let err = bridge.invoke_value(&json!({})).unwrap_err();

    assert!(matches!(err, BridgeError::InvalidArgument(_)), "got {err:?}");
    assert!(bridge.into_inner().live.is_empty());
}

#[test]
fn unreadable_output_is_still_freed() {
    let bogus = PackedSlice::new(1 << 20, 16);
    let bridge = CallBridge::new(ScriptedGuest::new([Reply::Raw(bogus.raw())]));

    let err = bridge.invoke_value(&json!({})).unwrap_err();

    assert!(matches!(err, BridgeError::Guest { .. }), "got {err:?}");
    let guest = bridge.into_inner();
    assert!(guest.frees.contains(&bogus));
    assert!(guest.live.is_empty());
}

#[test]
fn failed_allocation_skips_the_call() {
    let mut guest = ScriptedGuest::new([]);
    guest.refuse_allocation = true;
    let bridge = CallBridge::new(guest);

    let err = bridge.invoke_value(&json!({})).unwrap_err();

    assert!(matches!(err, BridgeError::InvalidArgument(_)), "got {err:?}");
    let guest = bridge.into_inner();
    assert!(guest.inputs.is_empty());
    assert!(guest.frees.is_empty());
}

#[test]
fn get_task_has_no_input_and_frees_its_output() {
    let ticket = json!({
        "taskId": 4,
        "data": { "http": { "request": { "url": "https://upstream.test/", "method": "GET" } } }
    });
    let bridge = CallBridge::new(ScriptedGuest::replying(ticket.to_string().as_bytes()));

    let ticket = bridge.get_task(1, 4).unwrap();

    assert_eq!(ticket.task_id, 4);
    let TaskData::Http { request } = ticket.data;
    assert_eq!(request, HttpRequest::get("https://upstream.test/"));
    let guest = bridge.into_inner();
    assert!(guest.inputs.is_empty());
    assert_eq!(guest.frees.len(), 1);
    assert!(guest.live.is_empty());
}

#[test]
fn unknown_task_kind_is_unsupported() {
    let bridge = CallBridge::new(ScriptedGuest::replying(
        br#"{"taskId":1,"data":{"sleep":{"ms":5}}}"#,
    ));
    let err = bridge.get_task(1, 1).unwrap_err();
    assert_eq!(err.application_id(), Some(UNSUPPORTED_TASK));
}

#[test]
fn invoke_output_is_classified() {
    let bridge = CallBridge::new(ScriptedGuest::new([
        Reply::Bytes(br#"{"httpResponse":{"status":201,"headers":[],"content":"made"}}"#.to_vec()),
        Reply::Bytes(br#"{"pendingTasks":{"taskIds":[1,2]}}"#.to_vec()),
        Reply::Bytes(br#"{"somethingElse":true}"#.to_vec()),
        Reply::Bytes(br#"{"httpResponse":{"status":"oops"}}"#.to_vec()),
    ]));

    assert_eq!(
        bridge.invoke(&envelope()).unwrap(),
        InvokeOutput::HttpResponse(HttpResponse {
            status: 201,
            headers: Vec::new(),
            content: "made".into(),
        })
    );
    assert_eq!(
        bridge.invoke(&envelope()).unwrap(),
        InvokeOutput::PendingTasks(PendingTasks {
            task_ids: vec![1, 2]
        })
    );
    assert_eq!(
        bridge.invoke(&envelope()).unwrap_err().application_id(),
        Some(UNEXPECTED_OUTPUT)
    );
    assert_eq!(
        bridge.invoke(&envelope()).unwrap_err().application_id(),
        Some(MALFORMED_OUTPUT)
    );

    let guest = bridge.into_inner();
    assert_eq!(guest.input_json(0), serde_json::to_value(envelope()).unwrap());
    assert!(guest.live.is_empty());
}

#[test]
fn complete_task_sends_the_encoded_result() {
    let bridge = CallBridge::new(ScriptedGuest::replying(b"{}"));

    let output = bridge
        .complete_task(3, 9, &TaskResult::Error(TaskErrorCode::ConnectFailed))
        .unwrap();

    assert_eq!(output, json!({}));
    let guest = bridge.into_inner();
    assert_eq!(guest.input_json(0), json!({ "error": "connect_failed" }));
    assert!(guest.live.is_empty());
    assert_eq!(guest.frees.len(), 2);
}
