use super::*;
use crate::bridge::{Application, CallBridge};
use crate::test_guests::{guest, ECHO_INVOKE, GROW_INVOKE, RESPOND_INVOKE, TRAP_INVOKE};
use ferry_abi::{Envelope, HttpRequest, HttpResponse, InvokeOutput, TaskResult};
use serde_json::json;

fn bridge(invoke: &str) -> CallBridge<WasmGuest> {
    bridge_with(invoke, GuestConfig::default())
}

fn bridge_with(invoke: &str, config: GuestConfig) -> CallBridge<WasmGuest> {
    CallBridge::new(WasmGuest::from_wat(&guest(invoke), &config).unwrap())
}

fn live(bridge: &CallBridge<WasmGuest>) -> i32 {
    bridge.with_guest(|guest| guest.global_i32("live").unwrap())
}

#[test]
fn initialize_runs_once_on_instantiate() {
    let bridge = bridge(ECHO_INVOKE);
    let initialized = bridge.with_guest(|guest| guest.global_i32("initialized"));
    assert_eq!(initialized, Some(1));
}

#[test]
fn echo_round_trip_frees_every_slice() {
    let bridge = bridge(ECHO_INVOKE);
    let input = json!({ "requestId": 7, "payload": ["a", "b", "c"] });

    for _ in 0..3 {
        assert_eq!(bridge.invoke_value(&input).unwrap(), input);
        assert_eq!(live(&bridge), 0);
    }
}

#[test]
fn output_from_grown_memory_is_read() {
    let bridge = bridge(GROW_INVOKE);
    let before = bridge.with_guest(|guest| guest.memory_size());
    let input = json!({ "grow": true });

    assert_eq!(bridge.invoke_value(&input).unwrap(), input);

    let after = bridge.with_guest(|guest| guest.memory_size());
    assert_eq!(after, before + 65536);
    assert_eq!(live(&bridge), 0);
}

#[test]
fn memory_limit_stops_growth_and_still_frees_input() {
    let config = GuestConfig {
        module: None,
        max_memory_bytes: Some(64 * 1024),
    };
    let bridge = bridge_with(GROW_INVOKE, config);

    let err = bridge.invoke_value(&json!({ "grow": true })).unwrap_err();

    assert!(
        matches!(err, BridgeError::Guest { operation: "invoke", .. }),
        "got {err:?}"
    );
    assert_eq!(live(&bridge), 0);
}

#[test]
fn trap_frees_input() {
    let bridge = bridge(TRAP_INVOKE);

    let err = bridge.invoke_value(&json!({})).unwrap_err();

    assert!(
        matches!(err, BridgeError::Guest { operation: "invoke", .. }),
        "got {err:?}"
    );
    assert_eq!(live(&bridge), 0);
}

#[test]
fn get_task_error_output_is_application_error() {
    let bridge = bridge(ECHO_INVOKE);

    let err = bridge.get_task_value(1, 1).unwrap_err();

    assert_eq!(err.application_id(), Some("no_such_task"));
    assert_eq!(live(&bridge), 0);
}

#[test]
fn complete_task_passes_result_through() {
    let bridge = bridge(ECHO_INVOKE);
    let result = TaskResult::Response(HttpResponse {
        status: 204,
        headers: Vec::new(),
        content: String::new(),
    });

    let output = bridge.complete_task(1, 2, &result).unwrap();

    assert_eq!(
        output,
        json!({ "response": { "status": 204, "headers": [], "content": "" } })
    );
    assert_eq!(live(&bridge), 0);
}

#[test]
fn invoke_classifies_guest_response() {
    let bridge = bridge(RESPOND_INVOKE);
    let envelope = Envelope {
        request_id: 1,
        http_request: HttpRequest::get("https://example.test/app"),
    };

    let InvokeOutput::HttpResponse(response) = bridge.invoke(&envelope).unwrap() else {
        panic!("expected a finished response");
    };

    assert_eq!(response.status, 200);
    assert_eq!(response.content, "hello from guest");
    assert_eq!(live(&bridge), 0);
}

#[test]
fn missing_export_is_reported() {
    let wat = r#"
(module
  (memory (export "memory") 1)
  (func (export "initialize")))
"#;
    let err = WasmGuest::from_wat(wat, &GuestConfig::default()).unwrap_err();
    assert_eq!(err, LoadError::MissingExport("allocateBytes"));
}

#[test]
fn invalid_module_fails_to_compile() {
    let err = WasmGuest::from_bytes(b"\0asm\x01\0\0\0garbage", &GuestConfig::default())
        .unwrap_err();
    assert!(matches!(err, LoadError::Compile(_)), "got {err:?}");
}
