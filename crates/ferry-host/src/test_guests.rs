//! WAT guests implementing the full export set, for unit tests.
//!
//! Every guest uses a bump allocator and counts live allocations in the
//! exported `live` global so tests can assert that nothing leaked.

/// `getTask` output of every guest.
pub(crate) const TASK_OUTPUT: &str = r#"{"error":{"id":"no_such_task"}}"#;

/// `invoke` output of [`RESPOND_INVOKE`] guests.
pub(crate) const RESPONSE_OUTPUT: &str = r#"{"httpResponse":{"status":200,"headers":[{"name":"content-type","value":"text/plain"}],"content":"hello from guest"}}"#;

const TASK_OUTPUT_AT: u32 = 16;
const RESPONSE_OUTPUT_AT: u32 = 128;

/// Echoes the input.
pub(crate) const ECHO_INVOKE: &str = "(call $copy (local.get $input))";

/// Echoes the input from a freshly grown memory page.
pub(crate) const GROW_INVOKE: &str = r#"
    (local $page i32)
    (local $len i32)
    (local.set $len (call $len (local.get $input)))
    (local.set $page (memory.grow (i32.const 1)))
    (if (i32.eq (local.get $page) (i32.const -1)) (then (unreachable)))
    (memory.copy
      (i32.mul (local.get $page) (i32.const 65536))
      (call $ptr (local.get $input))
      (local.get $len))
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (call $pack (i32.mul (local.get $page) (i32.const 65536)) (local.get $len))"#;

pub(crate) const TRAP_INVOKE: &str = "(unreachable)";

/// Answers every invoke with [`RESPONSE_OUTPUT`].
pub(crate) const RESPOND_INVOKE: &str = "(call $copy (call $response))";

fn wat_string(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A guest whose `invoke` body is `invoke`; the body sees `$input: i64` and
/// must leave an `i64` slice on the stack.
pub(crate) fn guest(invoke: &str) -> String {
    format!(
        r#"
(module
  (memory (export "memory") 1)
  (global $heap (mut i32) (i32.const 1024))
  (global $live (export "live") (mut i32) (i32.const 0))
  (global $initialized (export "initialized") (mut i32) (i32.const 0))

  (data (i32.const {task_at}) "{task}")
  (data (i32.const {response_at}) "{response}")

  (func (export "initialize")
    (global.set $initialized (i32.add (global.get $initialized) (i32.const 1))))

  (func $pack (param $ptr i32) (param $len i32) (result i64)
    (i64.or
      (i64.shl (i64.extend_i32_u (local.get $len)) (i64.const 32))
      (i64.extend_i32_u (local.get $ptr))))

  (func $ptr (param $slice i64) (result i32)
    (i32.wrap_i64 (local.get $slice)))

  (func $len (param $slice i64) (result i32)
    (i32.wrap_i64 (i64.shr_u (local.get $slice) (i64.const 32))))

  (func $alloc (export "allocateBytes") (param $len i32) (result i64)
    (local $ptr i32)
    (local.set $ptr (global.get $heap))
    (global.set $heap (i32.add (local.get $ptr) (local.get $len)))
    (global.set $live (i32.add (global.get $live) (i32.const 1)))
    (call $pack (local.get $ptr) (local.get $len)))

  (func (export "freeBytes") (param $slice i64)
    (global.set $live (i32.sub (global.get $live) (i32.const 1))))

  (func $copy (param $slice i64) (result i64)
    (local $out i64)
    (local.set $out (call $alloc (call $len (local.get $slice))))
    (memory.copy
      (call $ptr (local.get $out))
      (call $ptr (local.get $slice))
      (call $len (local.get $slice)))
    (local.get $out))

  (func $response (result i64)
    (call $pack (i32.const {response_at}) (i32.const {response_len})))

  (func (export "invoke") (param $input i64) (result i64)
    {invoke})

  (func (export "getTask") (param $request i32) (param $task i32) (result i64)
    (call $copy (call $pack (i32.const {task_at}) (i32.const {task_len}))))

  (func (export "completeTask") (param $request i32) (param $task i32) (param $result i64) (result i64)
    (call $copy (local.get $result)))
)
"#,
        task_at = TASK_OUTPUT_AT,
        task = wat_string(TASK_OUTPUT),
        task_len = TASK_OUTPUT.len(),
        response_at = RESPONSE_OUTPUT_AT,
        response = wat_string(RESPONSE_OUTPUT),
        response_len = RESPONSE_OUTPUT.len(),
        invoke = invoke,
    )
}
