//! Host-function integration: marshalling, gas metering, exits, traps and
//! re-entrancy.

use super::{test_runtime, wat2wasm};
use crate::builtins;
use crate::host::{HostArgs, HostFuncDesc, HostModule};
use crate::instance::Instance;
use crate::isolation::Isolation;
use crate::runtime::{Config, Runtime};
use core::fmt;
use std::sync::Arc;
use wasmet_core::{Error, ErrorKind, HostError, Value, ValueType};

fn record(instance: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let value: i32 = args.nth_checked(0)?;
    let recorded = instance
        .custom_data_mut()
        .and_then(|data| data.downcast_mut::<Vec<i32>>())
        .expect("the test attaches a Vec<i32>");
    recorded.push(value);
    Ok(None)
}

fn take_str(instance: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let offset: u32 = args.nth_checked(0)?;
    let memory = instance.memory_bytes();
    let tail = &memory[offset as usize..];
    let len = tail
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| Error::new(ErrorKind::OutOfBoundsMemory))?;
    let text = String::from_utf8_lossy(&tail[..len]).into_owned();
    instance.set_custom_data(Box::new(text));
    Ok(None)
}

fn reenter(instance: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let a: i32 = args.nth_checked(0)?;
    let b: i32 = args.nth_checked(1)?;
    let results = instance.call_function("add", &[Value::I32(a), Value::I32(b)])?;
    Ok(Some(results[0]))
}

#[derive(Debug)]
struct TestHostError {
    code: u32,
}

impl fmt::Display for TestHostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "test host error, code={}", self.code)
    }
}

impl HostError for TestHostError {}

fn fail(_: &mut Instance, _: HostArgs) -> Result<Option<Value>, Error> {
    Err(Error::host(TestHostError { code: 1312 }))
}

fn test_module() -> HostModule {
    let mut module = HostModule::new("test");
    let funcs = [
        HostFuncDesc::new("record", vec![ValueType::I32], None, record),
        HostFuncDesc::new("take_str", vec![ValueType::I32], None, take_str),
        HostFuncDesc::new(
            "reenter",
            vec![ValueType::I32, ValueType::I32],
            Some(ValueType::I32),
            reenter,
        ),
        HostFuncDesc::new("fail", vec![], None, fail),
    ];
    for desc in funcs {
        module.add_func(desc).unwrap();
    }
    module
}

fn runtime_with_test_module() -> Arc<Runtime> {
    let runtime = test_runtime();
    runtime.register_host_module(test_module()).unwrap();
    runtime
}

fn instantiate_on(
    runtime: &Arc<Runtime>,
    source: &str,
    gas: u64,
) -> (Isolation, crate::isolation::InstanceHandle) {
    let module = runtime.load_module(wat2wasm(source), "test").unwrap();
    let mut isolation = Isolation::new(runtime);
    let handle = isolation.instantiate(&module, gas).unwrap();
    (isolation, handle)
}

#[test]
fn host_functions_receive_marshalled_arguments() {
    let runtime = runtime_with_test_module();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "test" "record" (func $record (param i32)))
            (func (export "run")
                i32.const 3
                call $record
                i32.const 5
                call $record))
        "#,
        0,
    );
    iso.instance_mut(inst)
        .unwrap()
        .set_custom_data(Box::new(Vec::<i32>::new()));
    iso.call(inst, "run", &[]).unwrap();
    let recorded = iso
        .instance(inst)
        .unwrap()
        .custom_data()
        .and_then(|data| data.downcast_ref::<Vec<i32>>())
        .unwrap();
    assert_eq!(recorded, &[3, 5]);
}

#[test]
fn print_str_scenario() {
    // The classic hello-world embedding: memory holds a NUL-terminated
    // string at offset 20, the entry calls the host with that offset and
    // returns 100.
    let runtime = runtime_with_test_module();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "test" "take_str" (func $take_str (param i32)))
            (import "env" "print_str" (func $print_str (param i32)))
            (memory 1)
            (data (i32.const 20) "Hello, World!\n\00")
            (func (export "entry") (result i32)
                i32.const 20
                call $take_str
                i32.const 20
                call $print_str
                i32.const 100))
        "#,
        0,
    );
    let results = iso.call(inst, "entry", &[]).unwrap();
    assert_eq!(results, vec![Value::I32(100)]);
    let text = iso
        .instance(inst)
        .unwrap()
        .custom_data()
        .and_then(|data| data.downcast_ref::<String>())
        .unwrap();
    assert_eq!(text, "Hello, World!\n");
}

#[test]
fn gas_is_deducted_and_exhaustion_traps() {
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "gas" (func $gas (param i64)))
            (export "func_gas" (func $gas))
            (func (export "run")
                i64.const 400
                call $gas
                i64.const 700
                call $gas))
        "#,
        1000,
    );
    assert_eq!(iso.instance(inst).unwrap().gas_left(), 1000);
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GasLimitExceeded);
    // The second charge underflowed: the counter saturates at zero.
    assert_eq!(iso.instance(inst).unwrap().gas_left(), 0);
}

#[test]
fn gas_within_budget_succeeds() {
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "gas" (func $gas (param i64)))
            (export "func_gas" (func $gas))
            (func (export "run")
                i64.const 400
                call $gas
                i64.const 500
                call $gas))
        "#,
        1000,
    );
    iso.call(inst, "run", &[]).unwrap();
    assert_eq!(iso.instance(inst).unwrap().gas_left(), 100);
}

#[test]
fn gas_function_is_designated_by_export() {
    let runtime = test_runtime();
    let module = runtime
        .load_module(
            wat2wasm(
                r#"
                (module
                    (import "env" "gas" (func $gas (param i64)))
                    (export "func_gas" (func $gas)))
                "#,
            ),
            "gas",
        )
        .unwrap();
    assert_eq!(module.gas_func_idx(), Some(0));

    // Without the export nothing is designated.
    let module = runtime
        .load_module(
            wat2wasm(r#"(module (import "env" "gas" (func (param i64))))"#),
            "nogas",
        )
        .unwrap();
    assert_eq!(module.gas_func_idx(), None);
}

#[test]
fn exit_stores_the_code_and_traps() {
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "exit" (func $exit (param i32)))
            (func (export "run")
                i32.const 7
                call $exit))
        "#,
        0,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InstanceExit);
    assert_eq!(iso.instance(inst).unwrap().exit_code(), 7);
}

#[test]
fn abort_reports_the_code() {
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "abort" (func $abort (param i32)))
            (func (export "run")
                i32.const 42
                call $abort))
        "#,
        0,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EnvAbort);
    assert_eq!(err.extra_message(), Some("(42)"));
}

#[test]
fn host_errors_survive_the_unwind_and_downcast() {
    let runtime = runtime_with_test_module();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "test" "fail" (func $fail))
            (func (export "run")
                call $fail))
        "#,
        0,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Host);
    let host_error = err
        .as_host_error()
        .and_then(|e| e.downcast_ref::<TestHostError>())
        .unwrap();
    assert_eq!(host_error.code, 1312);
}

#[test]
fn host_functions_can_reenter_the_interpreter() {
    let runtime = runtime_with_test_module();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "test" "reenter" (func $reenter (param i32 i32) (result i32)))
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add)
            (func (export "run") (result i32)
                i32.const 20
                i32.const 22
                call $reenter))
        "#,
        0,
    );
    assert_eq!(
        iso.call(inst, "run", &[]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn builtin_print_str_requires_a_terminator() {
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "print_str" (func $print_str (param i32)))
            (memory 1)
            ;; fill the very end of memory with a non-NUL pattern
            (data (i32.const 65532) "xxxx")
            (func (export "run")
                i32.const 65532
                call $print_str))
        "#,
        0,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBoundsMemory);
}

#[test]
fn whitelisted_host_modules_lose_other_functions() {
    let runtime = Runtime::new(Config::default()).unwrap();
    let mut env = builtins::env_module();
    env.filter_functions(&["print_str"]);
    runtime.register_host_module(env).unwrap();

    let err = runtime
        .load_module(
            wat2wasm(r#"(module (import "env" "abort" (func (param i32))))"#),
            "filtered",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownImport);

    runtime
        .load_module(
            wat2wasm(r#"(module (import "env" "print_str" (func (param i32))))"#),
            "filtered",
        )
        .unwrap();
}

#[test]
fn direct_gas_calls_are_intercepted_before_dispatch() {
    // The interpreter must deduct gas without invoking the native body, so
    // a budget that the native body would reject twice still traps exactly
    // at the second call site.
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "gas" (func $gas (param i64)))
            (export "func_gas" (func $gas))
            (func (export "spend") (param i64)
                local.get 0
                call $gas))
        "#,
        10,
    );
    iso.call(inst, "spend", &[Value::I64(10)]).unwrap();
    assert_eq!(iso.instance(inst).unwrap().gas_left(), 0);
    let err = iso.call(inst, "spend", &[Value::I64(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GasLimitExceeded);
}

#[test]
fn print_str_succeeds_mid_memory() {
    let runtime = test_runtime();
    let (mut iso, inst) = instantiate_on(
        &runtime,
        r#"
        (module
            (import "env" "print_str" (func $print_str (param i32)))
            (memory 1)
            (data (i32.const 0) "ok\00")
            (func (export "run")
                i32.const 0
                call $print_str))
        "#,
        0,
    );
    iso.call(inst, "run", &[]).unwrap();
}
