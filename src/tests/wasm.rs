//! End-to-end semantics: operator behaviour, traps, control flow, segments.

use super::{instantiate, load_wat, test_runtime, wat2wasm};
use crate::isolation::Isolation;
use crate::runtime::{Config, Runtime};
use assert_matches::assert_matches;
use wasmet_core::{ErrorKind, Value};

#[test]
fn add_wraps_around() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "add") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.add))
        "#,
    );
    let out = iso
        .call(inst, "add", &[Value::I32(0x7fffffff), Value::I32(1)])
        .unwrap();
    assert_eq!(out, vec![Value::I32(0x80000000u32 as i32)]);
}

#[test]
fn division_by_zero_traps() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (result i32)
                i32.const 10
                i32.const 0
                i32.div_s))
        "#,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegerDivByZero);
    assert_eq!(
        err.formatted_message(true),
        "execution error: integer divide by zero"
    );
    // The trap stays on the instance until cleared.
    assert_eq!(
        iso.instance(inst).unwrap().error().unwrap().kind(),
        ErrorKind::IntegerDivByZero
    );
}

#[test]
fn signed_division_overflow_traps() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (result i32)
                i32.const -2147483648
                i32.const -1
                i32.div_s))
        "#,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegerOverflow);
}

#[test]
fn signed_remainder_overflow_is_zero() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (result i32)
                i32.const -2147483648
                i32.const -1
                i32.rem_s))
        "#,
    );
    assert_eq!(iso.call(inst, "run", &[]).unwrap(), vec![Value::I32(0)]);
}

#[test]
fn float_division_produces_canonical_nan() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (result i32)
                f32.const 0
                f32.const 0
                f32.div
                i32.reinterpret_f32))
        "#,
    );
    assert_eq!(
        iso.call(inst, "run", &[]).unwrap(),
        vec![Value::I32(0x7fc00000u32 as i32)]
    );
}

#[test]
fn float_min_prefers_negative_zero() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (result i64)
                f64.const 0
                f64.const -0
                f64.min
                i64.reinterpret_f64))
        "#,
    );
    assert_eq!(
        iso.call(inst, "run", &[]).unwrap(),
        vec![Value::I64((0x8000_0000_0000_0000u64) as i64)]
    );
}

#[test]
fn truncation_of_nan_traps() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (result i32)
                f32.const nan
                i32.trunc_f32_s))
        "#,
    );
    let err = iso.call(inst, "run", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConversionToInteger);
}

#[test]
fn truncation_bounds_are_bit_exact() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "over") (result i32)
                f64.const 2147483648
                i32.trunc_f64_s)
            (func (export "max") (result i32)
                f64.const 2147483647
                i32.trunc_f64_s))
        "#,
    );
    let err = iso.call(inst, "over", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IntegerOverflow);
    iso.instance_mut(inst).unwrap().clear_error();
    assert_eq!(
        iso.call(inst, "max", &[]).unwrap(),
        vec![Value::I32(0x7fffffff)]
    );
}

#[test]
fn sign_extension_opcodes() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "ext8") (param i32) (result i32)
                local.get 0
                i32.extend8_s)
            (func (export "ext32") (param i64) (result i64)
                local.get 0
                i64.extend32_s))
        "#,
    );
    assert_eq!(
        iso.call(inst, "ext8", &[Value::I32(0x80)]).unwrap(),
        vec![Value::I32(-128)]
    );
    assert_eq!(
        iso.call(inst, "ext32", &[Value::I64(0x80000000)]).unwrap(),
        vec![Value::I64(-0x80000000)]
    );
}

#[test]
fn out_of_bounds_load_traps() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (memory 1)
            (func (export "peek") (param i32) (result i32)
                local.get 0
                i32.load))
        "#,
    );
    // The very last in-bounds word.
    assert_eq!(
        iso.call(inst, "peek", &[Value::I32(65532)]).unwrap(),
        vec![Value::I32(0)]
    );
    let err = iso.call(inst, "peek", &[Value::I32(65533)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OutOfBoundsMemory);
}

#[test]
fn memory_grow_and_size() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (memory 1 4)
            (func (export "grow") (param i32) (result i32)
                local.get 0
                memory.grow)
            (func (export "size") (result i32)
                memory.size)
            (func (export "peek") (param i32) (result i32)
                local.get 0
                i32.load)
            (func (export "poke") (param i32 i32)
                local.get 0
                local.get 1
                i32.store))
        "#,
    );
    // grow(0) reports the current size and changes nothing.
    assert_eq!(
        iso.call(inst, "grow", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(1)]
    );
    iso.call(inst, "poke", &[Value::I32(0), Value::I32(77)])
        .unwrap();
    assert_eq!(
        iso.call(inst, "grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(iso.call(inst, "size", &[]).unwrap(), vec![Value::I32(2)]);
    // Old bytes preserved, the new page reads as zero.
    assert_eq!(
        iso.call(inst, "peek", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(77)]
    );
    assert_eq!(
        iso.call(inst, "peek", &[Value::I32(65536)]).unwrap(),
        vec![Value::I32(0)]
    );
    // Growing past the declared maximum fails with -1.
    assert_eq!(
        iso.call(inst, "grow", &[Value::I32(100)]).unwrap(),
        vec![Value::I32(-1)]
    );
}

#[test]
fn memory_grow_respects_vm_cap() {
    let runtime = Runtime::new(Config {
        vm_max_memory_pages: Some(2),
        ..Config::default()
    })
    .unwrap();
    let module = runtime
        .load_module(
            wat2wasm(
                r#"
                (module
                    (memory 1)
                    (func (export "grow") (param i32) (result i32)
                        local.get 0
                        memory.grow))
                "#,
            ),
            "capped",
        )
        .unwrap();
    let mut iso = Isolation::new(&runtime);
    let inst = iso.instantiate(&module, 0).unwrap();
    assert_eq!(
        iso.call(inst, "grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(1)]
    );
    assert_eq!(
        iso.call(inst, "grow", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(-1)]
    );
}

#[test]
fn recursion_exhausts_the_call_stack() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func $f (export "f")
                call $f))
        "#,
    );
    let err = iso.call(inst, "f", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallStackExhausted);
    assert_eq!(
        err.formatted_message(true),
        "execution error: call stack exhausted"
    );
    // The instance survives the trap.
    iso.instance_mut(inst).unwrap().clear_error();
    let err = iso.call(inst, "f", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallStackExhausted);
}

#[test]
fn factorial_recursion() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func $fac (export "fac") (param i64) (result i64)
                local.get 0
                i64.const 1
                i64.le_s
                if (result i64)
                    i64.const 1
                else
                    local.get 0
                    local.get 0
                    i64.const 1
                    i64.sub
                    call $fac
                    i64.mul
                end))
        "#,
    );
    assert_eq!(
        iso.call(inst, "fac", &[Value::I64(10)]).unwrap(),
        vec![Value::I64(3628800)]
    );
}

#[test]
fn loop_with_branches() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "sum_to") (param i32) (result i32)
                (local i32 i32)
                block
                    loop
                        local.get 1
                        local.get 0
                        i32.ge_u
                        br_if 1
                        local.get 1
                        i32.const 1
                        i32.add
                        local.tee 1
                        local.get 2
                        i32.add
                        local.set 2
                        br 0
                    end
                end
                local.get 2))
        "#,
    );
    assert_eq!(
        iso.call(inst, "sum_to", &[Value::I32(10)]).unwrap(),
        vec![Value::I32(55)]
    );
}

#[test]
fn br_table_dispatch() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "classify") (param i32) (result i32)
                block
                    block
                        block
                            local.get 0
                            br_table 0 1 2
                        end
                        i32.const 100
                        return
                    end
                    i32.const 200
                    return
                end
                i32.const 300))
        "#,
    );
    assert_eq!(
        iso.call(inst, "classify", &[Value::I32(0)]).unwrap(),
        vec![Value::I32(100)]
    );
    assert_eq!(
        iso.call(inst, "classify", &[Value::I32(1)]).unwrap(),
        vec![Value::I32(200)]
    );
    // Out-of-range selectors clamp to the default target.
    assert_eq!(
        iso.call(inst, "classify", &[Value::I32(77)]).unwrap(),
        vec![Value::I32(300)]
    );
}

#[test]
fn select_and_drop_width_rewrites_are_transparent() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "pick64") (param i32) (result i64)
                i64.const 111
                i64.const 222
                local.get 0
                select)
            (func (export "dropper") (result i32)
                i64.const 7
                drop
                f64.const 1.5
                drop
                i32.const 42))
        "#,
    );
    assert_eq!(
        iso.call(inst, "pick64", &[Value::I32(1)]).unwrap(),
        vec![Value::I64(111)]
    );
    assert_eq!(
        iso.call(inst, "pick64", &[Value::I32(0)]).unwrap(),
        vec![Value::I64(222)]
    );
    assert_eq!(
        iso.call(inst, "dropper", &[]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn globals_of_both_widths() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (global $g32 (mut i32) (i32.const 7))
            (global $g64 (mut i64) (i64.const 9))
            (func (export "bump") (result i64)
                global.get $g32
                i32.const 1
                i32.add
                global.set $g32
                global.get $g64
                i64.const 2
                i64.add
                global.set $g64
                global.get $g32
                i64.extend_i32_u
                global.get $g64
                i64.add))
        "#,
    );
    assert_eq!(iso.call(inst, "bump", &[]).unwrap(), vec![Value::I64(19)]);
    assert_eq!(
        iso.instance(inst).unwrap().global_value(0),
        Some(Value::I32(8))
    );
}

#[test]
fn immutable_global_writes_are_rejected() {
    let runtime = test_runtime();
    let err = runtime
        .load_module(
            wat2wasm(
                r#"
                (module
                    (global $g i32 (i32.const 1))
                    (func (export "run")
                        i32.const 2
                        global.set $g))
                "#,
            ),
            "bad",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::GlobalIsImmutable);
}

#[test]
fn start_function_runs_at_instantiation() {
    let (iso, inst) = instantiate(
        r#"
        (module
            (global $g (mut i32) (i32.const 0))
            (func $init
                i32.const 41
                global.set $g)
            (start $init)
            (func (export "get") (result i32)
                global.get $g))
        "#,
    );
    assert_eq!(
        iso.instance(inst).unwrap().global_value(0),
        Some(Value::I32(41))
    );
}

#[test]
fn start_function_trap_aborts_instantiation() {
    let runtime = test_runtime();
    let module = load_wat(
        &runtime,
        r#"
        (module
            (func $boom unreachable)
            (start $boom))
        "#,
    );
    let mut iso = Isolation::new(&runtime);
    let err = iso.instantiate(&module, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unreachable);
}

#[test]
fn data_segments_initialise_memory() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (memory 1)
            (data (i32.const 20) "Hello, World!\n\00")
            (func (export "peek8") (param i32) (result i32)
                local.get 0
                i32.load8_u))
        "#,
    );
    assert_eq!(
        iso.call(inst, "peek8", &[Value::I32(20)]).unwrap(),
        vec![Value::I32('H' as i32)]
    );
    assert_eq!(
        iso.call(inst, "peek8", &[Value::I32(33)]).unwrap(),
        vec![Value::I32('\n' as i32)]
    );
    assert_eq!(
        iso.call(inst, "peek8", &[Value::I32(35)]).unwrap(),
        vec![Value::I32(0)]
    );
}

#[test]
fn data_segment_out_of_bounds_fails_instantiation() {
    let runtime = test_runtime();
    let module = load_wat(
        &runtime,
        r#"
        (module
            (memory 1)
            (data (i32.const 65530) "0123456789"))
        "#,
    );
    let mut iso = Isolation::new(&runtime);
    let err = iso.instantiate(&module, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataSegmentDoesNotFit);
}

#[test]
fn elem_segment_out_of_bounds_fails_instantiation() {
    let runtime = test_runtime();
    let module = load_wat(
        &runtime,
        r#"
        (module
            (table 1 funcref)
            (func $f)
            (elem (i32.const 1) $f))
        "#,
    );
    let mut iso = Isolation::new(&runtime);
    let err = iso.instantiate(&module, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ElemSegmentDoesNotFit);
}

const INDIRECT_MODULE: &str = r#"
    (module
        (type $binop (func (param i32 i32) (result i32)))
        (type $unop (func (param i32) (result i32)))
        (table 4 funcref)
        (func $add (type $binop)
            local.get 0
            local.get 1
            i32.add)
        (func $mul (type $binop)
            local.get 0
            local.get 1
            i32.mul)
        (func $neg (type $unop)
            i32.const 0
            local.get 0
            i32.sub)
        (elem (i32.const 0) $add $mul $neg)
        (func (export "binop") (param i32 i32 i32) (result i32)
            local.get 1
            local.get 2
            local.get 0
            call_indirect (type $binop)))
"#;

#[test]
fn call_indirect_dispatches() {
    let (mut iso, inst) = instantiate(INDIRECT_MODULE);
    assert_eq!(
        iso.call(inst, "binop", &[Value::I32(0), Value::I32(3), Value::I32(4)])
            .unwrap(),
        vec![Value::I32(7)]
    );
    assert_eq!(
        iso.call(inst, "binop", &[Value::I32(1), Value::I32(3), Value::I32(4)])
            .unwrap(),
        vec![Value::I32(12)]
    );
}

#[test]
fn call_indirect_type_mismatch_traps() {
    let (mut iso, inst) = instantiate(INDIRECT_MODULE);
    // Slot 2 holds $neg whose canonical type differs from $binop's.
    let err = iso
        .call(inst, "binop", &[Value::I32(2), Value::I32(3), Value::I32(4)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndirectCallTypeMismatch);
}

#[test]
fn call_indirect_uninitialised_element_traps() {
    let (mut iso, inst) = instantiate(INDIRECT_MODULE);
    let err = iso
        .call(inst, "binop", &[Value::I32(3), Value::I32(3), Value::I32(4)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UninitializedElement);
}

#[test]
fn call_indirect_out_of_range_traps() {
    let (mut iso, inst) = instantiate(INDIRECT_MODULE);
    let err = iso
        .call(inst, "binop", &[Value::I32(9), Value::I32(3), Value::I32(4)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedElement);
}

#[test]
fn equal_types_share_a_canonical_index() {
    let runtime = test_runtime();
    let module = load_wat(
        &runtime,
        r#"
        (module
            (type $a (func (param i32 i32) (result i32)))
            (type $b (func (param i32 i32) (result i32)))
            (table 1 funcref)
            (func $add (type $a)
                local.get 0
                local.get 1
                i32.add)
            (elem (i32.const 0) $add)
            ;; Checked against $b although $add declares $a.
            (func (export "via_b") (param i32 i32) (result i32)
                local.get 0
                local.get 1
                i32.const 0
                call_indirect (type $b)))
        "#,
    );
    assert_eq!(module.func_type(0).canonical_idx(), 0);
    let mut iso = Isolation::new(&runtime);
    let inst = iso.instantiate(&module, 0).unwrap();
    assert_eq!(
        iso.call(inst, "via_b", &[Value::I32(20), Value::I32(22)])
            .unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn multi_value_block_parameters() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "run") (param i32) (result i32)
                local.get 0
                block (param i32) (result i32)
                    i32.const 1
                    i32.add
                end))
        "#,
    );
    assert_eq!(
        iso.call(inst, "run", &[Value::I32(41)]).unwrap(),
        vec![Value::I32(42)]
    );
}

#[test]
fn loop_parameters_flow_through_back_edges() {
    // Iterative countdown where the loop carries its counter as a parameter.
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "countdown") (param i32) (result i32)
                (local $steps i32)
                local.get 0
                loop (param i32) (result i32)
                    local.get $steps
                    i32.const 1
                    i32.add
                    local.set $steps
                    i32.const 1
                    i32.sub
                    local.tee 0
                    local.get 0
                    i32.const 0
                    i32.gt_s
                    br_if 0
                end
                drop
                local.get $steps))
        "#,
    );
    assert_eq!(
        iso.call(inst, "countdown", &[Value::I32(5)]).unwrap(),
        vec![Value::I32(5)]
    );
}

// ---- validation failures ----

fn load_err(source: &str) -> ErrorKind {
    let runtime = test_runtime();
    runtime
        .load_module(wat2wasm(source), "bad")
        .unwrap_err()
        .kind()
}

#[test]
fn missing_result_value_is_rejected() {
    assert_eq!(
        load_err("(module (func (export \"f\") (result i32)))"),
        ErrorKind::OperandStackUnderflow
    );
}

#[test]
fn operand_type_mismatch_is_rejected() {
    assert_eq!(
        load_err(
            r#"
            (module
                (func (result i32)
                    i64.const 1
                    i32.const 2
                    i32.add))
            "#
        ),
        ErrorKind::TypeMismatch
    );
}

#[test]
fn unbalanced_if_is_rejected() {
    assert_eq!(
        load_err(
            r#"
            (module
                (func (result i32)
                    i32.const 1
                    if (result i32)
                        i32.const 2
                    end))
            "#
        ),
        ErrorKind::UnbalancedIfElse
    );
}

#[test]
fn branch_depth_out_of_range_is_rejected() {
    assert_eq!(
        load_err(
            r#"
            (module
                (func
                    block
                        br 5
                    end))
            "#
        ),
        ErrorKind::TypeMismatch
    );
}

#[test]
fn br_table_arity_mismatch_is_rejected() {
    assert_eq!(
        load_err(
            r#"
            (module
                (func (result i32)
                    block (result i32)
                        block
                            i32.const 1
                            i32.const 0
                            br_table 0 1
                        end
                        i32.const 2
                    end))
            "#
        ),
        ErrorKind::BrTableTargetTypeMismatch
    );
}

#[test]
fn memory_ops_without_memory_are_rejected() {
    assert_eq!(
        load_err("(module (func (result i32) memory.size))"),
        ErrorKind::UnknownMemory
    );
}

#[test]
fn unresolved_import_is_reported() {
    let runtime = test_runtime();
    let err = runtime
        .load_module(
            wat2wasm(r#"(module (import "env" "no_such_func" (func)))"#),
            "bad",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownImport);
    assert_eq!(err.extra_message(), Some("(env.no_such_func)"));
}

#[test]
fn import_signature_mismatch_is_diagnosed() {
    let runtime = test_runtime();
    let err = runtime
        .load_module(
            wat2wasm(r#"(module (import "env" "print_str" (func (param i64))))"#),
            "bad",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IncompatibleImportType);
    assert_eq!(
        err.extra_message(),
        Some("param type mismatch (param index: 0, expected i64, actual i32)")
    );
}

#[test]
fn non_function_imports_are_rejected() {
    let runtime = test_runtime();
    let err = runtime
        .load_module(
            wat2wasm(r#"(module (import "env" "memory" (memory 1)))"#),
            "bad",
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedImport);
}

// ---- handcrafted binaries for cases `wat` cannot express ----

#[test]
fn oversized_alignment_is_rejected() {
    // One void function doing `i32.load align=8`.
    let bytes = [
        b"\0asm\x01\0\0\0".as_slice(),
        &[1, 4, 1, 0x60, 0, 0],                               // type ()->()
        &[3, 2, 1, 0],                                        // function
        &[5, 3, 1, 0, 1],                                    // memory 0..1
        &[10, 10, 1, 8, 0, 0x41, 0, 0x28, 3, 0, 0x1A, 0x0B], // align 2^3
    ]
    .concat();
    let runtime = test_runtime();
    let err = runtime.load_module(bytes, "bad").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAlignment);
}

#[test]
fn data_count_mismatch_is_rejected() {
    let bytes = [
        b"\0asm\x01\0\0\0".as_slice(),
        &[12, 1, 1], // data count of 1, but no data section
    ]
    .concat();
    let runtime = test_runtime();
    let err = runtime.load_module(bytes, "bad").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataCountMismatch);
}

#[test]
fn duplicate_export_names_are_rejected() {
    let bytes = [
        b"\0asm\x01\0\0\0".as_slice(),
        &[1, 4, 1, 0x60, 0, 0],                      // type ()->()
        &[3, 2, 1, 0],                               // function
        &[7, 9, 2, 1, b'a', 0, 0, 1, b'a', 0, 0],    // two exports named "a"
        &[10, 4, 1, 2, 0, 0x0B],                     // empty body
    ]
    .concat();
    let runtime = test_runtime();
    let err = runtime.load_module(bytes, "bad").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateExportName);
}

#[test]
fn function_names_come_from_the_name_section() {
    let bytes = [
        b"\0asm\x01\0\0\0".as_slice(),
        &[1, 4, 1, 0x60, 0, 0],
        &[3, 2, 1, 0],
        &[10, 4, 1, 2, 0, 0x0B],
        // custom "name" section, function-name subsection: 0 -> "foo"
        &[0, 13, 4, b'n', b'a', b'm', b'e', 1, 6, 1, 0, 3, b'f', b'o', b'o'],
    ]
    .concat();
    let runtime = test_runtime();
    let module = runtime.load_module(bytes, "named").unwrap();
    assert_eq!(module.function_name(0).as_deref(), Some("foo"));
}

#[test]
fn statistics_record_each_phase() {
    let runtime = Runtime::new(Config {
        enable_statistics: true,
        ..Config::default()
    })
    .unwrap();
    let module = runtime
        .load_module(
            wat2wasm(r#"(module (func (export "f")))"#),
            "timed",
        )
        .unwrap();
    let mut iso = Isolation::new(&runtime);
    let inst = iso.instantiate(&module, 0).unwrap();
    iso.call(inst, "f", &[]).unwrap();
    iso.call(inst, "f", &[]).unwrap();
    let stats = runtime.statistics().unwrap();
    assert_eq!(stats.load().0, 1);
    assert_eq!(stats.instantiate().0, 1);
    assert_eq!(stats.execute().0, 2);
}

#[test]
fn argument_marshalling_is_checked() {
    let (mut iso, inst) = instantiate(
        r#"(module (func (export "f") (param i32 i64)))"#,
    );
    let err = iso.call(inst, "f", &[Value::I32(1)]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentCountMismatch);
    let err = iso
        .call(inst, "f", &[Value::I32(1), Value::I32(2)])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentTypeMismatch);
    assert_matches!(
        err.extra_message(),
        Some(extra) if extra.contains("expected i64, actual i32")
    );
    let err = iso.call(inst, "nope", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FunctionNotFound);
}

#[test]
fn mixed_width_locals_have_correct_slots() {
    let (mut iso, inst) = instantiate(
        r#"
        (module
            (func (export "mix") (param i32 i64 f32) (result i64)
                (local i64 i32)
                i64.const 100
                local.set 3
                i32.const 5
                local.set 4
                local.get 1
                local.get 3
                i64.add
                local.get 4
                i64.extend_i32_u
                i64.add
                local.get 0
                i64.extend_i32_u
                i64.add))
        "#,
    );
    assert_eq!(
        iso.call(
            inst,
            "mix",
            &[Value::I32(1), Value::I64(10), Value::from(0f32)]
        )
        .unwrap(),
        vec![Value::I64(116)]
    );
}
