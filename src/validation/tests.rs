//! Direct tests of the function validator over raw opcode streams.

use super::func::validate_function;
use super::ModuleContext;
use crate::isa;
use crate::module::BlockBounds;
use crate::types::FuncType;
use wasmet_core::{ErrorKind, ValueType};

fn void_type() -> FuncType {
    FuncType::new([], None)
}

fn empty_ctx<'a>(globals: &'a [(ValueType, bool, bool)]) -> ModuleContext<'a> {
    ModuleContext {
        types: &[],
        func_type_idxs: &[],
        globals,
        has_table: false,
        has_memory: false,
    }
}

#[test]
fn drop_of_a_64bit_value_is_rewritten() {
    let code = [isa::I64_CONST, 0x07, isa::DROP, isa::END];
    let ctx = empty_ctx(&[]);
    let validated = validate_function(&ctx, &void_type(), &[], &code).unwrap();
    assert_eq!(validated.patches, vec![(2, isa::DROP_64)]);
    assert_eq!(validated.max_stack_size, 8);
    assert_eq!(validated.max_block_depth, 1);
}

#[test]
fn select_between_64bit_values_is_rewritten() {
    let mut code = vec![isa::F64_CONST];
    code.extend_from_slice(&1.5f64.to_le_bytes());
    code.push(isa::F64_CONST);
    code.extend_from_slice(&2.5f64.to_le_bytes());
    code.extend_from_slice(&[isa::I32_CONST, 0x01, isa::SELECT, isa::DROP, isa::END]);
    let ctx = empty_ctx(&[]);
    let validated = validate_function(&ctx, &void_type(), &[], &code).unwrap();
    assert_eq!(
        validated.patches,
        vec![(20, isa::SELECT_64), (21, isa::DROP_64)]
    );
    assert_eq!(validated.max_stack_size, 20);
}

#[test]
fn block_bounds_are_recorded() {
    let code = [
        isa::BLOCK,
        isa::BLOCK_TYPE_EMPTY,
        isa::END,
        isa::END,
    ];
    let ctx = empty_ctx(&[]);
    let validated = validate_function(&ctx, &void_type(), &[], &code).unwrap();
    let bounds = validated.block_bounds.get(&0).unwrap();
    assert_eq!(bounds.else_off, BlockBounds::NO_ELSE);
    assert_eq!(bounds.end_off, 2);
    assert_eq!(validated.max_block_depth, 2);
}

#[test]
fn wide_global_accesses_are_rewritten() {
    let globals = [(ValueType::I64, true, false)];
    let code = [
        isa::GET_GLOBAL,
        0x00,
        isa::SET_GLOBAL,
        0x00,
        isa::END,
    ];
    let ctx = empty_ctx(&globals);
    let validated = validate_function(&ctx, &void_type(), &[], &code).unwrap();
    assert_eq!(
        validated.patches,
        vec![(0, isa::GET_GLOBAL_64), (2, isa::SET_GLOBAL_64)]
    );
}

#[test]
fn popping_an_empty_stack_is_rejected() {
    let code = [isa::DROP, isa::END];
    let ctx = empty_ctx(&[]);
    let err = validate_function(&ctx, &void_type(), &[], &code).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OperandStackUnderflow);
}

#[test]
fn code_after_polymorphic_marks_is_still_checked() {
    // `unreachable` then a malformed add: i32.add on an f32 operand.
    let mut code = vec![isa::UNREACHABLE, isa::F32_CONST];
    code.extend_from_slice(&1.0f32.to_le_bytes());
    code.extend_from_slice(&[isa::I32_ADD, isa::DROP, isa::END]);
    let ctx = empty_ctx(&[]);
    let err = validate_function(&ctx, &void_type(), &[], &code).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TypeMismatch);
}

#[test]
fn direct_callees_are_recorded() {
    let types = [void_type()];
    let func_type_idxs = [0u32, 0];
    let ctx = ModuleContext {
        types: &types,
        func_type_idxs: &func_type_idxs,
        globals: &[],
        has_table: false,
        has_memory: false,
    };
    let code = [
        isa::CALL,
        0x00,
        isa::CALL,
        0x01,
        isa::CALL,
        0x00,
        isa::END,
    ];
    let validated = validate_function(&ctx, &void_type(), &[], &code).unwrap();
    assert_eq!(validated.callees, vec![0, 1]);
}
