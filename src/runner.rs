//! The stack-machine interpreter.
//!
//! Executes validated bytecode directly. The operand stack is a contiguous
//! array of 4-byte cells shared by all frames of a call: a callee's
//! parameters are the top cells of its caller's operand stack and become the
//! head of the callee's local region, so calls move no argument bytes. Every
//! frame is charged against the owning instance's interpreter-stack budget
//! (locals + frame header + control stack + worst-case operand stack); the
//! budget and the call-depth bound are what turn runaway recursion into a
//! `CallStackExhausted` trap.
//!
//! Branch targets are never searched for at run time: the validator recorded
//! each structured block's `else`/`end` position in the code entry, and the
//! loop back-edge is the loop body itself.

use crate::instance::{FuncKind, Instance, UNINITIALIZED_ELEMENT};
use crate::isa;
use crate::module::{BlockBounds, CodeEntry, Module};
use crate::host::HostArgs;
use std::sync::Arc;
use wasmet_core::{
    ArithmeticOps,
    Error,
    ErrorKind,
    ExtendInto,
    Float,
    Integer,
    LittleEndianConvert,
    TryTruncateInto,
    Value,
    ValueType,
    WrapInto,
    F32,
    F64,
};

/// Kind of a control-stack label.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LabelKind {
    /// The implicit function block; reaching its `end` returns.
    Function,
    Block,
    Loop,
    If,
}

/// One entry of the control stack.
#[derive(Debug, Copy, Clone)]
struct BlockInfo {
    /// Branch target: the block's `end` opcode, or the body start for loops.
    target_ip: u32,
    /// Cell index of the operand stack at block entry, parameters excluded.
    entry_sp: u32,
    /// Cells a branch to this label transfers: result cells, or parameter
    /// cells for loops.
    arity_cells: u32,
    #[allow(dead_code)]
    label: LabelKind,
}

/// One call frame. The bulk of a frame lives in the shared cell stack; this
/// header tracks where.
#[derive(Debug, Copy, Clone)]
struct Frame {
    code_idx: u32,
    ip: u32,
    /// Cell index of the frame's local region (parameters first).
    locals_base: u32,
    /// Control-stack index of the frame's function block.
    ctrl_base: u32,
    ret_cells: u32,
    /// Bytes charged against the instance's stack budget.
    frame_bytes: u32,
}

const FRAME_HEADER_BYTES: usize = core::mem::size_of::<Frame>();
const BLOCK_INFO_BYTES: usize = core::mem::size_of::<BlockInfo>();

/// The 4-byte-cell operand stack.
struct ValueStack {
    cells: Vec<u32>,
}

impl ValueStack {
    fn new() -> ValueStack {
        ValueStack { cells: Vec::new() }
    }

    fn len_cells(&self) -> usize {
        self.cells.len()
    }

    fn push_u32(&mut self, value: u32) {
        self.cells.push(value);
    }

    fn pop_u32(&mut self) -> u32 {
        self.cells.pop().expect("validation keeps the stack non-empty")
    }

    fn push_u64(&mut self, value: u64) {
        self.cells.push(value as u32);
        self.cells.push((value >> 32) as u32);
    }

    fn pop_u64(&mut self) -> u64 {
        let high = self.pop_u32() as u64;
        let low = self.pop_u32() as u64;
        (high << 32) | low
    }

    fn peek_u32(&self) -> u32 {
        *self.cells.last().expect("validation keeps the stack non-empty")
    }

    fn peek_u64(&self) -> u64 {
        let len = self.cells.len();
        ((self.cells[len - 1] as u64) << 32) | self.cells[len - 2] as u64
    }

    fn get_cell(&self, index: usize) -> u32 {
        self.cells[index]
    }

    fn set_cell(&mut self, index: usize, value: u32) {
        self.cells[index] = value;
    }

    fn read_u64_at(&self, index: usize) -> u64 {
        ((self.cells[index + 1] as u64) << 32) | self.cells[index] as u64
    }

    fn write_u64_at(&mut self, index: usize, value: u64) {
        self.cells[index] = value as u32;
        self.cells[index + 1] = (value >> 32) as u32;
    }

    fn extend_zero(&mut self, cells: usize) {
        self.cells.resize(self.cells.len() + cells, 0);
    }

    fn truncate(&mut self, len: usize) {
        self.cells.truncate(len);
    }

    fn copy_within_cells(&mut self, src: usize, dst: usize, count: usize) {
        self.cells.copy_within(src..src + count, dst);
    }
}

/// Typed cell-stack access.
trait StackValue: Copy {
    fn push_to(self, stack: &mut ValueStack);
    fn pop_from(stack: &mut ValueStack) -> Self;
}

impl StackValue for u32 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u32()
    }
}

impl StackValue for i32 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self as u32)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u32() as i32
    }
}

impl StackValue for u64 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u64(self)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u64()
    }
}

impl StackValue for i64 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u64(self as u64)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u64() as i64
    }
}

impl StackValue for F32 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self.to_bits())
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        F32::from_bits(stack.pop_u32())
    }
}

impl StackValue for F64 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u64(self.to_bits())
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        F64::from_bits(stack.pop_u64())
    }
}

impl StackValue for i8 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self as u32)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u32() as i8
    }
}

impl StackValue for u8 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self as u32)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u32() as u8
    }
}

impl StackValue for i16 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self as u32)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u32() as i16
    }
}

impl StackValue for u16 {
    fn push_to(self, stack: &mut ValueStack) {
        stack.push_u32(self as u32)
    }
    fn pop_from(stack: &mut ValueStack) -> Self {
        stack.pop_u32() as u16
    }
}

/// Outcome of running a frame until it yields.
enum RunResult {
    /// The frame finished; its return cells are on top of the stack.
    Return,
    /// The frame calls the given bytecode function.
    NestedCall(u32),
}

/// Calls a function of `instance` with marshalled arguments.
///
/// This is the trap boundary: on any execution error the frame stack is
/// abandoned, the instance's error is set, and the error is returned.
pub(crate) fn call_wasm_function(
    instance: &mut Instance,
    func_idx: u32,
    args: &[Value],
) -> Result<Vec<Value>, Error> {
    let module = instance.module().clone();
    let return_type = module.func_type(func_idx).return_type();

    let mut interp = Interpreter::new(module);
    for arg in args {
        interp.push_value(*arg);
    }
    match interp.run_call(instance, func_idx) {
        Ok(()) => {
            let mut results = Vec::new();
            if let Some(ty) = return_type {
                results.push(interp.pop_value(ty));
            }
            debug_assert_eq!(interp.stack.len_cells(), 0);
            Ok(results)
        }
        Err(error) => {
            interp.abandon_frames(instance);
            instance.set_error(error.clone());
            Err(error)
        }
    }
}

struct Interpreter {
    module: Arc<Module>,
    stack: ValueStack,
    ctrl: Vec<BlockInfo>,
    frames: Vec<Frame>,
}

impl Interpreter {
    fn new(module: Arc<Module>) -> Interpreter {
        Interpreter {
            module,
            stack: ValueStack::new(),
            ctrl: Vec::new(),
            frames: Vec::new(),
        }
    }

    fn push_value(&mut self, value: Value) {
        if value.value_type().is_64bit() {
            self.stack.push_u64(value.to_bits());
        } else {
            self.stack.push_u32(value.to_bits() as u32);
        }
    }

    fn pop_value(&mut self, ty: ValueType) -> Value {
        let bits = if ty.is_64bit() {
            self.stack.pop_u64()
        } else {
            self.stack.pop_u32() as u64
        };
        Value::from_bits(ty, bits)
    }

    fn run_call(&mut self, instance: &mut Instance, func_idx: u32) -> Result<(), Error> {
        if self.module.gas_func_idx() == Some(func_idx) {
            let delta = self.stack.pop_u64();
            return instance.charge_gas(delta);
        }
        match instance.functions[func_idx as usize].kind {
            FuncKind::Native => self.invoke_host(instance, func_idx),
            FuncKind::ByteCode => {
                self.push_frame(instance, func_idx)?;
                self.run_interpreter_loop(instance)
            }
        }
    }

    fn run_interpreter_loop(&mut self, instance: &mut Instance) -> Result<(), Error> {
        loop {
            match self.run_frame(instance)? {
                RunResult::Return => {
                    self.pop_frame(instance);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                }
                RunResult::NestedCall(callee) => {
                    self.push_frame(instance, callee)?;
                }
            }
        }
    }

    /// Allocates a frame for a bytecode function whose arguments are the top
    /// parameter cells of the operand stack.
    fn push_frame(&mut self, instance: &mut Instance, func_idx: u32) -> Result<(), Error> {
        let func = instance.functions[func_idx as usize];
        debug_assert_eq!(func.kind, FuncKind::ByteCode);
        let frame_bytes = func.total_local_cells as usize * 4
            + FRAME_HEADER_BYTES
            + func.max_block_depth as usize * BLOCK_INFO_BYTES
            + func.max_stack_size as usize;
        if self.frames.len() >= instance.max_call_depth
            || instance.stack_used + frame_bytes > instance.stack_capacity
        {
            return Err(Error::new(ErrorKind::CallStackExhausted));
        }
        instance.stack_used += frame_bytes;

        let module = self.module.clone();
        let entry = module.code_entry(func.code_idx);
        let locals_base = self.stack.len_cells() - func.param_cells as usize;
        // Non-parameter locals are zero-initialised.
        self.stack
            .extend_zero((func.total_local_cells - func.param_cells as u32) as usize);
        let value_base = locals_base + func.total_local_cells as usize;

        let ctrl_base = self.ctrl.len();
        self.ctrl.push(BlockInfo {
            target_ip: (entry.code.len() - 1) as u32,
            entry_sp: value_base as u32,
            arity_cells: func.ret_cells as u32,
            label: LabelKind::Function,
        });
        self.frames.push(Frame {
            code_idx: func.code_idx,
            ip: 0,
            locals_base: locals_base as u32,
            ctrl_base: ctrl_base as u32,
            ret_cells: func.ret_cells as u32,
            frame_bytes: frame_bytes as u32,
        });
        Ok(())
    }

    /// Frees the top frame: moves its return cells down to where the caller
    /// expects them and restores the caller's stack pointer.
    fn pop_frame(&mut self, instance: &mut Instance) {
        let frame = self.frames.pop().expect("a frame is live");
        instance.stack_used -= frame.frame_bytes as usize;
        self.ctrl.truncate(frame.ctrl_base as usize);
        let ret = frame.ret_cells as usize;
        let src = self.stack.len_cells() - ret;
        let dst = frame.locals_base as usize;
        if src != dst {
            self.stack.copy_within_cells(src, dst, ret);
        }
        self.stack.truncate(dst + ret);
    }

    /// Drops all live frames after a trap, returning their budget.
    fn abandon_frames(&mut self, instance: &mut Instance) {
        for frame in self.frames.drain(..) {
            instance.stack_used -= frame.frame_bytes as usize;
        }
        self.ctrl.clear();
        self.stack.truncate(0);
    }

    fn branch(&mut self, depth: u32, ip: &mut usize) {
        self.ctrl.truncate(self.ctrl.len() - depth as usize);
        let target = *self.ctrl.last().expect("branch depths are validated");
        let arity = target.arity_cells as usize;
        let src = self.stack.len_cells() - arity;
        let dst = target.entry_sp as usize;
        if src != dst {
            self.stack.copy_within_cells(src, dst, arity);
        }
        self.stack.truncate(dst + arity);
        *ip = target.target_ip as usize;
    }

    /// Marshals arguments, invokes a host function and pushes its result.
    fn invoke_host(&mut self, instance: &mut Instance, func_idx: u32) -> Result<(), Error> {
        let func = instance.functions[func_idx as usize];
        let module = self.module.clone();
        let func_type = module.func_type(func_idx);

        let mut args = vec![Value::I32(0); func_type.params().len()];
        for (slot, param) in args.iter_mut().zip(func_type.params().iter()).rev() {
            let bits = if param.is_64bit() {
                self.stack.pop_u64()
            } else {
                self.stack.pop_u32() as u64
            };
            *slot = Value::from_bits(*param, bits);
        }

        let host_fn = instance.host_funcs[func.code_idx as usize];
        let result = host_fn(instance, HostArgs(&args))?;

        match (result, func_type.return_type()) {
            (Some(value), Some(ty)) if value.value_type() == ty => {
                self.push_value(value);
                Ok(())
            }
            (None, None) => Ok(()),
            (actual, expected) => Err(Error::with_extra(
                ErrorKind::IncompatibleImportType,
                format!(
                    "(host function returned {:?}, expected {:?})",
                    actual.map(|v| v.value_type()),
                    expected
                ),
            )
            .with_phase(wasmet_core::ErrorPhase::Execution)),
        }
    }

    /// Runs the topmost frame until it returns or performs a bytecode call.
    fn run_frame(&mut self, instance: &mut Instance) -> Result<RunResult, Error> {
        let module = self.module.clone();
        let frame = *self.frames.last().expect("a frame is live");
        let entry = module.code_entry(frame.code_idx);
        let code = module.code_bytes(entry);
        let locals_base = frame.locals_base as usize;
        let ctrl_base = frame.ctrl_base as usize;
        let mut ip = frame.ip as usize;

        loop {
            let op_pos = ip;
            let op = code[ip];
            ip += 1;
            match op {
                isa::UNREACHABLE => return Err(Error::new(ErrorKind::Unreachable)),
                isa::NOP => {}

                isa::BLOCK => {
                    let (param_cells, result_cells) = decode_block_arity(&module, code, &mut ip);
                    let bounds = block_bounds(entry, op_pos);
                    self.ctrl.push(BlockInfo {
                        target_ip: bounds.end_off,
                        entry_sp: (self.stack.len_cells() - param_cells) as u32,
                        arity_cells: result_cells as u32,
                        label: LabelKind::Block,
                    });
                }
                isa::LOOP => {
                    let (param_cells, _) = decode_block_arity(&module, code, &mut ip);
                    self.ctrl.push(BlockInfo {
                        target_ip: ip as u32,
                        entry_sp: (self.stack.len_cells() - param_cells) as u32,
                        arity_cells: param_cells as u32,
                        label: LabelKind::Loop,
                    });
                }
                isa::IF => {
                    let (param_cells, result_cells) = decode_block_arity(&module, code, &mut ip);
                    let condition = self.stack.pop_u32();
                    let bounds = block_bounds(entry, op_pos);
                    self.ctrl.push(BlockInfo {
                        target_ip: bounds.end_off,
                        entry_sp: (self.stack.len_cells() - param_cells) as u32,
                        arity_cells: result_cells as u32,
                        label: LabelKind::If,
                    });
                    if condition == 0 {
                        ip = if bounds.else_off != BlockBounds::NO_ELSE {
                            bounds.else_off as usize + 1
                        } else {
                            bounds.end_off as usize
                        };
                    }
                }
                isa::ELSE => {
                    // Reached from the then-branch: jump over the else-branch
                    // to the block's end.
                    let target = self.ctrl.last().expect("an if block is live");
                    ip = target.target_ip as usize;
                }
                isa::END => {
                    self.ctrl.pop();
                    if self.ctrl.len() == ctrl_base {
                        self.frames.last_mut().expect("a frame is live").ip = ip as u32;
                        return Ok(RunResult::Return);
                    }
                }

                isa::BR => {
                    let depth = decode_leb_u32(code, &mut ip);
                    self.branch(depth, &mut ip);
                }
                isa::BR_IF => {
                    let depth = decode_leb_u32(code, &mut ip);
                    if self.stack.pop_u32() != 0 {
                        self.branch(depth, &mut ip);
                    }
                }
                isa::BR_TABLE => {
                    let count = decode_leb_u32(code, &mut ip);
                    let selector = self.stack.pop_u32();
                    let chosen = selector.min(count);
                    let mut depth = 0;
                    for index in 0..=count {
                        let target = decode_leb_u32(code, &mut ip);
                        if index == chosen {
                            depth = target;
                            break;
                        }
                    }
                    self.branch(depth, &mut ip);
                }
                isa::RETURN => {
                    self.frames.last_mut().expect("a frame is live").ip = ip as u32;
                    return Ok(RunResult::Return);
                }

                isa::CALL => {
                    let callee = decode_leb_u32(code, &mut ip);
                    if self.module.gas_func_idx() == Some(callee) {
                        let delta = self.stack.pop_u64();
                        instance.charge_gas(delta)?;
                    } else {
                        match instance.functions[callee as usize].kind {
                            FuncKind::Native => self.invoke_host(instance, callee)?,
                            FuncKind::ByteCode => {
                                self.frames.last_mut().expect("a frame is live").ip = ip as u32;
                                return Ok(RunResult::NestedCall(callee));
                            }
                        }
                    }
                }
                isa::CALL_INDIRECT => {
                    let type_idx = decode_leb_u32(code, &mut ip);
                    ip += 1; // the fixed `table 0` byte
                    let element = self.stack.pop_u32();
                    let table = &instance.tables[0];
                    if element >= table.cur_size {
                        return Err(Error::new(ErrorKind::UndefinedElement));
                    }
                    let callee = table.elements[element as usize];
                    if callee == UNINITIALIZED_ELEMENT {
                        return Err(Error::new(ErrorKind::UninitializedElement));
                    }
                    let expected = self.module.types[type_idx as usize].canonical_idx();
                    let func = instance.functions[callee as usize];
                    if func.canonical_type_idx != expected {
                        return Err(Error::new(ErrorKind::IndirectCallTypeMismatch));
                    }
                    match func.kind {
                        FuncKind::Native => self.invoke_host(instance, callee)?,
                        FuncKind::ByteCode => {
                            self.frames.last_mut().expect("a frame is live").ip = ip as u32;
                            return Ok(RunResult::NestedCall(callee));
                        }
                    }
                }

                isa::DROP => {
                    self.stack.pop_u32();
                }
                isa::DROP_64 => {
                    self.stack.pop_u64();
                }
                isa::SELECT => {
                    let condition = self.stack.pop_u32();
                    let right = self.stack.pop_u32();
                    let left = self.stack.pop_u32();
                    self.stack.push_u32(if condition != 0 { left } else { right });
                }
                isa::SELECT_64 => {
                    let condition = self.stack.pop_u32();
                    let right = self.stack.pop_u64();
                    let left = self.stack.pop_u64();
                    self.stack.push_u64(if condition != 0 { left } else { right });
                }

                isa::GET_LOCAL => {
                    let index = decode_leb_u32(code, &mut ip);
                    let slot = entry.locals[index as usize];
                    let src = locals_base + slot.cell_offset as usize;
                    if slot.ty.is_64bit() {
                        let value = self.stack.read_u64_at(src);
                        self.stack.push_u64(value);
                    } else {
                        let value = self.stack.get_cell(src);
                        self.stack.push_u32(value);
                    }
                }
                isa::SET_LOCAL => {
                    let index = decode_leb_u32(code, &mut ip);
                    let slot = entry.locals[index as usize];
                    let dst = locals_base + slot.cell_offset as usize;
                    if slot.ty.is_64bit() {
                        let value = self.stack.pop_u64();
                        self.stack.write_u64_at(dst, value);
                    } else {
                        let value = self.stack.pop_u32();
                        self.stack.set_cell(dst, value);
                    }
                }
                isa::TEE_LOCAL => {
                    let index = decode_leb_u32(code, &mut ip);
                    let slot = entry.locals[index as usize];
                    let dst = locals_base + slot.cell_offset as usize;
                    if slot.ty.is_64bit() {
                        let value = self.stack.peek_u64();
                        self.stack.write_u64_at(dst, value);
                    } else {
                        let value = self.stack.peek_u32();
                        self.stack.set_cell(dst, value);
                    }
                }

                isa::GET_GLOBAL => {
                    let index = decode_leb_u32(code, &mut ip);
                    let bits = instance.read_global_bits(index);
                    self.stack.push_u32(bits as u32);
                }
                isa::GET_GLOBAL_64 => {
                    let index = decode_leb_u32(code, &mut ip);
                    let bits = instance.read_global_bits(index);
                    self.stack.push_u64(bits);
                }
                isa::SET_GLOBAL => {
                    let index = decode_leb_u32(code, &mut ip);
                    let value = self.stack.pop_u32();
                    instance.write_global_bits(index, value as u64);
                }
                isa::SET_GLOBAL_64 => {
                    let index = decode_leb_u32(code, &mut ip);
                    let value = self.stack.pop_u64();
                    instance.write_global_bits(index, value);
                }

                isa::I32_LOAD => self.load::<i32>(instance, code, &mut ip)?,
                isa::I64_LOAD => self.load::<i64>(instance, code, &mut ip)?,
                isa::F32_LOAD => self.load::<F32>(instance, code, &mut ip)?,
                isa::F64_LOAD => self.load::<F64>(instance, code, &mut ip)?,
                isa::I32_LOAD8_S => self.load_extend::<i8, i32>(instance, code, &mut ip)?,
                isa::I32_LOAD8_U => self.load_extend::<u8, i32>(instance, code, &mut ip)?,
                isa::I32_LOAD16_S => self.load_extend::<i16, i32>(instance, code, &mut ip)?,
                isa::I32_LOAD16_U => self.load_extend::<u16, i32>(instance, code, &mut ip)?,
                isa::I64_LOAD8_S => self.load_extend::<i8, i64>(instance, code, &mut ip)?,
                isa::I64_LOAD8_U => self.load_extend::<u8, i64>(instance, code, &mut ip)?,
                isa::I64_LOAD16_S => self.load_extend::<i16, i64>(instance, code, &mut ip)?,
                isa::I64_LOAD16_U => self.load_extend::<u16, i64>(instance, code, &mut ip)?,
                isa::I64_LOAD32_S => self.load_extend::<i32, i64>(instance, code, &mut ip)?,
                isa::I64_LOAD32_U => self.load_extend::<u32, i64>(instance, code, &mut ip)?,
                isa::I32_STORE => self.store::<i32>(instance, code, &mut ip)?,
                isa::I64_STORE => self.store::<i64>(instance, code, &mut ip)?,
                isa::F32_STORE => self.store::<F32>(instance, code, &mut ip)?,
                isa::F64_STORE => self.store::<F64>(instance, code, &mut ip)?,
                isa::I32_STORE8 => self.store_wrap::<i32, i8>(instance, code, &mut ip)?,
                isa::I32_STORE16 => self.store_wrap::<i32, i16>(instance, code, &mut ip)?,
                isa::I64_STORE8 => self.store_wrap::<i64, i8>(instance, code, &mut ip)?,
                isa::I64_STORE16 => self.store_wrap::<i64, i16>(instance, code, &mut ip)?,
                isa::I64_STORE32 => self.store_wrap::<i64, i32>(instance, code, &mut ip)?,

                isa::MEMORY_SIZE => {
                    ip += 1; // the fixed `memory 0` byte
                    let pages = instance.memories[0].cur_pages;
                    self.stack.push_u32(pages);
                }
                isa::MEMORY_GROW => {
                    ip += 1;
                    let delta = self.stack.pop_u32();
                    let result = instance.grow_memory(0, delta).unwrap_or(u32::MAX);
                    self.stack.push_u32(result);
                }

                isa::I32_CONST => {
                    let value = decode_leb_s32(code, &mut ip);
                    self.stack.push_u32(value as u32);
                }
                isa::I64_CONST => {
                    let value = decode_leb_s64(code, &mut ip);
                    self.stack.push_u64(value as u64);
                }
                isa::F32_CONST => {
                    let bits = decode_u32_le(code, &mut ip);
                    self.stack.push_u32(bits);
                }
                isa::F64_CONST => {
                    let bits = decode_u64_le(code, &mut ip);
                    self.stack.push_u64(bits);
                }

                isa::I32_EQZ => self.unop(|v: u32| u32::from(v == 0)),
                isa::I64_EQZ => self.unop(|v: u64| u32::from(v == 0)),
                isa::I32_EQ => self.relop(|a: i32, b| a == b),
                isa::I32_NE => self.relop(|a: i32, b| a != b),
                isa::I32_LT_S => self.relop(|a: i32, b| a < b),
                isa::I32_LT_U => self.relop(|a: u32, b| a < b),
                isa::I32_GT_S => self.relop(|a: i32, b| a > b),
                isa::I32_GT_U => self.relop(|a: u32, b| a > b),
                isa::I32_LE_S => self.relop(|a: i32, b| a <= b),
                isa::I32_LE_U => self.relop(|a: u32, b| a <= b),
                isa::I32_GE_S => self.relop(|a: i32, b| a >= b),
                isa::I32_GE_U => self.relop(|a: u32, b| a >= b),
                isa::I64_EQ => self.relop(|a: i64, b| a == b),
                isa::I64_NE => self.relop(|a: i64, b| a != b),
                isa::I64_LT_S => self.relop(|a: i64, b| a < b),
                isa::I64_LT_U => self.relop(|a: u64, b| a < b),
                isa::I64_GT_S => self.relop(|a: i64, b| a > b),
                isa::I64_GT_U => self.relop(|a: u64, b| a > b),
                isa::I64_LE_S => self.relop(|a: i64, b| a <= b),
                isa::I64_LE_U => self.relop(|a: u64, b| a <= b),
                isa::I64_GE_S => self.relop(|a: i64, b| a >= b),
                isa::I64_GE_U => self.relop(|a: u64, b| a >= b),
                isa::F32_EQ => self.relop(|a: F32, b| a == b),
                isa::F32_NE => self.relop(|a: F32, b| a != b),
                isa::F32_LT => self.relop(|a: F32, b| a < b),
                isa::F32_GT => self.relop(|a: F32, b| a > b),
                isa::F32_LE => self.relop(|a: F32, b| a <= b),
                isa::F32_GE => self.relop(|a: F32, b| a >= b),
                isa::F64_EQ => self.relop(|a: F64, b| a == b),
                isa::F64_NE => self.relop(|a: F64, b| a != b),
                isa::F64_LT => self.relop(|a: F64, b| a < b),
                isa::F64_GT => self.relop(|a: F64, b| a > b),
                isa::F64_LE => self.relop(|a: F64, b| a <= b),
                isa::F64_GE => self.relop(|a: F64, b| a >= b),

                isa::I32_CLZ => self.unop(|v: i32| Integer::leading_zeros(v)),
                isa::I32_CTZ => self.unop(|v: i32| Integer::trailing_zeros(v)),
                isa::I32_POPCNT => self.unop(|v: i32| Integer::count_ones(v)),
                isa::I32_ADD => self.binop(|a: i32, b| a.add(b)),
                isa::I32_SUB => self.binop(|a: i32, b| a.sub(b)),
                isa::I32_MUL => self.binop(|a: i32, b| a.mul(b)),
                isa::I32_DIV_S => self.binop_trap(|a: i32, b| a.div(b))?,
                isa::I32_DIV_U => self.binop_trap(|a: u32, b| a.div(b))?,
                isa::I32_REM_S => self.binop_trap(|a: i32, b| a.rem(b))?,
                isa::I32_REM_U => self.binop_trap(|a: u32, b| a.rem(b))?,
                isa::I32_AND => self.binop(|a: i32, b| a & b),
                isa::I32_OR => self.binop(|a: i32, b| a | b),
                isa::I32_XOR => self.binop(|a: i32, b| a ^ b),
                isa::I32_SHL => self.binop(|a: i32, b| a.wrapping_shl(b as u32)),
                isa::I32_SHR_S => self.binop(|a: i32, b| a.wrapping_shr(b as u32)),
                isa::I32_SHR_U => self.binop(|a: u32, b| a.wrapping_shr(b)),
                isa::I32_ROTL => self.binop(|a: i32, b| a.rotl(b)),
                isa::I32_ROTR => self.binop(|a: i32, b| a.rotr(b)),
                isa::I64_CLZ => self.unop(|v: i64| Integer::leading_zeros(v)),
                isa::I64_CTZ => self.unop(|v: i64| Integer::trailing_zeros(v)),
                isa::I64_POPCNT => self.unop(|v: i64| Integer::count_ones(v)),
                isa::I64_ADD => self.binop(|a: i64, b| a.add(b)),
                isa::I64_SUB => self.binop(|a: i64, b| a.sub(b)),
                isa::I64_MUL => self.binop(|a: i64, b| a.mul(b)),
                isa::I64_DIV_S => self.binop_trap(|a: i64, b| a.div(b))?,
                isa::I64_DIV_U => self.binop_trap(|a: u64, b| a.div(b))?,
                isa::I64_REM_S => self.binop_trap(|a: i64, b| a.rem(b))?,
                isa::I64_REM_U => self.binop_trap(|a: u64, b| a.rem(b))?,
                isa::I64_AND => self.binop(|a: i64, b| a & b),
                isa::I64_OR => self.binop(|a: i64, b| a | b),
                isa::I64_XOR => self.binop(|a: i64, b| a ^ b),
                isa::I64_SHL => self.binop(|a: i64, b| a.wrapping_shl(b as u32)),
                isa::I64_SHR_S => self.binop(|a: i64, b| a.wrapping_shr(b as u32)),
                isa::I64_SHR_U => self.binop(|a: u64, b| a.wrapping_shr(b as u32)),
                isa::I64_ROTL => self.binop(|a: i64, b| a.rotl(b)),
                isa::I64_ROTR => self.binop(|a: i64, b| a.rotr(b)),

                isa::F32_ABS => self.unop(|v: F32| v.abs()),
                isa::F32_NEG => self.unop(|v: F32| -v),
                isa::F32_CEIL => self.unop(|v: F32| Float::ceil(v)),
                isa::F32_FLOOR => self.unop(|v: F32| Float::floor(v)),
                isa::F32_TRUNC => self.unop(|v: F32| Float::trunc(v)),
                isa::F32_NEAREST => self.unop(|v: F32| Float::nearest(v)),
                isa::F32_SQRT => self.unop(|v: F32| Float::sqrt(v)),
                isa::F32_ADD => self.binop(|a: F32, b| a.add(b)),
                isa::F32_SUB => self.binop(|a: F32, b| a.sub(b)),
                isa::F32_MUL => self.binop(|a: F32, b| a.mul(b)),
                isa::F32_DIV => self.binop_trap(|a: F32, b| a.div(b))?,
                isa::F32_MIN => self.binop(|a: F32, b| Float::min(a, b)),
                isa::F32_MAX => self.binop(|a: F32, b| Float::max(a, b)),
                isa::F32_COPYSIGN => self.binop(|a: F32, b| Float::copysign(a, b)),
                isa::F64_ABS => self.unop(|v: F64| v.abs()),
                isa::F64_NEG => self.unop(|v: F64| -v),
                isa::F64_CEIL => self.unop(|v: F64| Float::ceil(v)),
                isa::F64_FLOOR => self.unop(|v: F64| Float::floor(v)),
                isa::F64_TRUNC => self.unop(|v: F64| Float::trunc(v)),
                isa::F64_NEAREST => self.unop(|v: F64| Float::nearest(v)),
                isa::F64_SQRT => self.unop(|v: F64| Float::sqrt(v)),
                isa::F64_ADD => self.binop(|a: F64, b| a.add(b)),
                isa::F64_SUB => self.binop(|a: F64, b| a.sub(b)),
                isa::F64_MUL => self.binop(|a: F64, b| a.mul(b)),
                isa::F64_DIV => self.binop_trap(|a: F64, b| a.div(b))?,
                isa::F64_MIN => self.binop(|a: F64, b| Float::min(a, b)),
                isa::F64_MAX => self.binop(|a: F64, b| Float::max(a, b)),
                isa::F64_COPYSIGN => self.binop(|a: F64, b| Float::copysign(a, b)),

                isa::I32_WRAP_I64 => self.unop(|v: i64| v as i32),
                isa::I32_TRUNC_S_F32 => self.trunc_op::<F32, i32>()?,
                isa::I32_TRUNC_U_F32 => self.trunc_op::<F32, u32>()?,
                isa::I32_TRUNC_S_F64 => self.trunc_op::<F64, i32>()?,
                isa::I32_TRUNC_U_F64 => self.trunc_op::<F64, u32>()?,
                isa::I64_EXTEND_S_I32 => self.unop(|v: i32| v as i64),
                isa::I64_EXTEND_U_I32 => self.unop(|v: u32| v as u64),
                isa::I64_TRUNC_S_F32 => self.trunc_op::<F32, i64>()?,
                isa::I64_TRUNC_U_F32 => self.trunc_op::<F32, u64>()?,
                isa::I64_TRUNC_S_F64 => self.trunc_op::<F64, i64>()?,
                isa::I64_TRUNC_U_F64 => self.trunc_op::<F64, u64>()?,
                isa::F32_CONVERT_S_I32 => self.unop(|v: i32| ExtendInto::<F32>::extend_into(v)),
                isa::F32_CONVERT_U_I32 => self.unop(|v: u32| ExtendInto::<F32>::extend_into(v)),
                isa::F32_CONVERT_S_I64 => self.unop(|v: i64| ExtendInto::<F32>::extend_into(v)),
                isa::F32_CONVERT_U_I64 => self.unop(|v: u64| ExtendInto::<F32>::extend_into(v)),
                isa::F32_DEMOTE_F64 => self.unop(|v: F64| WrapInto::<F32>::wrap_into(v)),
                isa::F64_CONVERT_S_I32 => self.unop(|v: i32| ExtendInto::<F64>::extend_into(v)),
                isa::F64_CONVERT_U_I32 => self.unop(|v: u32| ExtendInto::<F64>::extend_into(v)),
                isa::F64_CONVERT_S_I64 => self.unop(|v: i64| ExtendInto::<F64>::extend_into(v)),
                isa::F64_CONVERT_U_I64 => self.unop(|v: u64| ExtendInto::<F64>::extend_into(v)),
                isa::F64_PROMOTE_F32 => self.unop(|v: F32| ExtendInto::<F64>::extend_into(v)),

                // Reinterpretations are bit copies; the cells already hold
                // the right bits.
                isa::I32_REINTERPRET_F32
                | isa::I64_REINTERPRET_F64
                | isa::F32_REINTERPRET_I32
                | isa::F64_REINTERPRET_I64 => {}

                isa::I32_EXTEND8_S => self.unop(|v: i32| (v as i8) as i32),
                isa::I32_EXTEND16_S => self.unop(|v: i32| (v as i16) as i32),
                isa::I64_EXTEND8_S => self.unop(|v: i64| (v as i8) as i64),
                isa::I64_EXTEND16_S => self.unop(|v: i64| (v as i16) as i64),
                isa::I64_EXTEND32_S => self.unop(|v: i64| (v as i32) as i64),

                other => unreachable!("opcode 0x{:02x} rejected by validation", other),
            }
        }
    }

    // ---- operator helpers ----

    fn unop<T: StackValue, U: StackValue>(&mut self, f: impl FnOnce(T) -> U) {
        let value = T::pop_from(&mut self.stack);
        f(value).push_to(&mut self.stack);
    }

    fn binop<T: StackValue, U: StackValue>(&mut self, f: impl FnOnce(T, T) -> U) {
        let right = T::pop_from(&mut self.stack);
        let left = T::pop_from(&mut self.stack);
        f(left, right).push_to(&mut self.stack);
    }

    fn binop_trap<T: StackValue>(
        &mut self,
        f: impl FnOnce(T, T) -> Result<T, ErrorKind>,
    ) -> Result<(), Error> {
        let right = T::pop_from(&mut self.stack);
        let left = T::pop_from(&mut self.stack);
        let result = f(left, right).map_err(Error::new)?;
        result.push_to(&mut self.stack);
        Ok(())
    }

    fn relop<T: StackValue>(&mut self, f: impl FnOnce(T, T) -> bool) {
        let right = T::pop_from(&mut self.stack);
        let left = T::pop_from(&mut self.stack);
        self.stack.push_u32(u32::from(f(left, right)));
    }

    fn trunc_op<F, T>(&mut self) -> Result<(), Error>
    where
        F: StackValue + TryTruncateInto<T, ErrorKind>,
        T: StackValue,
    {
        let value = F::pop_from(&mut self.stack);
        let truncated = value.try_truncate_into().map_err(Error::new)?;
        truncated.push_to(&mut self.stack);
        Ok(())
    }

    fn memory_read(
        &mut self,
        instance: &Instance,
        offset: u32,
        len: usize,
        out: &mut [u8],
    ) -> Result<(), Error> {
        let address = self.stack.pop_u32();
        let memory = &instance.memories[0];
        let start = address as u64 + offset as u64;
        if start + len as u64 > memory.mem_size {
            return Err(Error::new(ErrorKind::OutOfBoundsMemory));
        }
        out.copy_from_slice(&memory.bytes()[start as usize..start as usize + len]);
        Ok(())
    }

    fn memory_write(
        &mut self,
        instance: &mut Instance,
        offset: u32,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let address = self.stack.pop_u32();
        let memory = &mut instance.memories[0];
        let start = address as u64 + offset as u64;
        if start + bytes.len() as u64 > memory.mem_size {
            return Err(Error::new(ErrorKind::OutOfBoundsMemory));
        }
        memory.bytes_mut()[start as usize..start as usize + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn load<T>(&mut self, instance: &Instance, code: &[u8], ip: &mut usize) -> Result<(), Error>
    where
        T: StackValue + LittleEndianConvert,
    {
        let offset = decode_mem_immediates(code, ip);
        let mut bytes = T::Bytes::default();
        let len = bytes.as_ref().len();
        self.memory_read(instance, offset, len, bytes.as_mut())?;
        T::from_le_bytes(bytes).push_to(&mut self.stack);
        Ok(())
    }

    fn load_extend<T, U>(
        &mut self,
        instance: &Instance,
        code: &[u8],
        ip: &mut usize,
    ) -> Result<(), Error>
    where
        T: LittleEndianConvert + ExtendInto<U>,
        U: StackValue,
    {
        let offset = decode_mem_immediates(code, ip);
        let mut bytes = T::Bytes::default();
        let len = bytes.as_ref().len();
        self.memory_read(instance, offset, len, bytes.as_mut())?;
        T::from_le_bytes(bytes).extend_into().push_to(&mut self.stack);
        Ok(())
    }

    fn store<T>(
        &mut self,
        instance: &mut Instance,
        code: &[u8],
        ip: &mut usize,
    ) -> Result<(), Error>
    where
        T: StackValue + LittleEndianConvert,
    {
        let offset = decode_mem_immediates(code, ip);
        let value = T::pop_from(&mut self.stack);
        let bytes = value.into_le_bytes();
        self.memory_write(instance, offset, bytes.as_ref())
    }

    fn store_wrap<T, U>(
        &mut self,
        instance: &mut Instance,
        code: &[u8],
        ip: &mut usize,
    ) -> Result<(), Error>
    where
        T: StackValue + WrapInto<U>,
        U: LittleEndianConvert,
    {
        let offset = decode_mem_immediates(code, ip);
        let value = T::pop_from(&mut self.stack).wrap_into();
        let bytes = value.into_le_bytes();
        self.memory_write(instance, offset, bytes.as_ref())
    }
}

fn block_bounds(entry: &CodeEntry, op_pos: usize) -> BlockBounds {
    *entry
        .block_bounds
        .get(&(op_pos as u32))
        .expect("validation recorded every block's bounds")
}

// ---- immediate decoding ----
//
// Indices and immediates were bounds-checked during validation; decoding here
// is deliberately infallible.

fn decode_leb_u32(code: &[u8], ip: &mut usize) -> u32 {
    let mut result = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = code[*ip];
        *ip += 1;
        result |= ((byte & 0x7f) as u32) << shift;
        if byte & 0x80 == 0 {
            return result;
        }
        shift += 7;
    }
}

fn decode_leb_s32(code: &[u8], ip: &mut usize) -> i32 {
    let mut result = 0u32;
    let mut shift = 0u32;
    loop {
        let byte = code[*ip];
        *ip += 1;
        result |= ((byte & 0x7f) as u32) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 32 {
                return ((result << (32 - shift)) as i32) >> (32 - shift);
            }
            return result as i32;
        }
    }
}

fn decode_leb_s64(code: &[u8], ip: &mut usize) -> i64 {
    let mut result = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = code[*ip];
        *ip += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            if shift < 64 {
                return ((result << (64 - shift)) as i64) >> (64 - shift);
            }
            return result as i64;
        }
    }
}

fn decode_u32_le(code: &[u8], ip: &mut usize) -> u32 {
    let bytes: [u8; 4] = code[*ip..*ip + 4].try_into().expect("4 bytes");
    *ip += 4;
    u32::from_le_bytes(bytes)
}

fn decode_u64_le(code: &[u8], ip: &mut usize) -> u64 {
    let bytes: [u8; 8] = code[*ip..*ip + 8].try_into().expect("8 bytes");
    *ip += 8;
    u64::from_le_bytes(bytes)
}

/// Reads the `align`+`offset` immediates of a memory access; alignment is a
/// hint only.
fn decode_mem_immediates(code: &[u8], ip: &mut usize) -> u32 {
    let _align = decode_leb_u32(code, ip);
    decode_leb_u32(code, ip)
}

/// Decodes a block-type immediate into `(param_cells, result_cells)`.
fn decode_block_arity(module: &Module, code: &[u8], ip: &mut usize) -> (usize, usize) {
    let byte = code[*ip];
    // Short form: one sign-extended byte.
    if byte & 0x80 == 0 {
        *ip += 1;
        return match byte {
            isa::BLOCK_TYPE_EMPTY => (0, 0),
            isa::VALUE_TYPE_I32 | isa::VALUE_TYPE_F32 => (0, 1),
            isa::VALUE_TYPE_I64 | isa::VALUE_TYPE_F64 => (0, 2),
            type_idx => {
                let ty = &module.types[type_idx as usize];
                (ty.param_cells() as usize, ty.return_cells() as usize)
            }
        };
    }
    let type_idx = decode_leb_u32(code, ip);
    let ty = &module.types[type_idx as usize];
    (ty.param_cells() as usize, ty.return_cells() as usize)
}
