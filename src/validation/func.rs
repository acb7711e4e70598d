//! The structured-stack type check.
//!
//! A single pass over the opcode stream that maintains the static operand
//! stack, a running byte-size of that stack, and the control-block stack.
//! After an instruction that never passes control on (`unreachable`, `br`,
//! `return`, `br_table`) the current block's stack becomes *polymorphic*:
//! popping below the block floor synthesises `any`, which unifies with every
//! type requirement, and the stack stabilises again at the block's `end`.
//!
//! Besides type checking, the pass records per code entry the worst-case
//! operand-stack size and block depth for interpreter frame sizing, the
//! `else`/`end` position of every block (so the interpreter never scans for
//! a branch target), the set of direct callees, and the width-disambiguating
//! opcode rewrites described in [`crate::isa`].

use crate::isa;
use crate::loader::reader::Reader;
use crate::loader::{MAX_FUNCTION_OPERAND_STACK, MAX_FUNCTION_BLOCK_DEPTH};
use crate::module::{BlockBounds, LocalSlot};
use crate::types::FuncType;
use crate::validation::ModuleContext;
use smallvec::SmallVec;
use std::collections::HashMap;
use wasmet_core::{Error, ErrorKind, ValueType};

/// Value type on the validator's stack.
#[derive(Debug, Clone, Copy)]
enum StackValueType {
    /// Any value type; produced only above a polymorphic block floor.
    Any,
    /// Concrete value type.
    Specific(ValueType),
}

impl StackValueType {
    /// Byte size for stack accounting; `any` is charged conservatively.
    fn size(&self) -> u32 {
        match self {
            StackValueType::Any => 8,
            StackValueType::Specific(ty) => ty.size(),
        }
    }

    fn is_64bit(&self) -> bool {
        match self {
            StackValueType::Any => false,
            StackValueType::Specific(ty) => ty.is_64bit(),
        }
    }
}

impl From<ValueType> for StackValueType {
    fn from(ty: ValueType) -> Self {
        StackValueType::Specific(ty)
    }
}

impl PartialEq<StackValueType> for StackValueType {
    fn eq(&self, other: &StackValueType) -> bool {
        match (self, other) {
            (StackValueType::Any, _) | (_, StackValueType::Any) => true,
            (StackValueType::Specific(a), StackValueType::Specific(b)) => a == b,
        }
    }
}

/// Kind of a control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    /// The implicit function body block.
    Function,
    Block,
    Loop,
    If,
}

/// Type of a block: void, a single value type, or a declared function type.
#[derive(Debug, Clone, Copy)]
enum BlockType {
    Empty,
    Value(ValueType),
    Func(u32),
}

impl BlockType {
    fn params(&self, ctx: &ModuleContext) -> SmallVec<[ValueType; 8]> {
        match self {
            BlockType::Empty | BlockType::Value(_) => SmallVec::new(),
            BlockType::Func(idx) => ctx.types[*idx as usize].params().iter().copied().collect(),
        }
    }

    fn results(&self, ctx: &ModuleContext) -> SmallVec<[ValueType; 1]> {
        match self {
            BlockType::Empty => SmallVec::new(),
            BlockType::Value(ty) => SmallVec::from_slice(&[*ty]),
            BlockType::Func(idx) => ctx.types[*idx as usize]
                .return_type()
                .into_iter()
                .collect(),
        }
    }
}

/// One entry of the control-block stack.
#[derive(Debug, Clone)]
struct ControlBlock {
    label_kind: LabelKind,
    block_type: BlockType,
    /// Function-relative offset of the block opcode.
    start_pos: u32,
    /// Function-relative offset of the `else` opcode, once seen.
    else_pos: Option<u32>,
    /// Operand stack length at entry, block parameters excluded.
    init_stack_len: usize,
    /// Operand stack bytes at entry, matching `init_stack_len`.
    init_stack_bytes: u32,
    /// Whether the block's stack became polymorphic.
    polymorphic: bool,
}

/// Everything the validator learned about one function body.
#[derive(Debug)]
pub(crate) struct ValidatedCode {
    pub max_stack_size: u32,
    pub max_block_depth: u32,
    pub block_bounds: HashMap<u32, BlockBounds>,
    /// `(function-relative offset, replacement opcode)` rewrites.
    pub patches: Vec<(u32, u8)>,
    pub callees: Vec<u32>,
}

/// Validates one function body (the opcode stream after the locals header)
/// against the module context.
pub(crate) fn validate_function(
    ctx: &ModuleContext,
    func_type: &FuncType,
    locals: &[LocalSlot],
    code: &[u8],
) -> Result<ValidatedCode, Error> {
    let mut validator = FunctionValidator {
        ctx,
        func_type,
        locals,
        reader: Reader::new(code),
        value_stack: Vec::new(),
        cur_stack_bytes: 0,
        blocks: Vec::new(),
        out: ValidatedCode {
            max_stack_size: 0,
            max_block_depth: 1,
            block_bounds: HashMap::new(),
            patches: Vec::new(),
            callees: Vec::new(),
        },
    };
    validator.run()?;
    Ok(validator.out)
}

struct FunctionValidator<'a> {
    ctx: &'a ModuleContext<'a>,
    func_type: &'a FuncType,
    locals: &'a [LocalSlot],
    reader: Reader<'a>,
    value_stack: Vec<StackValueType>,
    cur_stack_bytes: u32,
    blocks: Vec<ControlBlock>,
    out: ValidatedCode,
}

impl<'a> FunctionValidator<'a> {
    fn run(&mut self) -> Result<(), Error> {
        // The implicit function block; `br` to the outermost depth targets it
        // and its `end` is the final opcode of the body.
        let root_type = match self.func_type.return_type() {
            Some(ty) => BlockType::Value(ty),
            None => BlockType::Empty,
        };
        self.blocks.push(ControlBlock {
            label_kind: LabelKind::Function,
            block_type: root_type,
            start_pos: 0,
            else_pos: None,
            init_stack_len: 0,
            init_stack_bytes: 0,
            polymorphic: false,
        });

        while !self.blocks.is_empty() {
            let op_pos = self.reader.pos() as u32;
            let opcode = self.reader.read_u8()?;
            self.visit(op_pos, opcode).map_err(|mut err| {
                if err.extra_message().is_none() {
                    err.set_extra_message(format!("(at byte offset {})", op_pos));
                }
                err
            })?;
        }

        if !self.reader.is_at_end() {
            return Err(Error::new(ErrorKind::FunctionSizeMismatch));
        }
        Ok(())
    }

    fn visit(&mut self, op_pos: u32, opcode: u8) -> Result<(), Error> {
        use wasmet_core::ValueType::{F32, F64, I32, I64};

        match opcode {
            isa::NOP => {}
            isa::UNREACHABLE => self.make_polymorphic(),

            isa::BLOCK => {
                let block_type = self.read_block_type()?;
                self.push_block(LabelKind::Block, block_type, op_pos)?;
            }
            isa::LOOP => {
                let block_type = self.read_block_type()?;
                self.push_block(LabelKind::Loop, block_type, op_pos)?;
            }
            isa::IF => {
                let block_type = self.read_block_type()?;
                self.pop_value(I32.into())?;
                self.push_block(LabelKind::If, block_type, op_pos)?;
            }
            isa::ELSE => self.visit_else(op_pos)?,
            isa::END => self.visit_end(op_pos)?,

            isa::BR => {
                let depth = self.reader.read_leb_u32()?;
                self.check_branch_arity(depth)?;
                self.make_polymorphic();
            }
            isa::BR_IF => {
                let depth = self.reader.read_leb_u32()?;
                self.pop_value(I32.into())?;
                self.check_branch_arity(depth)?;
            }
            isa::BR_TABLE => self.visit_br_table()?,
            isa::RETURN => {
                if let Some(ty) = self.func_type.return_type() {
                    self.tee_value(ty.into())?;
                }
                self.make_polymorphic();
            }

            isa::CALL => {
                let func_idx = self.reader.read_leb_u32()?;
                let callee = self.ctx.func_type(func_idx)?.clone();
                for param in callee.params().iter().rev() {
                    self.pop_value((*param).into())?;
                }
                if let Some(ty) = callee.return_type() {
                    self.push_value(ty.into())?;
                }
                if !self.out.callees.contains(&func_idx) {
                    self.out.callees.push(func_idx);
                }
            }
            isa::CALL_INDIRECT => {
                if !self.ctx.has_table {
                    return Err(Error::new(ErrorKind::UnknownTable));
                }
                let type_idx = self.reader.read_leb_u32()?;
                let callee = self.ctx.type_at(type_idx)?.clone();
                if self.reader.read_u8()? != 0 {
                    return Err(Error::new(ErrorKind::ZeroByteExpected));
                }
                self.pop_value(I32.into())?;
                for param in callee.params().iter().rev() {
                    self.pop_value((*param).into())?;
                }
                if let Some(ty) = callee.return_type() {
                    self.push_value(ty.into())?;
                }
            }

            isa::DROP => {
                let dropped = self.pop_value(StackValueType::Any)?;
                if dropped.is_64bit() {
                    self.out.patches.push((op_pos, isa::DROP_64));
                }
            }
            isa::SELECT => {
                self.pop_value(I32.into())?;
                let select_type = self.pop_value(StackValueType::Any)?;
                self.pop_value(select_type)?;
                self.push_raw(select_type)?;
                if select_type.is_64bit() {
                    self.out.patches.push((op_pos, isa::SELECT_64));
                }
            }

            isa::GET_LOCAL => {
                let ty = self.local_type()?;
                self.push_value(ty.into())?;
            }
            isa::SET_LOCAL => {
                let ty = self.local_type()?;
                self.pop_value(ty.into())?;
            }
            isa::TEE_LOCAL => {
                let ty = self.local_type()?;
                self.tee_value(ty.into())?;
            }

            isa::GET_GLOBAL => {
                let global_idx = self.reader.read_leb_u32()?;
                let (ty, _, _) = self.ctx.global(global_idx)?;
                self.push_value(ty.into())?;
                if ty.is_64bit() {
                    self.out.patches.push((op_pos, isa::GET_GLOBAL_64));
                }
            }
            isa::SET_GLOBAL => {
                let global_idx = self.reader.read_leb_u32()?;
                let (ty, mutable, is_import) = self.ctx.global(global_idx)?;
                if is_import {
                    // Imported globals are read-only in this engine.
                    return Err(Error::with_extra(
                        ErrorKind::UnsupportedImport,
                        format!("(mutable access to imported global #{})", global_idx),
                    ));
                }
                if !mutable {
                    return Err(Error::with_extra(
                        ErrorKind::GlobalIsImmutable,
                        format!("#{}", global_idx),
                    ));
                }
                self.pop_value(ty.into())?;
                if ty.is_64bit() {
                    self.out.patches.push((op_pos, isa::SET_GLOBAL_64));
                }
            }

            isa::I32_LOAD => self.visit_load(4, I32)?,
            isa::I64_LOAD => self.visit_load(8, I64)?,
            isa::F32_LOAD => self.visit_load(4, F32)?,
            isa::F64_LOAD => self.visit_load(8, F64)?,
            isa::I32_LOAD8_S | isa::I32_LOAD8_U => self.visit_load(1, I32)?,
            isa::I32_LOAD16_S | isa::I32_LOAD16_U => self.visit_load(2, I32)?,
            isa::I64_LOAD8_S | isa::I64_LOAD8_U => self.visit_load(1, I64)?,
            isa::I64_LOAD16_S | isa::I64_LOAD16_U => self.visit_load(2, I64)?,
            isa::I64_LOAD32_S | isa::I64_LOAD32_U => self.visit_load(4, I64)?,
            isa::I32_STORE => self.visit_store(4, I32)?,
            isa::I64_STORE => self.visit_store(8, I64)?,
            isa::F32_STORE => self.visit_store(4, F32)?,
            isa::F64_STORE => self.visit_store(8, F64)?,
            isa::I32_STORE8 => self.visit_store(1, I32)?,
            isa::I32_STORE16 => self.visit_store(2, I32)?,
            isa::I64_STORE8 => self.visit_store(1, I64)?,
            isa::I64_STORE16 => self.visit_store(2, I64)?,
            isa::I64_STORE32 => self.visit_store(4, I64)?,

            isa::MEMORY_SIZE => {
                self.require_memory()?;
                if self.reader.read_u8()? != 0 {
                    return Err(Error::new(ErrorKind::ZeroByteExpected));
                }
                self.push_value(I32.into())?;
            }
            isa::MEMORY_GROW => {
                self.require_memory()?;
                if self.reader.read_u8()? != 0 {
                    return Err(Error::new(ErrorKind::ZeroByteExpected));
                }
                self.pop_value(I32.into())?;
                self.push_value(I32.into())?;
            }

            isa::I32_CONST => {
                self.reader.read_leb_s32()?;
                self.push_value(I32.into())?;
            }
            isa::I64_CONST => {
                self.reader.read_leb_s64()?;
                self.push_value(I64.into())?;
            }
            isa::F32_CONST => {
                self.reader.read_u32_le()?;
                self.push_value(F32.into())?;
            }
            isa::F64_CONST => {
                self.reader.read_u64_le()?;
                self.push_value(F64.into())?;
            }

            isa::I32_EQZ => self.visit_testop(I32)?,
            isa::I64_EQZ => self.visit_testop(I64)?,
            isa::I32_EQ..=isa::I32_GE_U => self.visit_relop(I32)?,
            isa::I64_EQ..=isa::I64_GE_U => self.visit_relop(I64)?,
            isa::F32_EQ..=isa::F32_GE => self.visit_relop(F32)?,
            isa::F64_EQ..=isa::F64_GE => self.visit_relop(F64)?,

            isa::I32_CLZ | isa::I32_CTZ | isa::I32_POPCNT => self.visit_unop(I32)?,
            isa::I64_CLZ | isa::I64_CTZ | isa::I64_POPCNT => self.visit_unop(I64)?,
            isa::I32_ADD..=isa::I32_ROTR => self.visit_binop(I32)?,
            isa::I64_ADD..=isa::I64_ROTR => self.visit_binop(I64)?,

            isa::F32_ABS..=isa::F32_SQRT => self.visit_unop(F32)?,
            isa::F32_ADD..=isa::F32_COPYSIGN => self.visit_binop(F32)?,
            isa::F64_ABS..=isa::F64_SQRT => self.visit_unop(F64)?,
            isa::F64_ADD..=isa::F64_COPYSIGN => self.visit_binop(F64)?,

            isa::I32_WRAP_I64 => self.visit_cvtop(I64, I32)?,
            isa::I32_TRUNC_S_F32 | isa::I32_TRUNC_U_F32 => self.visit_cvtop(F32, I32)?,
            isa::I32_TRUNC_S_F64 | isa::I32_TRUNC_U_F64 => self.visit_cvtop(F64, I32)?,
            isa::I64_EXTEND_S_I32 | isa::I64_EXTEND_U_I32 => self.visit_cvtop(I32, I64)?,
            isa::I64_TRUNC_S_F32 | isa::I64_TRUNC_U_F32 => self.visit_cvtop(F32, I64)?,
            isa::I64_TRUNC_S_F64 | isa::I64_TRUNC_U_F64 => self.visit_cvtop(F64, I64)?,
            isa::F32_CONVERT_S_I32 | isa::F32_CONVERT_U_I32 => self.visit_cvtop(I32, F32)?,
            isa::F32_CONVERT_S_I64 | isa::F32_CONVERT_U_I64 => self.visit_cvtop(I64, F32)?,
            isa::F32_DEMOTE_F64 => self.visit_cvtop(F64, F32)?,
            isa::F64_CONVERT_S_I32 | isa::F64_CONVERT_U_I32 => self.visit_cvtop(I32, F64)?,
            isa::F64_CONVERT_S_I64 | isa::F64_CONVERT_U_I64 => self.visit_cvtop(I64, F64)?,
            isa::F64_PROMOTE_F32 => self.visit_cvtop(F32, F64)?,
            isa::I32_REINTERPRET_F32 => self.visit_cvtop(F32, I32)?,
            isa::I64_REINTERPRET_F64 => self.visit_cvtop(F64, I64)?,
            isa::F32_REINTERPRET_I32 => self.visit_cvtop(I32, F32)?,
            isa::F64_REINTERPRET_I64 => self.visit_cvtop(I64, F64)?,

            isa::I32_EXTEND8_S | isa::I32_EXTEND16_S => self.visit_unop(I32)?,
            isa::I64_EXTEND8_S | isa::I64_EXTEND16_S | isa::I64_EXTEND32_S => {
                self.visit_unop(I64)?
            }

            other => {
                return Err(Error::with_extra(
                    ErrorKind::UnsupportedOpcode,
                    format!("(0x{:02x})", other),
                ));
            }
        }
        Ok(())
    }

    // ---- control structure ----

    fn read_block_type(&mut self) -> Result<BlockType, Error> {
        let raw = self.reader.read_leb_s33()?;
        if raw >= 0 {
            let type_idx = raw as u32;
            self.ctx.type_at(type_idx)?;
            return Ok(BlockType::Func(type_idx));
        }
        // Negative short form: the value-type byte sign-extended.
        match (raw & 0x7f) as u8 {
            isa::BLOCK_TYPE_EMPTY => Ok(BlockType::Empty),
            isa::VALUE_TYPE_I32 => Ok(BlockType::Value(ValueType::I32)),
            isa::VALUE_TYPE_I64 => Ok(BlockType::Value(ValueType::I64)),
            isa::VALUE_TYPE_F32 => Ok(BlockType::Value(ValueType::F32)),
            isa::VALUE_TYPE_F64 => Ok(BlockType::Value(ValueType::F64)),
            _ => Err(Error::new(ErrorKind::InvalidBlockType)),
        }
    }

    fn push_block(
        &mut self,
        label_kind: LabelKind,
        block_type: BlockType,
        start_pos: u32,
    ) -> Result<(), Error> {
        if self.blocks.len() >= MAX_FUNCTION_BLOCK_DEPTH {
            return Err(Error::with_extra(
                ErrorKind::TooManyItems,
                "(control blocks)".to_string(),
            ));
        }
        // The parameters are popped on entry and belong to the new block.
        let params = block_type.params(self.ctx);
        for param in params.iter().rev() {
            self.pop_value((*param).into())?;
        }
        self.blocks.push(ControlBlock {
            label_kind,
            block_type,
            start_pos,
            else_pos: None,
            init_stack_len: self.value_stack.len(),
            init_stack_bytes: self.cur_stack_bytes,
            polymorphic: false,
        });
        self.out.max_block_depth = self.out.max_block_depth.max(self.blocks.len() as u32);
        for param in params.iter() {
            self.push_value((*param).into())?;
        }
        Ok(())
    }

    fn visit_else(&mut self, op_pos: u32) -> Result<(), Error> {
        let top = self
            .blocks
            .last()
            .cloned()
            .expect("visit is only reached with a live block");
        if top.label_kind != LabelKind::If || top.else_pos.is_some() {
            return Err(Error::with_extra(
                ErrorKind::UnbalancedIfElse,
                "(misplaced else)".to_string(),
            ));
        }
        // The then-branch must have produced the block results.
        let results = top.block_type.results(self.ctx);
        for result in results.iter().rev() {
            self.pop_value((*result).into())?;
        }
        if self.value_stack.len() != top.init_stack_len {
            return Err(Error::with_extra(
                ErrorKind::TypeMismatch,
                format!(
                    "(unexpected stack height {}, expected {})",
                    self.value_stack.len(),
                    top.init_stack_len
                ),
            ));
        }
        self.cur_stack_bytes = top.init_stack_bytes;
        let top = self.blocks.last_mut().expect("checked above");
        top.else_pos = Some(op_pos);
        top.polymorphic = false;
        let params = {
            let block_type = top.block_type;
            block_type.params(self.ctx)
        };
        for param in params.iter() {
            self.push_value((*param).into())?;
        }
        Ok(())
    }

    fn visit_end(&mut self, op_pos: u32) -> Result<(), Error> {
        let top = self
            .blocks
            .last()
            .cloned()
            .expect("visit is only reached with a live block");
        let params = top.block_type.params(self.ctx);
        let results = top.block_type.results(self.ctx);

        // An `if` without an `else` falls through with its parameters; its
        // type must be balanced for both paths to agree.
        if top.label_kind == LabelKind::If
            && top.else_pos.is_none()
            && params.as_slice() != results.as_slice()
        {
            return Err(Error::new(ErrorKind::UnbalancedIfElse));
        }

        for result in results.iter().rev() {
            self.pop_value((*result).into())?;
        }
        if self.value_stack.len() != top.init_stack_len {
            return Err(Error::with_extra(
                ErrorKind::TypeMismatch,
                format!(
                    "(unexpected stack height {}, expected {})",
                    self.value_stack.len(),
                    top.init_stack_len
                ),
            ));
        }
        self.cur_stack_bytes = top.init_stack_bytes;

        if matches!(top.label_kind, LabelKind::Block | LabelKind::If) {
            self.out.block_bounds.insert(
                top.start_pos,
                BlockBounds {
                    else_off: top.else_pos.unwrap_or(BlockBounds::NO_ELSE),
                    end_off: op_pos,
                },
            );
        }

        self.blocks.pop();
        for result in results.iter() {
            self.push_value((*result).into())?;
        }
        Ok(())
    }

    fn visit_br_table(&mut self) -> Result<(), Error> {
        let count = self.reader.read_leb_u32()?;
        let mut targets = Vec::with_capacity(count as usize + 1);
        for _ in 0..count {
            targets.push(self.reader.read_leb_u32()?);
        }
        let default = self.reader.read_leb_u32()?;

        // All targets must agree on branch arity with the default,
        // compared by exact type-vector equality.
        let required = self.branch_arity(default)?;
        for target in &targets {
            let arity = self.branch_arity(*target)?;
            if arity.as_slice() != required.as_slice() {
                return Err(Error::new(ErrorKind::BrTableTargetTypeMismatch));
            }
        }

        self.pop_value(ValueType::I32.into())?;
        for ty in required.iter().rev() {
            self.pop_value((*ty).into())?;
        }
        self.make_polymorphic();
        Ok(())
    }

    /// The types a branch to `depth` must find on top of the stack: the
    /// target's params when it is a loop (back edge), its results otherwise.
    fn branch_arity(&self, depth: u32) -> Result<SmallVec<[ValueType; 8]>, Error> {
        let index = self
            .blocks
            .len()
            .checked_sub(1 + depth as usize)
            .ok_or_else(|| {
                Error::with_extra(ErrorKind::TypeMismatch, format!("(bad branch depth {})", depth))
            })?;
        let target = &self.blocks[index];
        Ok(if target.label_kind == LabelKind::Loop {
            target.block_type.params(self.ctx)
        } else {
            target.block_type.results(self.ctx).into_iter().collect()
        })
    }

    fn check_branch_arity(&mut self, depth: u32) -> Result<(), Error> {
        let arity = self.branch_arity(depth)?;
        for ty in arity.iter().rev() {
            self.pop_value((*ty).into())?;
        }
        for ty in arity.iter() {
            self.push_value((*ty).into())?;
        }
        Ok(())
    }

    // ---- operand helpers ----

    fn local_type(&mut self) -> Result<ValueType, Error> {
        let index = self.reader.read_leb_u32()?;
        self.locals
            .get(index as usize)
            .map(|slot| slot.ty)
            .ok_or_else(|| Error::with_extra(ErrorKind::UnknownLocal, format!("#{}", index)))
    }

    fn require_memory(&self) -> Result<(), Error> {
        if !self.ctx.has_memory {
            return Err(Error::new(ErrorKind::UnknownMemory));
        }
        Ok(())
    }

    fn visit_load(&mut self, width: u32, ty: ValueType) -> Result<(), Error> {
        self.require_memory()?;
        let align = self.reader.read_leb_u32()?;
        self.reader.read_leb_u32()?; // offset
        if 1u32.checked_shl(align).unwrap_or(u32::MAX) > width {
            return Err(Error::new(ErrorKind::InvalidAlignment));
        }
        self.pop_value(ValueType::I32.into())?;
        self.push_value(ty.into())
    }

    fn visit_store(&mut self, width: u32, ty: ValueType) -> Result<(), Error> {
        self.require_memory()?;
        let align = self.reader.read_leb_u32()?;
        self.reader.read_leb_u32()?; // offset
        if 1u32.checked_shl(align).unwrap_or(u32::MAX) > width {
            return Err(Error::new(ErrorKind::InvalidAlignment));
        }
        self.pop_value(ty.into())?;
        self.pop_value(ValueType::I32.into())?;
        Ok(())
    }

    fn visit_unop(&mut self, ty: ValueType) -> Result<(), Error> {
        self.pop_value(ty.into())?;
        self.push_value(ty.into())
    }

    fn visit_binop(&mut self, ty: ValueType) -> Result<(), Error> {
        self.pop_value(ty.into())?;
        self.pop_value(ty.into())?;
        self.push_value(ty.into())
    }

    fn visit_testop(&mut self, ty: ValueType) -> Result<(), Error> {
        self.pop_value(ty.into())?;
        self.push_value(ValueType::I32.into())
    }

    fn visit_relop(&mut self, ty: ValueType) -> Result<(), Error> {
        self.pop_value(ty.into())?;
        self.pop_value(ty.into())?;
        self.push_value(ValueType::I32.into())
    }

    fn visit_cvtop(&mut self, from: ValueType, to: ValueType) -> Result<(), Error> {
        self.pop_value(from.into())?;
        self.push_value(to.into())
    }

    // ---- stack primitives ----

    fn push_value(&mut self, ty: StackValueType) -> Result<(), Error> {
        self.push_raw(ty)
    }

    fn push_raw(&mut self, ty: StackValueType) -> Result<(), Error> {
        if self.value_stack.len() >= MAX_FUNCTION_OPERAND_STACK {
            return Err(Error::with_extra(
                ErrorKind::TooManyItems,
                "(operand stack)".to_string(),
            ));
        }
        self.value_stack.push(ty);
        self.cur_stack_bytes += ty.size();
        self.out.max_stack_size = self.out.max_stack_size.max(self.cur_stack_bytes);
        Ok(())
    }

    fn pop_value(&mut self, expected: StackValueType) -> Result<StackValueType, Error> {
        let top = self.blocks.last().expect("at least the function block");
        let at_floor = self.value_stack.len() == top.init_stack_len;
        let actual = if at_floor && top.polymorphic {
            StackValueType::Any
        } else {
            if self.value_stack.len() <= top.init_stack_len {
                return Err(Error::new(ErrorKind::OperandStackUnderflow));
            }
            let actual = self.value_stack.pop().expect("length checked above");
            self.cur_stack_bytes -= actual.size();
            actual
        };
        if actual == expected {
            Ok(actual)
        } else {
            Err(Error::with_extra(
                ErrorKind::TypeMismatch,
                format!("(expected {:?}, actual {:?})", expected, actual),
            ))
        }
    }

    fn tee_value(&mut self, expected: StackValueType) -> Result<(), Error> {
        self.pop_value(expected)?;
        self.push_value(expected)
    }

    fn make_polymorphic(&mut self) {
        let top = self.blocks.last_mut().expect("at least the function block");
        self.value_stack.truncate(top.init_stack_len);
        self.cur_stack_bytes = top.init_stack_bytes;
        top.polymorphic = true;
    }
}
