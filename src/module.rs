//! The immutable, loaded module.
//!
//! A [`Module`] is produced by the loader, is read-only afterwards and owns
//! its (rewritten) bytecode for its entire lifetime; instances borrow code
//! through their `Arc<Module>`, so code ranges can never dangle.

use crate::host::HostFn;
use crate::instance::InstanceLayout;
use crate::memory::MemoryBacking;
use crate::runtime::Runtime;
use crate::symbols::Symbol;
use crate::types::{FuncType, Limits};
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::Arc;
use wasmet_core::ValueType;

/// Kind of an importable/exportable entity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExternalKind {
    /// A function.
    Func,
    /// A table.
    Table,
    /// A linear memory.
    Memory,
    /// A global variable.
    Global,
}

impl ExternalKind {
    pub(crate) fn from_u8(byte: u8) -> Option<ExternalKind> {
        match byte {
            0 => Some(ExternalKind::Func),
            1 => Some(ExternalKind::Table),
            2 => Some(ExternalKind::Memory),
            3 => Some(ExternalKind::Global),
            _ => None,
        }
    }
}

/// A resolved function import.
pub(crate) struct ImportFunctionEntry {
    pub module: Symbol,
    pub field: Symbol,
    pub type_idx: u32,
    /// The resolved host function.
    pub func: HostFn,
}

/// An accepted global import (spectest builds only).
pub(crate) struct ImportGlobalEntry {
    #[allow(dead_code)]
    pub module: Symbol,
    #[allow(dead_code)]
    pub field: Symbol,
    pub ty: ValueType,
    pub mutable: bool,
    /// Byte offset into the instance's global-variable region.
    pub offset: u32,
    /// Initial value in untyped bits, resolved at load time.
    pub init_bits: u64,
}

/// An internal function: its name (when the Name section provides one) and
/// its declared type, both as written and canonicalised.
pub(crate) struct FuncEntry {
    pub name: Symbol,
    pub type_idx: u32,
    pub canonical_type_idx: u32,
}

pub(crate) struct TableEntry {
    pub limits: Limits,
}

pub(crate) struct MemoryEntry {
    pub limits: Limits,
}

/// A constant initialiser expression, reduced at load time to its value or
/// the imported global it forwards.
#[derive(Debug, Copy, Clone)]
pub(crate) enum InitExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GetGlobal(u32),
}

pub(crate) struct GlobalEntry {
    pub ty: ValueType,
    pub mutable: bool,
    pub init: InitExpr,
    /// Byte offset into the instance's global-variable region, assigned with
    /// natural alignment at load time.
    pub offset: u32,
}

pub(crate) struct ElemEntry {
    pub table_idx: u32,
    pub offset: InitExpr,
    pub func_idxs: Box<[u32]>,
}

pub(crate) struct DataEntry {
    pub mem_idx: u32,
    pub offset: InitExpr,
    /// Range of the segment's payload within the module bytes.
    pub bytes: Range<usize>,
}

/// Static layout of one parameter or local: its type and the cell offset of
/// its slot within the frame's local region.
#[derive(Debug, Copy, Clone)]
pub(crate) struct LocalSlot {
    pub ty: ValueType,
    pub cell_offset: u32,
}

/// Positions of a structured block's `else` and `end` opcodes, recorded by
/// the validator so the interpreter never scans for them.
#[derive(Debug, Copy, Clone)]
pub(crate) struct BlockBounds {
    /// Function-relative offset of the `else` opcode, or `u32::MAX`.
    pub else_off: u32,
    /// Function-relative offset of the `end` opcode.
    pub end_off: u32,
}

impl BlockBounds {
    pub const NO_ELSE: u32 = u32::MAX;
}

/// Everything the interpreter needs to run one internal function.
pub(crate) struct CodeEntry {
    /// The opcode stream (final `end` included) within the module bytes.
    pub code: Range<usize>,
    /// Parameters first, then locals, with their frame cell offsets.
    pub locals: Box<[LocalSlot]>,
    #[allow(dead_code)]
    pub num_params: u16,
    #[allow(dead_code)]
    pub num_locals: u16,
    /// Cells occupied by parameters plus locals.
    pub local_cells: u32,
    /// Worst-case operand stack, in bytes.
    pub max_stack_size: u32,
    /// Worst-case nesting of control blocks, the function block included.
    pub max_block_depth: u32,
    pub block_bounds: HashMap<u32, BlockBounds>,
    /// Direct callees, recorded for ahead-of-time compilers.
    #[allow(dead_code)]
    pub callees: Box<[u32]>,
}

/// A loaded, validated, immutable WebAssembly module.
pub struct Module {
    pub(crate) runtime: Arc<Runtime>,
    pub(crate) name: String,
    pub(crate) bytes: Vec<u8>,
    pub(crate) types: Box<[FuncType]>,
    pub(crate) import_functions: Box<[ImportFunctionEntry]>,
    pub(crate) import_globals: Box<[ImportGlobalEntry]>,
    pub(crate) functions: Box<[FuncEntry]>,
    pub(crate) tables: Box<[TableEntry]>,
    pub(crate) memories: Box<[MemoryEntry]>,
    pub(crate) globals: Box<[GlobalEntry]>,
    pub(crate) exports: BTreeMap<Box<str>, (ExternalKind, u32)>,
    pub(crate) elements: Box<[ElemEntry]>,
    pub(crate) code: Box<[CodeEntry]>,
    pub(crate) data: Box<[DataEntry]>,
    pub(crate) start_func: Option<u32>,
    pub(crate) gas_func_idx: Option<u32>,
    pub(crate) global_var_size: u32,
    pub(crate) layout: InstanceLayout,
    pub(crate) backing: Option<Arc<MemoryBacking>>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module").field("name", &self.name).finish()
    }
}

impl Module {
    /// The hint name given at load time.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of imported functions.
    pub fn num_import_functions(&self) -> u32 {
        self.import_functions.len() as u32
    }

    /// Number of functions defined by the module itself.
    pub fn num_internal_functions(&self) -> u32 {
        self.functions.len() as u32
    }

    /// Number of functions, imports included.
    pub fn num_total_functions(&self) -> u32 {
        self.num_import_functions() + self.num_internal_functions()
    }

    pub(crate) fn num_total_globals(&self) -> u32 {
        (self.import_globals.len() + self.globals.len()) as u32
    }

    /// The export table: name to `(kind, index)`.
    pub fn exports(&self) -> impl Iterator<Item = (&str, ExternalKind, u32)> {
        self.exports
            .iter()
            .map(|(name, (kind, index))| (&**name, *kind, *index))
    }

    /// Looks up an exported function by name.
    pub fn export_func(&self, name: &str) -> Option<u32> {
        match self.exports.get(name) {
            Some((ExternalKind::Func, index)) => Some(*index),
            _ => None,
        }
    }

    /// The function index designated as the gas function via the `func_gas`
    /// export, if any.
    pub fn gas_func_idx(&self) -> Option<u32> {
        self.gas_func_idx
    }

    /// The instance layout computed for this module.
    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    /// The declared type index of a function, imports first.
    pub(crate) fn func_type_idx(&self, func_idx: u32) -> u32 {
        let num_imports = self.num_import_functions();
        if func_idx < num_imports {
            self.import_functions[func_idx as usize].type_idx
        } else {
            self.functions[(func_idx - num_imports) as usize].type_idx
        }
    }

    /// The signature of a function, imports first.
    pub fn func_type(&self, func_idx: u32) -> &FuncType {
        &self.types[self.func_type_idx(func_idx) as usize]
    }

    pub(crate) fn code_entry(&self, internal_func_idx: u32) -> &CodeEntry {
        &self.code[internal_func_idx as usize]
    }

    pub(crate) fn code_bytes(&self, entry: &CodeEntry) -> &[u8] {
        &self.bytes[entry.code.clone()]
    }

    /// The name of a function from the Name section, if present.
    pub fn function_name(&self, func_idx: u32) -> Option<Arc<str>> {
        let num_imports = self.num_import_functions();
        let entry = self.functions.get(func_idx.checked_sub(num_imports)? as usize)?;
        if entry.name.is_null() {
            return None;
        }
        self.runtime.resolve_symbol(entry.name)
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // Give interned names back to the pool; reserved symbols are pinned
        // and unaffected.
        let mut symbols = Vec::new();
        for entry in self.import_functions.iter() {
            symbols.push(entry.module);
            symbols.push(entry.field);
        }
        for entry in self.import_globals.iter() {
            symbols.push(entry.module);
            symbols.push(entry.field);
        }
        for entry in self.functions.iter() {
            if !entry.name.is_null() {
                symbols.push(entry.name);
            }
        }
        self.runtime.release_symbols(&symbols);
    }
}
