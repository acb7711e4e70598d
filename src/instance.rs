//! Runtime instances: the mutable state a module is executed against.
//!
//! An instance owns its functions, globals, tables and memories, plus the
//! per-instance scalars (current trap, gas budget, exit code). Its shape is
//! fixed per module by an [`InstanceLayout`] computed once at load time;
//! the two offset-addressed regions of that layout are kept byte-accurate at
//! run time: the global-variable region is a real byte array addressed by
//! [`GlobalInstance::offset`], and table elements are a real `u32` array
//! using `0xffff_ffff` as the uninitialised-element sentinel.

use crate::host::HostFn;
use crate::memory::{self, MemoryRegion, MAX_MEMORY_PAGES};
use crate::module::{InitExpr, Module};
use crate::runner;
use crate::runtime::{Runtime, StatPhase};
use std::any::Any;
use std::sync::Arc;
use std::time::Instant;
use wasmet_core::{Error, ErrorKind, ErrorPhase, Value, ValueType};

/// The table-element value marking a slot no element segment initialised.
pub(crate) const UNINITIALIZED_ELEMENT: u32 = u32::MAX;

/// How a function is implemented.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum FuncKind {
    /// Validated Wasm bytecode run by the interpreter.
    ByteCode,
    /// A resolved host function.
    Native,
}

/// Per-function execution metadata, denormalised from the module so the
/// interpreter's hot path never chases type-table indirections.
#[derive(Debug, Copy, Clone)]
pub(crate) struct FunctionInstance {
    pub kind: FuncKind,
    pub type_idx: u32,
    pub canonical_type_idx: u32,
    pub param_cells: u16,
    pub ret_cells: u16,
    /// Cells of the frame's local region: parameters plus declared locals.
    pub total_local_cells: u32,
    /// Worst-case operand stack in bytes (bytecode functions).
    pub max_stack_size: u32,
    /// Worst-case control-stack depth (bytecode functions).
    pub max_block_depth: u32,
    /// Internal function index for bytecode, host-function slot for native.
    pub code_idx: u32,
}

#[derive(Debug, Copy, Clone)]
pub(crate) struct GlobalInstance {
    pub ty: ValueType,
    #[allow(dead_code)]
    pub mutable: bool,
    /// Byte offset into the instance's global-variable region.
    pub offset: u32,
}

#[derive(Debug)]
pub(crate) struct TableInstance {
    pub cur_size: u32,
    #[allow(dead_code)]
    pub max_size: u32,
    pub elements: Box<[u32]>,
}

/// One linear memory. An instance always carries at least one slot, even
/// when the module declares none, so the memory slot sits at a fixed layout
/// offset for ahead-of-time compiled code.
pub(crate) struct MemoryInstance {
    pub cur_pages: u32,
    pub max_pages: u32,
    pub mem_size: u64,
    region: Option<MemoryRegion>,
}

impl MemoryInstance {
    fn empty() -> MemoryInstance {
        MemoryInstance {
            cur_pages: 0,
            max_pages: 0,
            mem_size: 0,
            region: None,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.region.as_ref().map_or(&[], MemoryRegion::as_slice)
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.region
            .as_mut()
            .map_or(&mut [], MemoryRegion::as_slice_mut)
    }
}

/// Byte offsets and sizes of every region an instance consists of.
///
/// Computed once per module; every offset is 8-byte aligned. The interpreter
/// itself addresses typed storage, but the layout is the sizing contract for
/// instance allocation and the region map a JIT back-end would bake into
/// generated code.
#[derive(Debug, Clone)]
pub struct InstanceLayout {
    /// Offset of the function-instance array.
    pub functions_offset: usize,
    /// Offset of the global-instance array.
    pub globals_offset: usize,
    /// Offset of the global-variable byte region.
    pub global_var_offset: usize,
    /// Size of the global-variable byte region.
    pub global_var_size: usize,
    /// Offset of the table-instance array.
    pub tables_offset: usize,
    /// Offset of the table-element `u32` region.
    pub table_elems_offset: usize,
    /// Offset of the memory-instance array (at least one slot).
    pub memories_offset: usize,
    /// Offset of the `gas_left` scalar.
    pub gas_offset: usize,
    /// Offset of the current-error slot.
    pub error_offset: usize,
    /// Offset of the exit-code scalar.
    pub exit_code_offset: usize,
    /// Total size of the instance allocation.
    pub total_size: usize,
}

impl InstanceLayout {
    /// Required alignment of every region offset.
    pub const ALIGNMENT: usize = 8;

    fn align(offset: usize) -> usize {
        (offset + Self::ALIGNMENT - 1) & !(Self::ALIGNMENT - 1)
    }

    /// Computes the layout from the module's counts.
    pub(crate) fn compute(
        num_functions: usize,
        num_globals: usize,
        global_var_size: usize,
        num_tables: usize,
        total_table_elems: usize,
        num_memories: usize,
    ) -> InstanceLayout {
        use core::mem::size_of;

        let mut offset = Self::align(size_of::<Instance>());
        let functions_offset = offset;
        offset = Self::align(offset + num_functions * size_of::<FunctionInstance>());
        let globals_offset = offset;
        offset = Self::align(offset + num_globals * size_of::<GlobalInstance>());
        let global_var_offset = offset;
        offset = Self::align(offset + global_var_size);
        let tables_offset = offset;
        offset = Self::align(offset + num_tables * size_of::<TableInstance>());
        let table_elems_offset = offset;
        offset = Self::align(offset + total_table_elems * size_of::<u32>());
        let memories_offset = offset;
        offset = Self::align(offset + num_memories.max(1) * size_of::<MemoryInstance>());
        let gas_offset = offset;
        offset = Self::align(offset + size_of::<u64>());
        let error_offset = offset;
        offset = Self::align(offset + size_of::<Option<Error>>());
        let exit_code_offset = offset;
        offset = Self::align(offset + size_of::<i64>());

        InstanceLayout {
            functions_offset,
            globals_offset,
            global_var_offset,
            global_var_size,
            tables_offset,
            table_elems_offset,
            memories_offset,
            gas_offset,
            error_offset,
            exit_code_offset,
            total_size: offset,
        }
    }
}

/// A runnable instantiation of a module.
///
/// Not thread-safe: at most one thread may execute against an instance at a
/// time. Instances are owned by an [`Isolation`][`crate::Isolation`].
pub struct Instance {
    runtime: Arc<Runtime>,
    module: Arc<Module>,
    pub(crate) functions: Box<[FunctionInstance]>,
    pub(crate) globals: Box<[GlobalInstance]>,
    pub(crate) global_data: Box<[u8]>,
    pub(crate) tables: Box<[TableInstance]>,
    pub(crate) memories: Vec<MemoryInstance>,
    pub(crate) host_funcs: Box<[HostFn]>,
    error: Option<Error>,
    gas_left: u64,
    exit_code: i32,
    custom_data: Option<Box<dyn Any>>,
    /// Interpreter stack accounting, charged by the runner per frame.
    pub(crate) stack_used: usize,
    pub(crate) stack_capacity: usize,
    pub(crate) max_call_depth: usize,
}

impl Instance {
    /// Instantiates `module`: resolves functions, initialises globals,
    /// tables and memory from their segments, then runs the start function.
    pub(crate) fn instantiate(
        runtime: &Arc<Runtime>,
        module: &Arc<Module>,
        gas_limit: u64,
    ) -> Result<Box<Instance>, Error> {
        let started = Instant::now();
        let config = runtime.config();

        // Functions: imports resolve to their host entry points, internal
        // functions to their validated code entries.
        let num_imports = module.num_import_functions();
        let total_funcs = module.num_total_functions() as usize;
        let mut functions = Vec::with_capacity(total_funcs);
        let mut host_funcs = Vec::with_capacity(num_imports as usize);
        for (slot, import) in module.import_functions.iter().enumerate() {
            let func_type = &module.types[import.type_idx as usize];
            functions.push(FunctionInstance {
                kind: FuncKind::Native,
                type_idx: import.type_idx,
                canonical_type_idx: func_type.canonical_idx(),
                param_cells: func_type.param_cells() as u16,
                ret_cells: func_type.return_cells() as u16,
                total_local_cells: func_type.param_cells(),
                max_stack_size: 0,
                max_block_depth: 0,
                code_idx: slot as u32,
            });
            host_funcs.push(import.func);
        }
        for (internal_idx, entry) in module.functions.iter().enumerate() {
            let func_type = &module.types[entry.type_idx as usize];
            let code = module.code_entry(internal_idx as u32);
            functions.push(FunctionInstance {
                kind: FuncKind::ByteCode,
                type_idx: entry.type_idx,
                canonical_type_idx: entry.canonical_type_idx,
                param_cells: func_type.param_cells() as u16,
                ret_cells: func_type.return_cells() as u16,
                total_local_cells: code.local_cells,
                max_stack_size: code.max_stack_size,
                max_block_depth: code.max_block_depth,
                code_idx: internal_idx as u32,
            });
        }

        // Globals: import descriptors first, then internal globals. The
        // variable region starts out zeroed; init-expressions overwrite it.
        let mut globals = Vec::with_capacity(module.num_total_globals() as usize);
        let mut global_data = vec![0u8; module.global_var_size as usize].into_boxed_slice();
        for import in module.import_globals.iter() {
            globals.push(GlobalInstance {
                ty: import.ty,
                mutable: import.mutable,
                offset: import.offset,
            });
            write_global_bits(&mut global_data, import.offset, import.ty, import.init_bits);
        }
        for entry in module.globals.iter() {
            globals.push(GlobalInstance {
                ty: entry.ty,
                mutable: entry.mutable,
                offset: entry.offset,
            });
            let bits = eval_init_expr(&entry.init, module, &global_data);
            write_global_bits(&mut global_data, entry.offset, entry.ty, bits);
        }

        // Tables: every element starts out uninitialised, then element
        // segments are bounds-checked and copied.
        let mut tables = Vec::with_capacity(module.tables.len());
        for entry in module.tables.iter() {
            let cur_size = entry.limits.initial();
            tables.push(TableInstance {
                cur_size,
                max_size: entry.limits.maximum().unwrap_or(cur_size),
                elements: vec![UNINITIALIZED_ELEMENT; cur_size as usize].into_boxed_slice(),
            });
        }
        for segment in module.elements.iter() {
            let table = &mut tables[segment.table_idx as usize];
            let offset = eval_init_expr(&segment.offset, module, &global_data) as u32;
            let end = offset as u64 + segment.func_idxs.len() as u64;
            if end > table.cur_size as u64 {
                return Err(Error::new(ErrorKind::ElemSegmentDoesNotFit));
            }
            table.elements[offset as usize..end as usize].copy_from_slice(&segment.func_idxs);
        }

        // Memory: at most one in the MVP. Its maximum is clamped by the
        // runtime-wide cap before allocation.
        let mut memories = Vec::with_capacity(module.memories.len().max(1));
        for entry in module.memories.iter() {
            let cur_pages = entry.limits.initial();
            let mut max_pages = entry.limits.maximum().unwrap_or(MAX_MEMORY_PAGES);
            if let Some(cap) = config.vm_max_memory_pages {
                if max_pages > cap {
                    tracing::warn!(max_pages, cap, "memory maximum clamped by vm limit");
                    max_pages = cap;
                }
            }
            if cur_pages > max_pages {
                return Err(Error::new(ErrorKind::MemorySizeTooLarge));
            }
            let mem_size = memory::pages_to_bytes(cur_pages);
            let want_mmap =
                !config.disable_wasm_memory_map && memory::virtual_memory_supported();
            let region = memory::alloc_init(mem_size as usize, want_mmap, module.backing.as_ref())
                .map_err(|err| err.with_phase(ErrorPhase::Instantiation))?;
            let seeded = region.has_backing_image() && module.backing.is_some();
            memories.push(MemoryInstance {
                cur_pages,
                max_pages,
                mem_size,
                region: Some(region),
            });
            let memory = memories.last_mut().expect("just pushed");
            // When the allocator pre-seeded the data image, every segment is
            // a load-time-verified constant copy; skip the byte moves.
            if !seeded {
                for segment in module.data.iter() {
                    let offset = eval_init_expr(&segment.offset, module, &global_data) as u32;
                    let len = segment.bytes.len();
                    if offset as u64 + len as u64 > memory.mem_size {
                        return Err(Error::new(ErrorKind::DataSegmentDoesNotFit));
                    }
                    memory.bytes_mut()[offset as usize..offset as usize + len]
                        .copy_from_slice(&module.bytes[segment.bytes.clone()]);
                }
            }
        }
        if memories.is_empty() {
            memories.push(MemoryInstance::empty());
        }

        let mut instance = Box::new(Instance {
            runtime: runtime.clone(),
            module: module.clone(),
            functions: functions.into_boxed_slice(),
            globals: globals.into_boxed_slice(),
            global_data,
            tables: tables.into_boxed_slice(),
            memories,
            host_funcs: host_funcs.into_boxed_slice(),
            error: None,
            gas_left: gas_limit,
            exit_code: 0,
            custom_data: None,
            stack_used: 0,
            stack_capacity: config.interp_stack_size,
            max_call_depth: config.max_call_depth,
        });

        runtime.record_phase(StatPhase::Instantiate, started.elapsed());

        if let Some(start_idx) = module.start_func {
            runner::call_wasm_function(&mut instance, start_idx, &[])?;
        }

        Ok(instance)
    }

    /// The module this instance was created from.
    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }

    /// The runtime this instance belongs to.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Calls an exported function by name.
    ///
    /// Arguments are checked against the signature before the interpreter is
    /// entered; on a trap the instance's error is set and the same error is
    /// returned.
    pub fn call_function(&mut self, name: &str, args: &[Value]) -> Result<Vec<Value>, Error> {
        let func_idx = self
            .module
            .export_func(name)
            .ok_or_else(|| Error::with_extra(ErrorKind::FunctionNotFound, name.to_string()))?;
        self.call_function_by_index(func_idx, args)
    }

    /// Calls a function by its index in the module's function index space.
    pub fn call_function_by_index(
        &mut self,
        func_idx: u32,
        args: &[Value],
    ) -> Result<Vec<Value>, Error> {
        if func_idx >= self.module.num_total_functions() {
            return Err(Error::with_extra(
                ErrorKind::FunctionNotFound,
                format!("#{}", func_idx),
            ));
        }
        let func_type = self.module.func_type(func_idx);
        if args.len() != func_type.params().len() {
            return Err(Error::with_extra(
                ErrorKind::ArgumentCountMismatch,
                format!("(expected {}, actual {})", func_type.params().len(), args.len()),
            ));
        }
        for (index, (arg, expected)) in args.iter().zip(func_type.params()).enumerate() {
            if arg.value_type() != *expected {
                return Err(Error::with_extra(
                    ErrorKind::ArgumentTypeMismatch,
                    format!(
                        "(param index: {}, expected {}, actual {})",
                        index,
                        expected,
                        arg.value_type()
                    ),
                ));
            }
        }
        let started = Instant::now();
        let result = runner::call_wasm_function(self, func_idx, args);
        self.runtime
            .record_phase(StatPhase::Execute, started.elapsed());
        result
    }

    /// The current trap, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Clears the current trap.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub(crate) fn set_error(&mut self, error: Error) {
        self.error = Some(error);
    }

    /// Remaining gas.
    pub fn gas_left(&self) -> u64 {
        self.gas_left
    }

    /// Replaces the gas budget.
    pub fn set_gas_left(&mut self, gas: u64) {
        self.gas_left = gas;
    }

    /// Deducts `delta` from the gas budget.
    ///
    /// On underflow the counter saturates at zero and the
    /// [`ErrorKind::GasLimitExceeded`] trap is returned; host functions
    /// propagate it to unwind the interpreter.
    pub fn charge_gas(&mut self, delta: u64) -> Result<(), Error> {
        if self.gas_left < delta {
            self.gas_left = 0;
            return Err(Error::new(ErrorKind::GasLimitExceeded));
        }
        self.gas_left -= delta;
        Ok(())
    }

    /// Requests termination with `code`, as called by host functions.
    ///
    /// Stores the exit code and returns the [`ErrorKind::InstanceExit`] trap
    /// the host function should propagate.
    pub fn exit(&mut self, code: i32) -> Error {
        self.exit_code = code;
        Error::with_extra(ErrorKind::InstanceExit, format!("({})", code))
    }

    /// The code passed to [`Instance::exit`].
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Embedder-attached data.
    pub fn custom_data(&self) -> Option<&(dyn Any)> {
        self.custom_data.as_deref()
    }

    /// Mutable embedder-attached data.
    pub fn custom_data_mut(&mut self) -> Option<&mut (dyn Any + 'static)> {
        self.custom_data.as_deref_mut()
    }

    /// Attaches embedder data, replacing any previous value.
    pub fn set_custom_data(&mut self, data: Box<dyn Any>) {
        self.custom_data = Some(data);
    }

    /// The bytes of the default linear memory.
    pub fn memory_bytes(&self) -> &[u8] {
        self.memories[0].bytes()
    }

    /// The bytes of the default linear memory, mutably.
    pub fn memory_bytes_mut(&mut self) -> &mut [u8] {
        self.memories[0].bytes_mut()
    }

    /// Current size of the default memory in pages.
    pub fn memory_pages(&self) -> u32 {
        self.memories[0].cur_pages
    }

    /// Grows memory `mem_idx` by `delta` pages; returns the previous page
    /// count, or `None` when the limit or the allocator says no.
    pub(crate) fn grow_memory(&mut self, mem_idx: u32, delta: u32) -> Option<u32> {
        let memory = &mut self.memories[mem_idx as usize];
        let old_pages = memory.cur_pages;
        if delta == 0 {
            return Some(old_pages);
        }
        let new_pages = old_pages.checked_add(delta)?;
        if new_pages > memory.max_pages {
            return None;
        }
        let new_size = memory::pages_to_bytes(new_pages);
        let region = memory.region.as_mut()?;
        if memory::enlarge(region, new_size as usize).is_err() {
            return None;
        }
        memory.cur_pages = new_pages;
        memory.mem_size = new_size;
        Some(old_pages)
    }

    pub(crate) fn read_global_bits(&self, global_idx: u32) -> u64 {
        let global = &self.globals[global_idx as usize];
        read_global_bits(&self.global_data, global.offset, global.ty)
    }

    pub(crate) fn write_global_bits(&mut self, global_idx: u32, bits: u64) {
        let global = self.globals[global_idx as usize];
        write_global_bits(&mut self.global_data, global.offset, global.ty, bits);
    }

    /// Reads a typed global value, e.g. for embedder inspection.
    pub fn global_value(&self, global_idx: u32) -> Option<Value> {
        let global = self.globals.get(global_idx as usize)?;
        let bits = read_global_bits(&self.global_data, global.offset, global.ty);
        Some(Value::from_bits(global.ty, bits))
    }
}

fn write_global_bits(data: &mut [u8], offset: u32, ty: ValueType, bits: u64) {
    let offset = offset as usize;
    if ty.is_64bit() {
        data[offset..offset + 8].copy_from_slice(&bits.to_le_bytes());
    } else {
        data[offset..offset + 4].copy_from_slice(&(bits as u32).to_le_bytes());
    }
}

fn read_global_bits(data: &[u8], offset: u32, ty: ValueType) -> u64 {
    let offset = offset as usize;
    if ty.is_64bit() {
        u64::from_le_bytes(data[offset..offset + 8].try_into().expect("8 bytes"))
    } else {
        u32::from_le_bytes(data[offset..offset + 4].try_into().expect("4 bytes")) as u64
    }
}

/// Evaluates a load-time init-expression to untyped bits. `get_global` only
/// ever references an earlier imported global, which validation guarantees.
fn eval_init_expr(init: &InitExpr, module: &Module, global_data: &[u8]) -> u64 {
    match *init {
        InitExpr::I32(v) => v as u32 as u64,
        InitExpr::I64(v) => v as u64,
        InitExpr::F32(bits) => bits as u64,
        InitExpr::F64(bits) => bits,
        InitExpr::GetGlobal(idx) => {
            let import = &module.import_globals[idx as usize];
            read_global_bits(global_data, import.offset, import.ty)
        }
    }
}
