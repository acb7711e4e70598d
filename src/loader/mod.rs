//! The binary module loader.
//!
//! Walks the sections of a Wasm 1.0 binary in id order, builds the module's
//! metadata tables, resolves imports against the runtime's host-module
//! registry, runs the function validator over every code entry and finally
//! computes the instance layout. Nothing observable is constructed on
//! failure; interned names are given back to the symbol pool.

pub(crate) mod reader;

use crate::instance::InstanceLayout;
use crate::memory::{self, MemoryBacking};
use crate::module::{
    CodeEntry, DataEntry, ElemEntry, ExternalKind, FuncEntry, GlobalEntry, ImportFunctionEntry,
    ImportGlobalEntry, InitExpr, LocalSlot, MemoryEntry, Module, TableEntry,
};
use crate::runtime::Runtime;
use crate::symbols::Symbol;
use crate::types::{FuncType, Limits};
use crate::validation::{self, ModuleContext};
use crate::isa;
use self::reader::Reader;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use wasmet_core::{Error, ErrorKind, ValueType};

// Preset limits, uniformly enforced while loading.
pub(crate) const PRESET_MAX_MODULE_SIZE: usize = 1 << 30; // 1 GiB
pub(crate) const PRESET_MAX_SECTION_SIZE: usize = 512 << 20; // 512 MiB
pub(crate) const PRESET_MAX_NUM_TYPES: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_IMPORTS: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_FUNCTIONS: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_GLOBALS: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_EXPORTS: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_ELEM_SEGMENTS: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_DATA_SEGMENTS: usize = 1 << 20;
pub(crate) const PRESET_MAX_NUM_PARAMS: usize = u16::MAX as usize;
pub(crate) const PRESET_MAX_NUM_RETURNS: usize = 1;
pub(crate) const PRESET_MAX_FUNCTION_LOCALS: u64 = u16::MAX as u64;
pub(crate) const PRESET_MAX_TABLE_SIZE: u32 = 1 << 20;
pub(crate) const PRESET_MAX_MEMORY_PAGES: u32 = 1 << 16;
pub(crate) const PRESET_MAX_FUNCTION_SIZE: usize = 16 << 20; // 16 MiB
pub(crate) const PRESET_MAX_DATA_SEGMENT_SIZE: usize = 128 << 20;
pub(crate) const PRESET_MAX_TOTAL_DATA_SIZE: u64 = 1 << 30; // 1 GiB

/// Static limits of the function validator's own stacks.
pub(crate) const MAX_FUNCTION_OPERAND_STACK: usize = 16384;
pub(crate) const MAX_FUNCTION_BLOCK_DEPTH: usize = 16384;

const WASM_MAGIC: u32 = 0x6d73_6100;
const WASM_VERSION: u32 = 1;

const SEC_CUSTOM: u8 = 0;
const SEC_TYPE: u8 = 1;
const SEC_IMPORT: u8 = 2;
const SEC_FUNCTION: u8 = 3;
const SEC_TABLE: u8 = 4;
const SEC_MEMORY: u8 = 5;
const SEC_GLOBAL: u8 = 6;
const SEC_EXPORT: u8 = 7;
const SEC_START: u8 = 8;
const SEC_ELEMENT: u8 = 9;
const SEC_CODE: u8 = 10;
const SEC_DATA: u8 = 11;
const SEC_DATACOUNT: u8 = 12;

/// The "usual" section ordering: ascending ids, except that the data-count
/// section slots in between element and code.
fn section_order(id: u8) -> u8 {
    match id {
        SEC_DATACOUNT => 10,
        SEC_CODE => 11,
        SEC_DATA => 12,
        other => other,
    }
}

/// Releases interned symbols when a load fails part-way.
struct SymbolGuard<'rt> {
    runtime: &'rt Arc<Runtime>,
    symbols: Vec<Symbol>,
    armed: bool,
}

impl<'rt> SymbolGuard<'rt> {
    fn new(runtime: &'rt Arc<Runtime>) -> SymbolGuard<'rt> {
        SymbolGuard {
            runtime,
            symbols: Vec::new(),
            armed: true,
        }
    }

    fn intern(&mut self, name: &str) -> Result<Symbol, Error> {
        let sym = self.runtime.intern_symbol(name)?;
        self.symbols.push(sym);
        Ok(sym)
    }

    fn defuse(&mut self) {
        self.armed = false;
    }
}

impl Drop for SymbolGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.runtime.release_symbols(&self.symbols);
        }
    }
}

struct ModuleLoader<'rt, 'b> {
    runtime: &'rt Arc<Runtime>,
    buf: &'b [u8],
    symbols: SymbolGuard<'rt>,
    patches: Vec<(usize, u8)>,

    types: Vec<FuncType>,
    import_functions: Vec<ImportFunctionEntry>,
    import_globals: Vec<ImportGlobalEntry>,
    functions: Vec<FuncEntry>,
    tables: Vec<TableEntry>,
    memories: Vec<MemoryEntry>,
    globals: Vec<GlobalEntry>,
    exports: BTreeMap<Box<str>, (ExternalKind, u32)>,
    elements: Vec<ElemEntry>,
    code: Vec<CodeEntry>,
    data: Vec<DataEntry>,
    start_func: Option<u32>,
    data_count: Option<u32>,
    gas_func_idx: Option<u32>,
    global_var_size: u32,
    name_section_seen: bool,
}

/// Loads a module from `bytes`, consuming and freezing the buffer.
pub(crate) fn load(
    runtime: &Arc<Runtime>,
    mut bytes: Vec<u8>,
    hint_name: &str,
) -> Result<Module, Error> {
    if bytes.len() > PRESET_MAX_MODULE_SIZE {
        return Err(Error::new(ErrorKind::ModuleSizeTooLarge));
    }

    let mut loader = ModuleLoader {
        runtime,
        buf: &bytes,
        symbols: SymbolGuard::new(runtime),
        patches: Vec::new(),
        types: Vec::new(),
        import_functions: Vec::new(),
        import_globals: Vec::new(),
        functions: Vec::new(),
        tables: Vec::new(),
        memories: Vec::new(),
        globals: Vec::new(),
        exports: BTreeMap::new(),
        elements: Vec::new(),
        code: Vec::new(),
        data: Vec::new(),
        start_func: None,
        data_count: None,
        gas_func_idx: None,
        global_var_size: 0,
        name_section_seen: false,
    };
    loader.parse()?;

    let ModuleLoader {
        mut symbols,
        patches,
        types,
        import_functions,
        import_globals,
        functions,
        tables,
        memories,
        globals,
        exports,
        elements,
        code,
        data,
        start_func,
        gas_func_idx,
        global_var_size,
        ..
    } = loader;

    // The validator's write-back: the only mutation the buffer ever sees.
    for (offset, opcode) in patches {
        bytes[offset] = opcode;
    }

    let backing = build_backing(runtime, &bytes, &memories, &data)?;

    let total_table_elems: usize = tables
        .iter()
        .map(|t| t.limits.initial() as usize)
        .sum();
    let layout = InstanceLayout::compute(
        (import_functions.len() + functions.len()) as usize,
        import_globals.len() + globals.len(),
        global_var_size as usize,
        tables.len(),
        total_table_elems,
        memories.len(),
    );

    symbols.defuse();
    Ok(Module {
        runtime: runtime.clone(),
        name: hint_name.to_string(),
        bytes,
        types: types.into_boxed_slice(),
        import_functions: import_functions.into_boxed_slice(),
        import_globals: import_globals.into_boxed_slice(),
        functions: functions.into_boxed_slice(),
        tables: tables.into_boxed_slice(),
        memories: memories.into_boxed_slice(),
        globals: globals.into_boxed_slice(),
        exports,
        elements: elements.into_boxed_slice(),
        code: code.into_boxed_slice(),
        data: data.into_boxed_slice(),
        start_func,
        gas_func_idx,
        global_var_size,
        layout,
        backing,
    })
}

/// Builds the shared data image when every segment is a constant copy into
/// the initial memory; see [`crate::memory`].
fn build_backing(
    runtime: &Arc<Runtime>,
    bytes: &[u8],
    memories: &[MemoryEntry],
    data: &[DataEntry],
) -> Result<Option<Arc<MemoryBacking>>, Error> {
    if !memory::virtual_memory_supported() || runtime.config().disable_wasm_memory_map {
        return Ok(None);
    }
    let Some(memory_entry) = memories.first() else {
        return Ok(None);
    };
    if data.is_empty() {
        return Ok(None);
    }
    let initial_size = memory::pages_to_bytes(memory_entry.limits.initial());
    let mut image_len = 0u64;
    for segment in data {
        let InitExpr::I32(offset) = segment.offset else {
            return Ok(None);
        };
        let end = offset as u32 as u64 + segment.bytes.len() as u64;
        if end > initial_size {
            return Ok(None);
        }
        image_len = image_len.max(end);
    }
    let mut image = vec![0u8; image_len as usize];
    for segment in data {
        let InitExpr::I32(offset) = segment.offset else {
            unreachable!("checked above")
        };
        let offset = offset as u32 as usize;
        image[offset..offset + segment.bytes.len()].copy_from_slice(&bytes[segment.bytes.clone()]);
    }
    Ok(Some(Arc::new(MemoryBacking::new(&image)?)))
}

impl<'rt, 'b> ModuleLoader<'rt, 'b> {
    fn parse(&mut self) -> Result<(), Error> {
        let mut reader = Reader::new(self.buf);
        if reader.read_u32_le().map_err(|_| ErrorKind::MagicNotDetected)? != WASM_MAGIC {
            return Err(Error::new(ErrorKind::MagicNotDetected));
        }
        if reader.read_u32_le().map_err(|_| ErrorKind::VersionNotSupported)? != WASM_VERSION {
            return Err(Error::new(ErrorKind::VersionNotSupported));
        }

        let mut last_order: i32 = -1;
        while !reader.is_at_end() {
            let id = reader.read_u8()?;
            let size = reader.read_leb_u32()? as usize;
            if size > PRESET_MAX_SECTION_SIZE {
                return Err(Error::new(ErrorKind::SectionSizeTooLarge));
            }
            let section_base = reader.pos();
            let mut section = reader.sub_reader(size)?;

            if id == SEC_CUSTOM {
                self.parse_custom_section(&mut section)?;
                continue;
            }
            if id > SEC_DATACOUNT {
                return Err(Error::with_extra(
                    ErrorKind::JunkAfterLastSection,
                    format!("(invalid section id {})", id),
                ));
            }
            let order = section_order(id) as i32;
            if order == last_order {
                return Err(Error::new(ErrorKind::DuplicateSection));
            }
            if order < last_order {
                return Err(Error::new(ErrorKind::SectionOutOfOrder));
            }
            last_order = order;

            tracing::debug!(section = id, size, "parsing section");
            match id {
                SEC_TYPE => self.parse_type_section(&mut section)?,
                SEC_IMPORT => self.parse_import_section(&mut section)?,
                SEC_FUNCTION => self.parse_function_section(&mut section)?,
                SEC_TABLE => self.parse_table_section(&mut section)?,
                SEC_MEMORY => self.parse_memory_section(&mut section)?,
                SEC_GLOBAL => self.parse_global_section(&mut section)?,
                SEC_EXPORT => self.parse_export_section(&mut section)?,
                SEC_START => self.parse_start_section(&mut section)?,
                SEC_ELEMENT => self.parse_element_section(&mut section)?,
                SEC_DATACOUNT => self.data_count = Some(section.read_leb_u32()?),
                SEC_CODE => self.parse_code_section(&mut section, section_base)?,
                SEC_DATA => self.parse_data_section(&mut section, section_base)?,
                _ => unreachable!("id range checked above"),
            }
            if !section.is_at_end() {
                return Err(Error::with_extra(
                    ErrorKind::SectionSizeMismatch,
                    format!("(section {})", id),
                ));
            }
        }

        if self.functions.len() != self.code.len() {
            return Err(Error::new(ErrorKind::CodeCountMismatch));
        }
        if let Some(count) = self.data_count {
            if count as usize != self.data.len() {
                return Err(Error::new(ErrorKind::DataCountMismatch));
            }
        }
        Ok(())
    }

    // ---- individual sections ----

    fn parse_type_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count > PRESET_MAX_NUM_TYPES {
            return Err(Error::new(ErrorKind::TooManyTypes));
        }
        let mut canonical: HashMap<(Vec<ValueType>, Option<ValueType>), u32> = HashMap::new();
        for index in 0..count {
            if sec.read_u8()? != isa::FUNC_TYPE_FORM {
                return Err(Error::new(ErrorKind::InvalidTypeForm));
            }
            let num_params = sec.read_leb_u32()? as usize;
            if num_params > PRESET_MAX_NUM_PARAMS {
                return Err(Error::new(ErrorKind::TooManyParams));
            }
            let mut params = Vec::with_capacity(num_params);
            for _ in 0..num_params {
                params.push(read_value_type(sec)?);
            }
            let num_returns = sec.read_leb_u32()? as usize;
            if num_returns > PRESET_MAX_NUM_RETURNS {
                return Err(Error::new(ErrorKind::TooManyReturns));
            }
            let return_type = if num_returns == 1 {
                Some(read_value_type(sec)?)
            } else {
                None
            };
            let canonical_idx = *canonical
                .entry((params.clone(), return_type))
                .or_insert(index as u32);
            let mut ty = FuncType::new(params, return_type);
            ty.set_canonical_idx(canonical_idx);
            self.types.push(ty);
        }
        Ok(())
    }

    fn parse_import_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count > PRESET_MAX_NUM_IMPORTS {
            return Err(Error::new(ErrorKind::TooManyImports));
        }
        for _ in 0..count {
            let module_name = sec.read_name()?;
            let field_name = sec.read_name()?;
            let kind = sec.read_u8()?;
            match kind {
                0 => {
                    let type_idx = sec.read_leb_u32()?;
                    let func_type = self
                        .types
                        .get(type_idx as usize)
                        .ok_or_else(|| {
                            Error::with_extra(ErrorKind::UnknownType, format!("#{}", type_idx))
                        })?
                        .clone();
                    if self.import_functions.len() >= PRESET_MAX_NUM_FUNCTIONS {
                        return Err(Error::new(ErrorKind::TooManyFunctions));
                    }
                    let entry = self.resolve_function_import(
                        module_name,
                        field_name,
                        type_idx,
                        &func_type,
                    )?;
                    self.import_functions.push(entry);
                }
                3 => self.parse_global_import(sec, module_name, field_name)?,
                1 | 2 => {
                    return Err(Error::with_extra(
                        ErrorKind::UnsupportedImport,
                        format!("({}.{})", module_name, field_name),
                    ));
                }
                _ => return Err(Error::new(ErrorKind::InvalidImportKind)),
            }
        }
        Ok(())
    }

    fn resolve_function_import(
        &mut self,
        module_name: &str,
        field_name: &str,
        type_idx: u32,
        func_type: &FuncType,
    ) -> Result<ImportFunctionEntry, Error> {
        let module_sym = self.symbols.intern(module_name)?;
        let field_sym = self.symbols.intern(field_name)?;
        let resolved = self
            .runtime
            .lookup_host_func(module_sym, field_sym)
            .ok_or_else(|| {
                Error::with_extra(
                    ErrorKind::UnknownImport,
                    format!("({}.{})", module_name, field_name),
                )
            })?;
        if resolved.ret != func_type.return_type() {
            return Err(Error::with_extra(
                ErrorKind::IncompatibleImportType,
                format!(
                    "return type mismatch for {}.{} (expected {:?}, actual {:?})",
                    module_name,
                    field_name,
                    func_type.return_type(),
                    resolved.ret
                ),
            ));
        }
        if resolved.params.len() != func_type.params().len() {
            return Err(Error::with_extra(
                ErrorKind::IncompatibleImportType,
                format!(
                    "param count mismatch for {}.{} (expected {}, actual {})",
                    module_name,
                    field_name,
                    func_type.params().len(),
                    resolved.params.len()
                ),
            ));
        }
        for (index, (expected, actual)) in func_type
            .params()
            .iter()
            .zip(resolved.params.iter())
            .enumerate()
        {
            if expected != actual {
                return Err(Error::with_extra(
                    ErrorKind::IncompatibleImportType,
                    format!(
                        "param type mismatch (param index: {}, expected {}, actual {})",
                        index, expected, actual
                    ),
                ));
            }
        }
        Ok(ImportFunctionEntry {
            module: module_sym,
            field: field_sym,
            type_idx,
            func: resolved.func,
        })
    }

    #[cfg(feature = "spectest")]
    fn parse_global_import(
        &mut self,
        sec: &mut Reader<'b>,
        module_name: &str,
        field_name: &str,
    ) -> Result<(), Error> {
        let ty = read_value_type(sec)?;
        let mutable = read_mutability(sec)?;
        if mutable {
            // Mutable global imports are not a thing in the MVP.
            return Err(Error::with_extra(
                ErrorKind::UnsupportedImport,
                format!("({}.{})", module_name, field_name),
            ));
        }
        let (known_ty, init_bits) = crate::builtins::spectest_global(module_name, field_name)
            .ok_or_else(|| {
                Error::with_extra(
                    ErrorKind::UnknownImport,
                    format!("({}.{})", module_name, field_name),
                )
            })?;
        if known_ty != ty {
            return Err(Error::with_extra(
                ErrorKind::IncompatibleImportType,
                format!("({}.{})", module_name, field_name),
            ));
        }
        if self.import_globals.len() + self.globals.len() >= PRESET_MAX_NUM_GLOBALS {
            return Err(Error::new(ErrorKind::TooManyGlobals));
        }
        let module_sym = self.symbols.intern(module_name)?;
        let field_sym = self.symbols.intern(field_name)?;
        let offset = self.assign_global_offset(ty);
        self.import_globals.push(ImportGlobalEntry {
            module: module_sym,
            field: field_sym,
            ty,
            mutable,
            offset,
            init_bits,
        });
        Ok(())
    }

    #[cfg(not(feature = "spectest"))]
    fn parse_global_import(
        &mut self,
        _sec: &mut Reader<'b>,
        module_name: &str,
        field_name: &str,
    ) -> Result<(), Error> {
        Err(Error::with_extra(
            ErrorKind::UnsupportedImport,
            format!("({}.{})", module_name, field_name),
        ))
    }

    fn parse_function_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if self.import_functions.len() + count > PRESET_MAX_NUM_FUNCTIONS {
            return Err(Error::new(ErrorKind::TooManyFunctions));
        }
        for _ in 0..count {
            let type_idx = sec.read_leb_u32()?;
            let func_type = self.types.get(type_idx as usize).ok_or_else(|| {
                Error::with_extra(ErrorKind::UnknownType, format!("#{}", type_idx))
            })?;
            self.functions.push(FuncEntry {
                name: Symbol::NULL,
                type_idx,
                canonical_type_idx: func_type.canonical_idx(),
            });
        }
        Ok(())
    }

    fn parse_table_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count + self.tables.len() > 1 {
            return Err(Error::new(ErrorKind::TooManyTables));
        }
        for _ in 0..count {
            if sec.read_u8()? != isa::ELEM_TYPE_FUNCREF {
                return Err(Error::new(ErrorKind::InvalidElemType));
            }
            let limits = read_limits(sec)?;
            if limits.initial() > PRESET_MAX_TABLE_SIZE
                || limits.maximum().is_some_and(|max| max > PRESET_MAX_TABLE_SIZE)
            {
                return Err(Error::new(ErrorKind::TableSizeTooLarge));
            }
            self.tables.push(TableEntry { limits });
        }
        Ok(())
    }

    fn parse_memory_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count + self.memories.len() > 1 {
            return Err(Error::new(ErrorKind::TooManyMemories));
        }
        for _ in 0..count {
            let limits = read_limits(sec)?;
            if limits.initial() > PRESET_MAX_MEMORY_PAGES
                || limits.maximum().is_some_and(|max| max > PRESET_MAX_MEMORY_PAGES)
            {
                return Err(Error::new(ErrorKind::MemoryPagesTooLarge));
            }
            self.memories.push(MemoryEntry { limits });
        }
        Ok(())
    }

    fn parse_global_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if self.import_globals.len() + self.globals.len() + count > PRESET_MAX_NUM_GLOBALS {
            return Err(Error::new(ErrorKind::TooManyGlobals));
        }
        for _ in 0..count {
            let ty = read_value_type(sec)?;
            let mutable = read_mutability(sec)?;
            let (init, init_ty) = self.parse_init_expr(sec)?;
            if init_ty != ty {
                return Err(Error::with_extra(
                    ErrorKind::TypeMismatch,
                    format!("(global initialiser is {}, expected {})", init_ty, ty),
                ));
            }
            let offset = self.assign_global_offset(ty);
            self.globals.push(GlobalEntry {
                ty,
                mutable,
                init,
                offset,
            });
        }
        Ok(())
    }

    fn parse_export_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count > PRESET_MAX_NUM_EXPORTS {
            return Err(Error::new(ErrorKind::TooManyExports));
        }
        for _ in 0..count {
            let name = sec.read_name()?;
            let kind_byte = sec.read_u8()?;
            let kind = ExternalKind::from_u8(kind_byte)
                .ok_or_else(|| Error::new(ErrorKind::InvalidExportKind))?;
            let index = sec.read_leb_u32()?;
            let valid = match kind {
                ExternalKind::Func => {
                    index < (self.import_functions.len() + self.functions.len()) as u32
                }
                ExternalKind::Table => index < self.tables.len() as u32,
                ExternalKind::Memory => index < self.memories.len() as u32,
                ExternalKind::Global => {
                    index < (self.import_globals.len() + self.globals.len()) as u32
                }
            };
            if !valid {
                let kind_error = match kind {
                    ExternalKind::Func => ErrorKind::UnknownFunction,
                    ExternalKind::Table => ErrorKind::UnknownTable,
                    ExternalKind::Memory => ErrorKind::UnknownMemory,
                    ExternalKind::Global => ErrorKind::UnknownGlobal,
                };
                return Err(Error::with_extra(kind_error, format!("#{}", index)));
            }
            if self
                .exports
                .insert(name.into(), (kind, index))
                .is_some()
            {
                return Err(Error::with_extra(
                    ErrorKind::DuplicateExportName,
                    name.to_string(),
                ));
            }
            // The designated gas function: an exported `func_gas` of type
            // [i64] -> [].
            if kind == ExternalKind::Func && name == "func_gas" {
                let ty = &self.types[self.func_type_idx(index) as usize];
                if matches!(ty.params(), [ValueType::I64]) && ty.return_type().is_none() {
                    self.gas_func_idx = Some(index);
                }
            }
        }
        Ok(())
    }

    fn parse_start_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let index = sec.read_leb_u32()?;
        if index >= (self.import_functions.len() + self.functions.len()) as u32 {
            return Err(Error::with_extra(
                ErrorKind::UnknownFunction,
                format!("#{}", index),
            ));
        }
        let ty = &self.types[self.func_type_idx(index) as usize];
        if !ty.params().is_empty() || ty.return_type().is_some() {
            return Err(Error::new(ErrorKind::InvalidStartFunction));
        }
        self.start_func = Some(index);
        Ok(())
    }

    fn parse_element_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count > PRESET_MAX_NUM_ELEM_SEGMENTS {
            return Err(Error::new(ErrorKind::TooManyElemSegments));
        }
        let num_funcs = (self.import_functions.len() + self.functions.len()) as u32;
        for _ in 0..count {
            let table_idx = sec.read_leb_u32()?;
            if table_idx as usize >= self.tables.len() {
                return Err(Error::with_extra(
                    ErrorKind::UnknownTable,
                    format!("#{}", table_idx),
                ));
            }
            let (offset, offset_ty) = self.parse_init_expr(sec)?;
            if offset_ty != ValueType::I32 {
                return Err(Error::with_extra(
                    ErrorKind::TypeMismatch,
                    format!("(element offset is {}, expected i32)", offset_ty),
                ));
            }
            let num_idxs = sec.read_leb_u32()? as usize;
            let mut func_idxs = Vec::with_capacity(num_idxs);
            for _ in 0..num_idxs {
                let func_idx = sec.read_leb_u32()?;
                if func_idx >= num_funcs {
                    return Err(Error::with_extra(
                        ErrorKind::UnknownFunction,
                        format!("#{}", func_idx),
                    ));
                }
                func_idxs.push(func_idx);
            }
            self.elements.push(ElemEntry {
                table_idx,
                offset,
                func_idxs: func_idxs.into_boxed_slice(),
            });
        }
        Ok(())
    }

    fn parse_code_section(&mut self, sec: &mut Reader<'b>, sec_base: usize) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count != self.functions.len() {
            return Err(Error::new(ErrorKind::CodeCountMismatch));
        }

        // The validator's view of the module built so far.
        let func_type_idxs: Vec<u32> = self
            .import_functions
            .iter()
            .map(|f| f.type_idx)
            .chain(self.functions.iter().map(|f| f.type_idx))
            .collect();
        let globals: Vec<(ValueType, bool, bool)> = self
            .import_globals
            .iter()
            .map(|g| (g.ty, g.mutable, true))
            .chain(self.globals.iter().map(|g| (g.ty, g.mutable, false)))
            .collect();
        let ctx = ModuleContext {
            types: &self.types,
            func_type_idxs: &func_type_idxs,
            globals: &globals,
            has_table: !self.tables.is_empty(),
            has_memory: !self.memories.is_empty(),
        };

        for internal_idx in 0..count {
            let body_size = sec.read_leb_u32()? as usize;
            if body_size > PRESET_MAX_FUNCTION_SIZE {
                return Err(Error::new(ErrorKind::FunctionSizeTooLarge));
            }
            let body_base = sec_base + sec.pos();
            let mut body = sec.sub_reader(body_size)?;

            let func_type =
                &self.types[self.functions[internal_idx].type_idx as usize];
            let (locals, num_params, num_locals, local_cells) =
                parse_locals(&mut body, func_type)?;

            let code_start = body_base + body.pos();
            let code_end = body_base + body_size;
            let code_slice = &self.buf[code_start..code_end];
            if code_slice.is_empty() {
                return Err(Error::new(ErrorKind::UnexpectedEnd));
            }

            let validated = validation::validate_function(&ctx, func_type, &locals, code_slice)
                .map_err(|mut err| {
                    let extra = match err.extra_message() {
                        Some(extra) => format!("#{} {}", internal_idx, extra),
                        None => format!("#{}", internal_idx),
                    };
                    err.set_extra_message(extra);
                    err
                })?;

            for (rel, opcode) in &validated.patches {
                self.patches.push((code_start + *rel as usize, *opcode));
            }
            self.code.push(CodeEntry {
                code: code_start..code_end,
                locals,
                num_params,
                num_locals,
                local_cells,
                max_stack_size: validated.max_stack_size,
                max_block_depth: validated.max_block_depth,
                block_bounds: validated.block_bounds,
                callees: validated.callees.into_boxed_slice(),
            });
        }
        Ok(())
    }

    fn parse_data_section(&mut self, sec: &mut Reader<'b>, sec_base: usize) -> Result<(), Error> {
        let count = sec.read_leb_u32()? as usize;
        if count > PRESET_MAX_NUM_DATA_SEGMENTS {
            return Err(Error::new(ErrorKind::TooManyDataSegments));
        }
        let mut total_size = 0u64;
        for _ in 0..count {
            let mem_idx = sec.read_leb_u32()?;
            if mem_idx as usize >= self.memories.len() {
                return Err(Error::with_extra(
                    ErrorKind::UnknownMemory,
                    format!("#{}", mem_idx),
                ));
            }
            let (offset, offset_ty) = self.parse_init_expr(sec)?;
            if offset_ty != ValueType::I32 {
                return Err(Error::with_extra(
                    ErrorKind::TypeMismatch,
                    format!("(data offset is {}, expected i32)", offset_ty),
                ));
            }
            let size = sec.read_leb_u32()? as usize;
            if size > PRESET_MAX_DATA_SEGMENT_SIZE {
                return Err(Error::new(ErrorKind::DataSectionTooLarge));
            }
            total_size += size as u64;
            if total_size > PRESET_MAX_TOTAL_DATA_SIZE {
                return Err(Error::new(ErrorKind::DataSectionTooLarge));
            }
            let start = sec_base + sec.pos();
            sec.skip(size)?;
            self.data.push(DataEntry {
                mem_idx,
                offset,
                bytes: start..start + size,
            });
        }
        Ok(())
    }

    fn parse_custom_section(&mut self, sec: &mut Reader<'b>) -> Result<(), Error> {
        let name = sec.read_name()?;
        if name != "name" {
            if self.name_section_seen {
                // The name section is terminal among customs.
                return Err(Error::new(ErrorKind::SectionOutOfOrder));
            }
            sec.skip(sec.remaining())?;
            return Ok(());
        }
        if self.name_section_seen {
            return Err(Error::new(ErrorKind::DuplicateSection));
        }
        self.name_section_seen = true;

        let mut last_subsection: i32 = -1;
        while !sec.is_at_end() {
            let subsection_id = sec.read_u8()?;
            if (subsection_id as i32) <= last_subsection {
                return Err(Error::new(ErrorKind::InvalidNameSection));
            }
            last_subsection = subsection_id as i32;
            let size = sec.read_leb_u32()? as usize;
            let mut subsection = sec.sub_reader(size)?;
            if subsection_id != 1 {
                // Only the function-name subsection is consumed.
                subsection.skip(subsection.remaining())?;
                continue;
            }
            let count = subsection.read_leb_u32()?;
            let num_imports = self.import_functions.len() as u32;
            let num_total = num_imports + self.functions.len() as u32;
            for _ in 0..count {
                let func_idx = subsection.read_leb_u32()?;
                let name = subsection.read_name()?;
                if func_idx >= num_total {
                    return Err(Error::with_extra(
                        ErrorKind::InvalidNameSection,
                        format!("(unknown function #{})", func_idx),
                    ));
                }
                if func_idx < num_imports {
                    continue;
                }
                let entry = &mut self.functions[(func_idx - num_imports) as usize];
                if !entry.name.is_null() {
                    return Err(Error::with_extra(
                        ErrorKind::InvalidNameSection,
                        format!("(duplicate name for function #{})", func_idx),
                    ));
                }
                entry.name = self.symbols.intern(name)?;
            }
            if !subsection.is_at_end() {
                return Err(Error::new(ErrorKind::InvalidNameSection));
            }
        }
        Ok(())
    }

    // ---- shared helpers ----

    fn func_type_idx(&self, func_idx: u32) -> u32 {
        let num_imports = self.import_functions.len() as u32;
        if func_idx < num_imports {
            self.import_functions[func_idx as usize].type_idx
        } else {
            self.functions[(func_idx - num_imports) as usize].type_idx
        }
    }

    /// Assigns the next naturally-aligned offset in the global-variable
    /// region.
    fn assign_global_offset(&mut self, ty: ValueType) -> u32 {
        let size = ty.size();
        let offset = (self.global_var_size + size - 1) & !(size - 1);
        self.global_var_size = offset + size;
        offset
    }

    /// Parses an `end`-terminated initialiser expression. Only constants and
    /// `get_global` of an immutable imported global are accepted.
    fn parse_init_expr(&mut self, sec: &mut Reader<'b>) -> Result<(InitExpr, ValueType), Error> {
        let opcode = sec.read_u8()?;
        let (init, ty) = match opcode {
            isa::I32_CONST => (InitExpr::I32(sec.read_leb_s32()?), ValueType::I32),
            isa::I64_CONST => (InitExpr::I64(sec.read_leb_s64()?), ValueType::I64),
            isa::F32_CONST => (InitExpr::F32(sec.read_u32_le()?), ValueType::F32),
            isa::F64_CONST => (InitExpr::F64(sec.read_u64_le()?), ValueType::F64),
            isa::GET_GLOBAL => {
                let global_idx = sec.read_leb_u32()?;
                let import = self
                    .import_globals
                    .get(global_idx as usize)
                    .ok_or_else(|| {
                        Error::with_extra(
                            ErrorKind::InvalidInitExpr,
                            format!("(get_global #{} is not an imported global)", global_idx),
                        )
                    })?;
                if import.mutable {
                    return Err(Error::new(ErrorKind::InvalidInitExpr));
                }
                (InitExpr::GetGlobal(global_idx), import.ty)
            }
            _ => return Err(Error::new(ErrorKind::InvalidInitExpr)),
        };
        if sec.read_u8()? != isa::END {
            return Err(Error::new(ErrorKind::EndOpcodeExpected));
        }
        Ok((init, ty))
    }
}

fn read_value_type(sec: &mut Reader) -> Result<ValueType, Error> {
    match sec.read_u8()? {
        isa::VALUE_TYPE_I32 => Ok(ValueType::I32),
        isa::VALUE_TYPE_I64 => Ok(ValueType::I64),
        isa::VALUE_TYPE_F32 => Ok(ValueType::F32),
        isa::VALUE_TYPE_F64 => Ok(ValueType::F64),
        _ => Err(Error::new(ErrorKind::InvalidValueType)),
    }
}

fn read_mutability(sec: &mut Reader) -> Result<bool, Error> {
    match sec.read_u8()? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::new(ErrorKind::InvalidMutability)),
    }
}

fn read_limits(sec: &mut Reader) -> Result<Limits, Error> {
    let flags = sec.read_u8()?;
    if flags > 1 {
        return Err(Error::new(ErrorKind::InvalidLimitFlags));
    }
    let initial = sec.read_leb_u32()?;
    let maximum = if flags == 1 {
        let maximum = sec.read_leb_u32()?;
        if maximum < initial {
            return Err(Error::new(ErrorKind::MinGreaterThanMax));
        }
        Some(maximum)
    } else {
        None
    };
    Ok(Limits::new(initial, maximum))
}

/// Parses the local-run header of a code entry and lays out parameter and
/// local cell offsets sequentially.
fn parse_locals(
    body: &mut Reader,
    func_type: &FuncType,
) -> Result<(Box<[LocalSlot]>, u16, u16, u32), Error> {
    let mut slots = Vec::new();
    let mut cell_offset = 0u32;
    for param in func_type.params() {
        slots.push(LocalSlot {
            ty: *param,
            cell_offset,
        });
        cell_offset += param.cell_count();
    }
    let num_params = slots.len() as u16;

    let num_runs = body.read_leb_u32()?;
    let mut num_locals = 0u64;
    for _ in 0..num_runs {
        let run_len = body.read_leb_u32()? as u64;
        let ty = read_value_type(body)?;
        num_locals += run_len;
        if num_locals > PRESET_MAX_FUNCTION_LOCALS {
            return Err(Error::new(ErrorKind::TooManyLocals));
        }
        for _ in 0..run_len {
            slots.push(LocalSlot {
                ty,
                cell_offset,
            });
            cell_offset += ty.cell_count();
            if cell_offset as u64 > PRESET_MAX_FUNCTION_LOCALS {
                return Err(Error::new(ErrorKind::TooManyLocals));
            }
        }
    }
    Ok((
        slots.into_boxed_slice(),
        num_params,
        num_locals as u16,
        cell_offset,
    ))
}

#[cfg(test)]
mod tests {
    use crate::runtime::{Config, Runtime};
    use wasmet_core::ErrorKind;

    fn load_err(bytes: &[u8]) -> ErrorKind {
        let runtime = Runtime::new(Config::default()).unwrap();
        runtime
            .load_module(bytes.to_vec(), "test")
            .err()
            .expect("load should fail")
            .kind()
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert_eq!(load_err(b"\0esm\x01\0\0\0"), ErrorKind::MagicNotDetected);
        assert_eq!(load_err(b"\0as"), ErrorKind::MagicNotDetected);
    }

    #[test]
    fn bad_version_is_rejected() {
        assert_eq!(
            load_err(b"\0asm\x02\0\0\0"),
            ErrorKind::VersionNotSupported
        );
    }

    #[test]
    fn minimal_module_loads() {
        let runtime = Runtime::new(Config::default()).unwrap();
        let module = runtime
            .load_module(b"\0asm\x01\0\0\0".to_vec(), "minimal")
            .unwrap();
        assert_eq!(module.num_total_functions(), 0);
        assert_eq!(module.name(), "minimal");
    }

    #[test]
    fn out_of_order_sections_are_rejected() {
        // Memory section (5) before table section (4).
        let bytes = [
            b"\0asm\x01\0\0\0".as_slice(),
            &[5, 3, 1, 0, 0],         // memory section: one memory, min 0
            &[4, 4, 1, 0x70, 0, 0],   // table section afterwards
        ]
        .concat();
        assert_eq!(load_err(&bytes), ErrorKind::SectionOutOfOrder);
    }

    #[test]
    fn duplicate_sections_are_rejected() {
        let bytes = [
            b"\0asm\x01\0\0\0".as_slice(),
            &[5, 3, 1, 0, 0],
            &[5, 3, 1, 0, 0],
        ]
        .concat();
        assert_eq!(load_err(&bytes), ErrorKind::DuplicateSection);
    }

    #[test]
    fn section_content_must_fill_declared_size() {
        // Type section declaring zero entries but a 3-byte size.
        let bytes = [b"\0asm\x01\0\0\0".as_slice(), &[1, 3, 0, 0, 0]].concat();
        assert_eq!(load_err(&bytes), ErrorKind::SectionSizeMismatch);
    }

    #[test]
    fn truncated_section_is_rejected() {
        let bytes = [b"\0asm\x01\0\0\0".as_slice(), &[1, 10, 0]].concat();
        assert_eq!(load_err(&bytes), ErrorKind::UnexpectedEnd);
    }

    #[test]
    fn multiple_memories_are_rejected() {
        let bytes = [b"\0asm\x01\0\0\0".as_slice(), &[5, 5, 2, 0, 1, 0, 1]].concat();
        assert_eq!(load_err(&bytes), ErrorKind::TooManyMemories);
    }

    #[test]
    fn memory_min_above_max_is_rejected() {
        let bytes = [b"\0asm\x01\0\0\0".as_slice(), &[5, 4, 1, 1, 2, 1]].concat();
        assert_eq!(load_err(&bytes), ErrorKind::MinGreaterThanMax);
    }
}
