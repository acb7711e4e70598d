//! Per-function bytecode validation.
//!
//! Runs as part of loading, directly over the binary opcode stream of each
//! code entry, and is the only place that ever inspects a function body
//! before execution: the interpreter relies on every index, type and stack
//! shape having been proven here.

mod func;

#[cfg(test)]
mod tests;

pub(crate) use self::func::{validate_function, ValidatedCode};

use crate::types::FuncType;
use wasmet_core::{Error, ErrorKind, ValueType};

/// The module-level facts the function validator needs: declared types,
/// the function index space, global metadata and whether a table/memory
/// exists.
pub(crate) struct ModuleContext<'a> {
    pub types: &'a [FuncType],
    /// Declared type index per function, imports first.
    pub func_type_idxs: &'a [u32],
    /// `(type, mutable, is_import)` per global, imports first.
    pub globals: &'a [(ValueType, bool, bool)],
    pub has_table: bool,
    pub has_memory: bool,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn type_at(&self, type_idx: u32) -> Result<&FuncType, Error> {
        self.types
            .get(type_idx as usize)
            .ok_or_else(|| Error::with_extra(ErrorKind::UnknownType, format!("#{}", type_idx)))
    }

    pub(crate) fn func_type(&self, func_idx: u32) -> Result<&FuncType, Error> {
        let type_idx = self
            .func_type_idxs
            .get(func_idx as usize)
            .ok_or_else(|| Error::with_extra(ErrorKind::UnknownFunction, format!("#{}", func_idx)))?;
        self.type_at(*type_idx)
    }

    pub(crate) fn global(&self, global_idx: u32) -> Result<(ValueType, bool, bool), Error> {
        self.globals
            .get(global_idx as usize)
            .copied()
            .ok_or_else(|| Error::with_extra(ErrorKind::UnknownGlobal, format!("#{}", global_idx)))
    }
}
