//! Host functions and host modules.
//!
//! A host function is native code a Wasm instance can call through a
//! resolved import. It receives the calling [`Instance`] as its first
//! argument and the marshalled Wasm arguments as a value slice; it may read
//! and write the instance's memory and globals, re-enter the interpreter, or
//! trap by returning an error.

use crate::instance::Instance;
use crate::symbols::{Symbol, SymbolPool};
use wasmet_core::{Error, ErrorKind, FromValue, Value, ValueType};

/// Signature of a host function.
///
/// The single native-call boundary of the engine: the interpreter marshals
/// operand-stack cells into the `&[Value]` slice, dispatches on this
/// function pointer, and pushes the (type-checked) result back.
pub type HostFn = fn(&mut Instance, HostArgs) -> Result<Option<Value>, Error>;

/// Wrapper around the argument slice of a host call for convenient, checked
/// access.
#[derive(Debug, Copy, Clone)]
pub struct HostArgs<'a>(pub(crate) &'a [Value]);

impl<'a> AsRef<[Value]> for HostArgs<'a> {
    fn as_ref(&self) -> &[Value] {
        self.0
    }
}

impl<'a> HostArgs<'a> {
    /// Extract argument by index `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the cast is invalid or there are not enough
    /// arguments.
    pub fn nth_checked<T>(&self, idx: usize) -> Result<T, Error>
    where
        T: FromValue,
    {
        self.nth_value_checked(idx)?
            .try_into()
            .ok_or_else(|| Error::new(ErrorKind::ArgumentTypeMismatch))
    }

    /// Extract argument as a [`Value`] by index `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if this list does not have enough arguments.
    pub fn nth_value_checked(&self, idx: usize) -> Result<Value, Error> {
        self.0
            .get(idx)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::ArgumentCountMismatch))
    }

    /// Total number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the call has no arguments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Description of one host function.
pub struct HostFuncDesc {
    /// Field name the function is importable under.
    pub name: String,
    /// Parameter types of the Wasm-facing signature.
    pub params: Vec<ValueType>,
    /// Return type of the Wasm-facing signature (at most one value).
    pub ret: Option<ValueType>,
    /// The native entry point.
    pub func: HostFn,
}

impl HostFuncDesc {
    /// Creates a new descriptor.
    pub fn new(
        name: impl Into<String>,
        params: Vec<ValueType>,
        ret: Option<ValueType>,
        func: HostFn,
    ) -> HostFuncDesc {
        HostFuncDesc {
            name: name.into(),
            params,
            ret,
            func,
        }
    }
}

/// A named collection of host functions, registered on a `Runtime` and
/// resolvable by `(module, field)` import names.
pub struct HostModule {
    name: String,
    funcs: Vec<HostFuncDesc>,
}

impl HostModule {
    /// Creates an empty host module with the given import-module name.
    pub fn new(name: impl Into<String>) -> HostModule {
        HostModule {
            name: name.into(),
            funcs: Vec::new(),
        }
    }

    /// The import-module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a function. Two functions with the same name in one module are
    /// rejected.
    pub fn add_func(&mut self, desc: HostFuncDesc) -> Result<(), Error> {
        if self.funcs.iter().any(|f| f.name == desc.name) {
            return Err(Error::with_extra(
                ErrorKind::DuplicateHostFunction,
                desc.name.clone(),
            ));
        }
        self.funcs.push(desc);
        Ok(())
    }

    /// Removes every function whose name is not in `whitelist`.
    pub fn filter_functions(&mut self, whitelist: &[&str]) {
        self.funcs.retain(|f| whitelist.contains(&f.name.as_str()));
    }

    /// Number of functions currently in the module.
    pub fn num_functions(&self) -> usize {
        self.funcs.len()
    }
}

/// A host function after registration, with its name interned.
pub(crate) struct RegisteredHostFunc {
    pub name_sym: Symbol,
    pub params: Box<[ValueType]>,
    pub ret: Option<ValueType>,
    pub func: HostFn,
}

/// A host module after registration on a runtime.
pub(crate) struct RegisteredHostModule {
    pub name_sym: Symbol,
    funcs: Vec<RegisteredHostFunc>,
    /// Handle of the first function name when the pool assigned the module's
    /// function names a contiguous range, enabling O(1) import lookup.
    contiguous_base: Option<u32>,
}

impl RegisteredHostModule {
    pub(crate) fn register(
        pool: &mut SymbolPool,
        module: HostModule,
    ) -> Result<RegisteredHostModule, Error> {
        let name_sym = pool.intern(&module.name)?;
        let mut funcs = Vec::with_capacity(module.funcs.len());
        for desc in module.funcs {
            funcs.push(RegisteredHostFunc {
                name_sym: pool.intern(&desc.name)?,
                params: desc.params.into_boxed_slice(),
                ret: desc.ret,
                func: desc.func,
            });
        }
        // Freshly interned names usually come out back-to-back; remember the
        // base handle when they do.
        let contiguous_base = match funcs.first() {
            Some(first) => {
                let base = first.name_sym.into_u32();
                funcs
                    .iter()
                    .enumerate()
                    .all(|(i, f)| f.name_sym.into_u32() == base + i as u32)
                    .then_some(base)
            }
            None => None,
        };
        Ok(RegisteredHostModule {
            name_sym,
            funcs,
            contiguous_base,
        })
    }

    /// Resolves a function by its interned field name.
    pub(crate) fn lookup(&self, field: Symbol) -> Option<&RegisteredHostFunc> {
        if let Some(base) = self.contiguous_base {
            let index = field.into_u32().checked_sub(base)? as usize;
            let func = self.funcs.get(index)?;
            debug_assert_eq!(func.name_sym, field);
            return Some(func);
        }
        self.funcs.iter().find(|f| f.name_sym == field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nop(_: &mut Instance, _: HostArgs) -> Result<Option<Value>, Error> {
        Ok(None)
    }

    fn module_with(names: &[&str]) -> HostModule {
        let mut module = HostModule::new("test");
        for name in names {
            module
                .add_func(HostFuncDesc::new(*name, vec![], None, nop))
                .unwrap();
        }
        module
    }

    #[test]
    fn duplicate_function_names_are_rejected() {
        let mut module = HostModule::new("m");
        module
            .add_func(HostFuncDesc::new("f", vec![], None, nop))
            .unwrap();
        let err = module
            .add_func(HostFuncDesc::new("f", vec![], None, nop))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateHostFunction);
    }

    #[test]
    fn whitelist_filtering_drops_other_functions() {
        let mut module = module_with(&["keep", "drop_me", "also_keep"]);
        module.filter_functions(&["keep", "also_keep"]);
        assert_eq!(module.num_functions(), 2);
    }

    #[test]
    fn contiguous_lookup_resolves_by_offset() {
        let mut pool = SymbolPool::new();
        let registered =
            RegisteredHostModule::register(&mut pool, module_with(&["a", "b", "c"])).unwrap();
        let sym_b = pool.probe("b").unwrap();
        let found = registered.lookup(sym_b).unwrap();
        assert_eq!(found.name_sym, sym_b);
        assert!(registered.lookup(pool.probe("env").unwrap()).is_none());
    }
}
