//! The `Runtime`: the engine's shared, mostly read-only services.
//!
//! A runtime owns the symbol pool, the host-module registry, the
//! configuration and (optionally) phase statistics. It is freely shareable
//! across threads; the symbol pool is internally locked for the rare
//! cross-thread interning, and host modules are only meant to be registered
//! during embedder setup, before any module is loaded.

use crate::host::{HostFn, HostModule, RegisteredHostModule};
use crate::loader;
use crate::module::Module;
use crate::symbols::{Symbol, SymbolPool};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wasmet_core::{Error, ErrorKind, ValueType};

/// Execution mode of a runtime.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Bytecode interpretation (the only mode this engine implements).
    Interp,
    /// Single-pass JIT compilation. Recognised but not built in.
    Singlepass,
    /// Multi-pass JIT compilation. Recognised but not built in.
    Multipass,
}

impl FromStr for RunMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<RunMode, Error> {
        match s {
            "interp" => Ok(RunMode::Interp),
            "singlepass" => Ok(RunMode::Singlepass),
            "multipass" => Ok(RunMode::Multipass),
            _ => Err(Error::with_extra(
                ErrorKind::UnsupportedRunMode,
                format!("({})", s),
            )),
        }
    }
}

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Execution mode; only [`RunMode::Interp`] is accepted.
    pub mode: RunMode,
    /// Force the heap memory strategy even where virtual memory is
    /// available.
    pub disable_wasm_memory_map: bool,
    /// Record wall-clock durations of the load/instantiate/execute phases.
    pub enable_statistics: bool,
    /// Upper bound applied to every memory's maximum page count at
    /// instantiation.
    pub vm_max_memory_pages: Option<u32>,
    /// Byte budget of the per-isolation interpreter stack (locals, frame
    /// headers, control and operand stacks of all live frames).
    pub interp_stack_size: usize,
    /// Hard bound on interpreter call depth.
    pub max_call_depth: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            mode: RunMode::Interp,
            disable_wasm_memory_map: false,
            enable_statistics: false,
            vm_max_memory_pages: None,
            interp_stack_size: 1024 * 1024,
            max_call_depth: 64 * 1024,
        }
    }
}

/// Engine phase measured by [`Statistics`].
#[derive(Debug, Copy, Clone)]
pub(crate) enum StatPhase {
    Load,
    Instantiate,
    Execute,
}

#[derive(Debug, Default, Clone)]
struct PhaseStats {
    count: u64,
    total: Duration,
}

/// Accumulated per-phase wall-clock timings.
#[derive(Debug, Default, Clone)]
pub struct Statistics {
    load: PhaseStats,
    instantiate: PhaseStats,
    execute: PhaseStats,
}

impl Statistics {
    fn record(&mut self, phase: StatPhase, elapsed: Duration) {
        let slot = match phase {
            StatPhase::Load => &mut self.load,
            StatPhase::Instantiate => &mut self.instantiate,
            StatPhase::Execute => &mut self.execute,
        };
        slot.count += 1;
        slot.total += elapsed;
    }

    /// `(count, total duration)` of the load phase.
    pub fn load(&self) -> (u64, Duration) {
        (self.load.count, self.load.total)
    }

    /// `(count, total duration)` of the instantiation phase.
    pub fn instantiate(&self) -> (u64, Duration) {
        (self.instantiate.count, self.instantiate.total)
    }

    /// `(count, total duration)` of the execution phase.
    pub fn execute(&self) -> (u64, Duration) {
        (self.execute.count, self.execute.total)
    }
}

/// A host function with its signature, as handed to the loader during import
/// resolution.
pub(crate) struct ResolvedHostFunc {
    pub params: Box<[ValueType]>,
    pub ret: Option<ValueType>,
    pub func: HostFn,
}

/// The engine's shared services. See the module docs.
pub struct Runtime {
    config: Config,
    symbols: spin::Mutex<SymbolPool>,
    host_modules: spin::RwLock<HashMap<Symbol, RegisteredHostModule>>,
    stats: Option<spin::Mutex<Statistics>>,
}

impl Runtime {
    /// Creates a runtime from a configuration.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::UnsupportedRunMode`] when a JIT mode is
    /// requested; this build interprets only.
    pub fn new(config: Config) -> Result<Arc<Runtime>, Error> {
        if config.mode != RunMode::Interp {
            return Err(Error::with_extra(
                ErrorKind::UnsupportedRunMode,
                format!("({:?})", config.mode),
            ));
        }
        let stats = config
            .enable_statistics
            .then(|| spin::Mutex::new(Statistics::default()));
        tracing::debug!(?config, "runtime created");
        Ok(Arc::new(Runtime {
            config,
            symbols: spin::Mutex::new(SymbolPool::new()),
            host_modules: spin::RwLock::new(HashMap::new()),
            stats,
        }))
    }

    /// The configuration this runtime was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers a host module. Two modules with the same name cannot both
    /// be registered.
    pub fn register_host_module(&self, module: HostModule) -> Result<(), Error> {
        let name = module.name().to_string();
        let registered = {
            let mut pool = self.symbols.lock();
            RegisteredHostModule::register(&mut pool, module)?
        };
        let mut modules = self.host_modules.write();
        if modules.contains_key(&registered.name_sym) {
            return Err(Error::with_extra(ErrorKind::DuplicateHostModule, name));
        }
        tracing::debug!(module = %name, "host module registered");
        modules.insert(registered.name_sym, registered);
        Ok(())
    }

    /// Loads, validates and prepares a module from a binary buffer.
    ///
    /// The returned module is immutable and shareable; nothing is partially
    /// constructed on failure.
    pub fn load_module(
        self: &Arc<Runtime>,
        bytes: Vec<u8>,
        hint_name: &str,
    ) -> Result<Arc<Module>, Error> {
        let started = Instant::now();
        let module = loader::load(self, bytes, hint_name)?;
        self.record_phase(StatPhase::Load, started.elapsed());
        tracing::debug!(
            module = hint_name,
            functions = module.num_total_functions(),
            "module loaded"
        );
        Ok(Arc::new(module))
    }

    /// A snapshot of the phase statistics, when enabled.
    pub fn statistics(&self) -> Option<Statistics> {
        self.stats.as_ref().map(|stats| stats.lock().clone())
    }

    pub(crate) fn record_phase(&self, phase: StatPhase, elapsed: Duration) {
        if let Some(stats) = &self.stats {
            stats.lock().record(phase, elapsed);
        }
    }

    pub(crate) fn intern_symbol(&self, name: &str) -> Result<Symbol, Error> {
        self.symbols.lock().intern(name)
    }

    pub(crate) fn resolve_symbol(&self, sym: Symbol) -> Option<Arc<str>> {
        self.symbols.lock().resolve(sym)
    }

    pub(crate) fn release_symbols(&self, symbols: &[Symbol]) {
        let mut pool = self.symbols.lock();
        for sym in symbols {
            pool.release(*sym);
        }
    }

    /// Resolves `(module, field)` against the registered host modules.
    pub(crate) fn lookup_host_func(
        &self,
        module: Symbol,
        field: Symbol,
    ) -> Option<ResolvedHostFunc> {
        let modules = self.host_modules.read();
        let found = modules.get(&module)?.lookup(field)?;
        Some(ResolvedHostFunc {
            params: found.params.clone(),
            ret: found.ret,
            func: found.func,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostArgs, HostFuncDesc};
    use crate::instance::Instance;
    use wasmet_core::Value;

    fn nop(_: &mut Instance, _: HostArgs) -> Result<Option<Value>, Error> {
        Ok(None)
    }

    #[test]
    fn jit_modes_are_rejected() {
        let err = Runtime::new(Config {
            mode: RunMode::Multipass,
            ..Config::default()
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedRunMode);
    }

    #[test]
    fn duplicate_host_modules_are_rejected() {
        let runtime = Runtime::new(Config::default()).unwrap();
        let mut module = HostModule::new("env");
        module
            .add_func(HostFuncDesc::new("f", vec![], None, nop))
            .unwrap();
        runtime.register_host_module(module).unwrap();
        let err = runtime
            .register_host_module(HostModule::new("env"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateHostModule);
    }

    #[test]
    fn host_funcs_resolve_by_symbol_pair() {
        let runtime = Runtime::new(Config::default()).unwrap();
        let mut module = HostModule::new("env");
        module
            .add_func(HostFuncDesc::new(
                "print",
                vec![ValueType::I32],
                None,
                nop,
            ))
            .unwrap();
        runtime.register_host_module(module).unwrap();
        let env = runtime.intern_symbol("env").unwrap();
        let print = runtime.intern_symbol("print").unwrap();
        let resolved = runtime.lookup_host_func(env, print).unwrap();
        assert_eq!(&*resolved.params, &[ValueType::I32]);
        assert_eq!(resolved.ret, None);
    }

    #[test]
    fn run_mode_parses() {
        assert_eq!("interp".parse::<RunMode>().unwrap(), RunMode::Interp);
        assert!("jit".parse::<RunMode>().is_err());
    }
}
