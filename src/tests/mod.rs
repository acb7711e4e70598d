use crate::builtins;
use crate::isolation::{InstanceHandle, Isolation};
use crate::module::Module;
use crate::runtime::{Config, Runtime};
use std::sync::Arc;

mod host;
mod wasm;

pub(crate) fn wat2wasm(source: &str) -> Vec<u8> {
    wat::parse_str(source).expect("failed to parse wat")
}

pub(crate) fn test_runtime() -> Arc<Runtime> {
    let runtime = Runtime::new(Config::default()).expect("failed to create runtime");
    runtime
        .register_host_module(builtins::env_module())
        .expect("failed to register env");
    runtime
}

pub(crate) fn load_wat(runtime: &Arc<Runtime>, source: &str) -> Arc<Module> {
    runtime
        .load_module(wat2wasm(source), "test")
        .expect("failed to load module")
}

/// Loads and instantiates `source` on a fresh runtime with the given gas.
pub(crate) fn instantiate_with_gas(source: &str, gas: u64) -> (Isolation, InstanceHandle) {
    let runtime = test_runtime();
    let module = load_wat(&runtime, source);
    let mut isolation = Isolation::new(&runtime);
    let handle = isolation
        .instantiate(&module, gas)
        .expect("failed to instantiate module");
    (isolation, handle)
}

pub(crate) fn instantiate(source: &str) -> (Isolation, InstanceHandle) {
    instantiate_with_gas(source, 0)
}
