//! # wasmet
//!
//! A gas-metered WebAssembly interpreter: this library loads Wasm 1.0 binary
//! modules (plus the sign-extension opcodes), validates them, instantiates
//! them into sandboxed instances and executes their exported functions.
//!
//! ## Loading and validation
//!
//! [`Runtime::load_module`] decodes a binary buffer, checks it against the
//! engine's uniform limits and type-checks every function body. A module
//! that loads is immutable from then on; nothing is partially constructed on
//! failure.
//!
//! ## Instantiation
//!
//! An [`Isolation`] owns instances. [`Isolation::instantiate`] resolves the
//! module's imports (registered host modules), initialises globals, tables
//! and linear memory from their segments, then runs the start function. The
//! optional gas budget is fixed per instance at this point.
//!
//! ## Execution
//!
//! [`Isolation::call`] (or [`Instance::call_function`]) marshals arguments,
//! runs the interpreter and returns the results — or the trap, which is also
//! kept on the instance until cleared. Traps are not resumable. When the
//! module designates a gas function (an exported `func_gas` of type
//! `[i64] -> []`), every call to it is intercepted and deducted from the
//! instance's budget; exhaustion traps with `GasLimitExceeded`.
//!
//! ## Host functions
//!
//! Embedders expose native code by registering [`HostModule`]s on the
//! runtime before loading modules that import them. A host function receives
//! the calling [`Instance`] first and may read its memory, charge gas,
//! re-enter the interpreter or trap. [`builtins::env_module`] provides the
//! conventional `env` surface (printing, `abort`, `exit`, `gas`).
//!
//! # Examples
//!
//! ```rust
//! use wasmet::{Config, Isolation, Runtime, Value};
//!
//! let wasm = wat::parse_str(
//!     r#"
//!     (module
//!         (func (export "test") (result i32)
//!             i32.const 1337))
//!     "#,
//! )
//! .expect("failed to parse wat");
//!
//! let runtime = Runtime::new(Config::default()).expect("failed to create runtime");
//! let module = runtime.load_module(wasm, "example").expect("failed to load wasm");
//!
//! let mut isolation = Isolation::new(&runtime);
//! let instance = isolation
//!     .instantiate(&module, 0)
//!     .expect("failed to instantiate wasm module");
//!
//! assert_eq!(
//!     isolation.call(instance, "test", &[]).expect("failed to execute export"),
//!     vec![Value::I32(1337)],
//! );
//! ```

#![warn(missing_docs)]

pub mod builtins;
mod host;
mod instance;
mod isa;
mod isolation;
mod loader;
pub mod memory;
mod module;
mod runner;
mod runtime;
mod symbols;
mod types;
mod validation;

#[cfg(test)]
mod tests;

pub use self::host::{HostArgs, HostFn, HostFuncDesc, HostModule};
pub use self::instance::{Instance, InstanceLayout};
pub use self::isolation::{InstanceHandle, Isolation};
pub use self::module::{ExternalKind, Module};
pub use self::runtime::{Config, RunMode, Runtime, Statistics};
pub use self::symbols::{Symbol, SymbolPool};
pub use self::types::{FuncType, Limits};
pub use wasmet_core::{
    Error,
    ErrorKind,
    ErrorPhase,
    HostError,
    Value,
    ValueType,
    F32,
    F64,
};

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::wasm32::*;
    pub use memory_units::{size_of, ByteSize, Bytes, RoundUpTo};
}
