//! Foundational primitives for the `wasmet` WebAssembly interpreter.
//!
//! This crate carries everything the engine's layers agree on but that has no
//! runtime state of its own:
//!
//! - the closed [`Error`] taxonomy with its [`ErrorPhase`]/[`ErrorKind`] tags,
//! - runtime [`Value`]s and the conversion and arithmetic traits the
//!   interpreter dispatches through,
//! - the canonical-NaN [`F32`]/[`F64`] float wrappers,
//! - the [`HostError`] trait for embedder-defined error payloads.

#![warn(missing_docs)]

mod error;
mod host_error;
pub mod nan_canonical_float;
mod value;

pub use self::error::{Error, ErrorKind, ErrorPhase};
pub use self::host_error::HostError;
pub use self::nan_canonical_float::{F32, F64};
pub use self::value::{
    ArithmeticOps,
    ExtendInto,
    Float,
    FromValue,
    Integer,
    LittleEndianConvert,
    TransmuteInto,
    TryTruncateInto,
    Value,
    ValueType,
    WrapInto,
};
