//! Built-in host modules.
//!
//! [`env_module`] is the default embedder environment: printing helpers, the
//! `abort`/`exit` terminators and the `gas` function that backs metered
//! modules. The `spectest` module (behind the `spectest` cargo feature)
//! mirrors the conventional spec-test host surface.

use crate::host::{HostArgs, HostFuncDesc, HostModule};
use crate::instance::Instance;
use wasmet_core::{Error, ErrorKind, Value, ValueType};

fn print_i32(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let value: i32 = args.nth_checked(0)?;
    println!("print_i32: {}", value);
    Ok(None)
}

fn print_i64(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let value: i64 = args.nth_checked(0)?;
    println!("print_i64: {}", value);
    Ok(None)
}

fn print_f32(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let value: f32 = args.nth_checked(0)?;
    println!("print_f32: {}", value);
    Ok(None)
}

fn print_f64(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let value: f64 = args.nth_checked(0)?;
    println!("print_f64: {}", value);
    Ok(None)
}

/// Prints the NUL-terminated string at the given memory offset.
fn print_str(instance: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let offset: u32 = args.nth_checked(0)?;
    let memory = instance.memory_bytes();
    let tail = memory
        .get(offset as usize..)
        .ok_or_else(|| Error::new(ErrorKind::OutOfBoundsMemory))?;
    let len = tail
        .iter()
        .position(|byte| *byte == 0)
        .ok_or_else(|| Error::new(ErrorKind::OutOfBoundsMemory))?;
    let text = String::from_utf8_lossy(&tail[..len]);
    print!("print_str: {}", text);
    Ok(None)
}

fn abort(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let code: i32 = args.nth_checked(0)?;
    Err(Error::with_extra(ErrorKind::EnvAbort, format!("({})", code)))
}

fn exit(instance: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let code: i32 = args.nth_checked(0)?;
    Err(instance.exit(code))
}

/// The native side of the gas import.
///
/// Direct `call`s to the designated gas function never get here (the
/// interpreter intercepts them); this body keeps indirect calls and
/// non-designated uses of `env.gas` exact.
fn gas(instance: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
    let delta: i64 = args.nth_checked(0)?;
    instance.charge_gas(delta as u64)?;
    Ok(None)
}

/// Builds the built-in `env` host module.
pub fn env_module() -> HostModule {
    let mut module = HostModule::new("env");
    let funcs = [
        HostFuncDesc::new("print_i32", vec![ValueType::I32], None, print_i32),
        HostFuncDesc::new("print_i64", vec![ValueType::I64], None, print_i64),
        HostFuncDesc::new("print_f32", vec![ValueType::F32], None, print_f32),
        HostFuncDesc::new("print_f64", vec![ValueType::F64], None, print_f64),
        HostFuncDesc::new("print_str", vec![ValueType::I32], None, print_str),
        HostFuncDesc::new("abort", vec![ValueType::I32], None, abort),
        HostFuncDesc::new("exit", vec![ValueType::I32], None, exit),
        HostFuncDesc::new("gas", vec![ValueType::I64], None, gas),
    ];
    for desc in funcs {
        module
            .add_func(desc)
            .expect("builtin function names are unique");
    }
    module
}

#[cfg(feature = "spectest")]
mod spectest {
    use super::*;

    fn print(_: &mut Instance, _: HostArgs) -> Result<Option<Value>, Error> {
        Ok(None)
    }

    fn print_i32(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
        let value: i32 = args.nth_checked(0)?;
        println!("{:#x}:i32", value);
        Ok(None)
    }

    fn print_f32(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
        let value: f32 = args.nth_checked(0)?;
        println!("{}:f32", value);
        Ok(None)
    }

    fn print_f64(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
        let value: f64 = args.nth_checked(0)?;
        println!("{}:f64", value);
        Ok(None)
    }

    fn print_i32_f32(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
        let a: i32 = args.nth_checked(0)?;
        let b: f32 = args.nth_checked(1)?;
        println!("{:#x}:i32\n{}:f32", a, b);
        Ok(None)
    }

    fn print_f64_f64(_: &mut Instance, args: HostArgs) -> Result<Option<Value>, Error> {
        let a: f64 = args.nth_checked(0)?;
        let b: f64 = args.nth_checked(1)?;
        println!("{}:f64\n{}:f64", a, b);
        Ok(None)
    }

    /// Builds the conventional `spectest` host module.
    pub fn spectest_module() -> HostModule {
        let mut module = HostModule::new("spectest");
        let funcs = [
            HostFuncDesc::new("print", vec![], None, print),
            HostFuncDesc::new("print_i32", vec![ValueType::I32], None, print_i32),
            HostFuncDesc::new("print_f32", vec![ValueType::F32], None, print_f32),
            HostFuncDesc::new("print_f64", vec![ValueType::F64], None, print_f64),
            HostFuncDesc::new(
                "print_i32_f32",
                vec![ValueType::I32, ValueType::F32],
                None,
                print_i32_f32,
            ),
            HostFuncDesc::new(
                "print_f64_f64",
                vec![ValueType::F64, ValueType::F64],
                None,
                print_f64_f64,
            ),
        ];
        for desc in funcs {
            module
                .add_func(desc)
                .expect("builtin function names are unique");
        }
        module
    }

    /// The global values the spec-test host is expected to provide.
    pub(crate) fn spectest_global(module: &str, field: &str) -> Option<(ValueType, u64)> {
        if module != "spectest" {
            return None;
        }
        match field {
            "global_i32" => Some((ValueType::I32, 666)),
            "global_i64" => Some((ValueType::I64, 666)),
            "global_f32" => Some((ValueType::F32, 666.6f32.to_bits() as u64)),
            "global_f64" => Some((ValueType::F64, 666.6f64.to_bits())),
            _ => None,
        }
    }
}

#[cfg(feature = "spectest")]
pub use self::spectest::spectest_module;
#[cfg(feature = "spectest")]
pub(crate) use self::spectest::spectest_global;
