//! The `wasmet` command line interface: runs an exported function of a Wasm
//! module under the interpreter, with optional gas metering.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use wasmet::{builtins, Config, ErrorKind, Isolation, Runtime, Value, ValueType};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Gas-metered WebAssembly interpreter")]
struct Args {
    /// The file containing the WebAssembly module to execute.
    #[clap(value_name = "WASM_FILE", value_hint = clap::ValueHint::FilePath)]
    wasm_file: PathBuf,

    /// The exported function to invoke.
    #[clap(short = 'f', long = "func", value_name = "NAME", default_value = "_start")]
    func: String,

    /// Arguments passed to the entry function, parsed against its signature.
    #[clap(long = "args", value_name = "ARG", num_args = 0.., allow_hyphen_values = true)]
    args: Vec<String>,

    /// Gas budget of the instance; metering applies when the module
    /// designates a gas function.
    #[clap(long = "gas-limit", value_name = "N", default_value_t = 0)]
    gas_limit: u64,

    /// Log filter, e.g. `warn`, `debug` or `wasmet=trace`.
    #[clap(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    /// Execution mode. Only `interp` is built into this binary.
    #[clap(long = "mode", value_name = "MODE", default_value = "interp")]
    mode: String,

    /// Force the heap memory strategy instead of virtual memory.
    #[clap(long = "no-memory-map")]
    no_memory_map: bool,

    /// Record and report per-phase timings.
    #[clap(long = "stats")]
    stats: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(code) => ExitCode::from(code as u8),
        Err(error) => {
            eprintln!("wasmet: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<i32> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_level))
        .with_writer(std::io::stderr)
        .init();

    let config = Config {
        mode: args.mode.parse().map_err(|e| anyhow!("{}", e))?,
        disable_wasm_memory_map: args.no_memory_map,
        enable_statistics: args.stats,
        ..Config::default()
    };
    let runtime = Runtime::new(config)?;
    runtime.register_host_module(builtins::env_module())?;

    let bytes = std::fs::read(&args.wasm_file)
        .with_context(|| format!("failed to read {}", args.wasm_file.display()))?;
    let hint = args
        .wasm_file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let module = runtime.load_module(bytes, &hint)?;

    let mut isolation = Isolation::new(&runtime);
    let handle = isolation.instantiate(&module, args.gas_limit)?;

    let Some(func_idx) = module.export_func(&args.func) else {
        let exported: Vec<&str> = module
            .exports()
            .filter(|(_, kind, _)| *kind == wasmet::ExternalKind::Func)
            .map(|(name, _, _)| name)
            .collect();
        bail!(
            "no exported function {:?}; module exports: {:?}",
            args.func,
            exported
        );
    };

    let func_type = module.func_type(func_idx);
    if args.args.len() != func_type.params().len() {
        bail!(
            "{:?} takes {} argument(s), {} given",
            args.func,
            func_type.params().len(),
            args.args.len()
        );
    }
    let call_args = args
        .args
        .iter()
        .zip(func_type.params())
        .map(|(text, ty)| parse_arg(text, *ty))
        .collect::<Result<Vec<Value>>>()?;

    let result = {
        let instance = isolation
            .instance_mut(handle)
            .expect("freshly instantiated handle is live");
        instance.call_function_by_index(func_idx, &call_args)
    };

    if args.stats {
        report_statistics(&runtime);
    }

    match result {
        Ok(values) => {
            for value in values {
                println!("{}", value);
            }
            Ok(0)
        }
        Err(error) if error.kind() == ErrorKind::InstanceExit => {
            let code = isolation
                .instance(handle)
                .expect("handle is live")
                .exit_code();
            Ok(code)
        }
        Err(error) => {
            eprintln!("wasmet: {}", error);
            Ok(1)
        }
    }
}

fn parse_arg(text: &str, ty: ValueType) -> Result<Value> {
    let parse_int = |text: &str| -> Result<i64> {
        if let Some(hex) = text.strip_prefix("0x") {
            Ok(i64::from_str_radix(hex, 16)?)
        } else if let Some(hex) = text.strip_prefix("-0x") {
            Ok(-i64::from_str_radix(hex, 16)?)
        } else {
            Ok(text.parse::<i64>()?)
        }
    };
    let value = match ty {
        ValueType::I32 => Value::I32(parse_int(text).context("invalid i32 argument")? as i32),
        ValueType::I64 => Value::I64(parse_int(text).context("invalid i64 argument")?),
        ValueType::F32 => Value::from(text.parse::<f32>().context("invalid f32 argument")?),
        ValueType::F64 => Value::from(text.parse::<f64>().context("invalid f64 argument")?),
    };
    Ok(value)
}

fn report_statistics(runtime: &Runtime) {
    let Some(stats) = runtime.statistics() else {
        return;
    };
    let (loads, load_time) = stats.load();
    let (instantiations, instantiate_time) = stats.instantiate();
    let (calls, execute_time) = stats.execute();
    eprintln!(
        "phase statistics: load {}x {:?}, instantiate {}x {:?}, execute {}x {:?}",
        loads, load_time, instantiations, instantiate_time, calls, execute_time
    );
}
