//! The engine's closed error taxonomy.
//!
//! Every failure the engine can report is one of the [`ErrorKind`] variants
//! below, tagged with the [`ErrorPhase`] that raised it and a static message.
//! Dynamic context (an index, a name, a diagnostic) travels in the optional
//! extra message. Two errors are considered equal when their kinds are equal.

use crate::host_error::HostError;
use core::fmt;
use std::sync::Arc;

/// The phase of the engine that raised an error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorPhase {
    /// Binary decoding and validation of a module.
    Load,
    /// Turning a loaded module into a runnable instance.
    Instantiation,
    /// Preparing code for execution (reserved for JIT back-ends).
    Compilation,
    /// Argument marshalling and export lookup before entering the interpreter.
    BeforeExecution,
    /// A trap raised while running Wasm code or a host function.
    Execution,
}

impl ErrorPhase {
    fn prefix(self) -> &'static str {
        match self {
            ErrorPhase::Load => "load error: ",
            ErrorPhase::Instantiation => "instantiation error: ",
            ErrorPhase::Compilation => "compilation error: ",
            ErrorPhase::Execution => "execution error: ",
            ErrorPhase::BeforeExecution => "runtime error: ",
        }
    }
}

macro_rules! define_error_kinds {
    ( $( $phase:ident => { $( $name:ident : $message:expr, )* } )* ) => {
        /// Kind of an engine [`Error`].
        ///
        /// The set is closed: embedders cannot extend it. Host-specific
        /// failures are carried behind [`ErrorKind::Host`] with an attached
        /// [`HostError`] payload.
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[allow(missing_docs)]
        pub enum ErrorKind {
            $( $( $name, )* )*
        }

        impl ErrorKind {
            /// The phase that raises this kind of error.
            pub fn phase(self) -> ErrorPhase {
                match self {
                    $( $( ErrorKind::$name => ErrorPhase::$phase, )* )*
                }
            }

            /// The static message associated with this kind.
            pub fn message(self) -> &'static str {
                match self {
                    $( $( ErrorKind::$name => $message, )* )*
                }
            }
        }
    };
}

define_error_kinds! {
    Load => {
        MagicNotDetected: "magic header not detected",
        VersionNotSupported: "unknown binary version",
        UnexpectedEnd: "unexpected end of section or function",
        SectionSizeTooLarge: "section size too large",
        SectionSizeMismatch: "section size mismatch",
        SectionOutOfOrder: "section out of order",
        DuplicateSection: "duplicate section",
        JunkAfterLastSection: "junk after last section",
        LebIntTooLong: "integer representation too long",
        LebIntTooLarge: "integer too large",
        InvalidUtf8: "invalid UTF-8 encoding",
        NameTooLong: "name too long",
        InvalidTypeForm: "unexpected type form",
        InvalidValueType: "invalid value type",
        InvalidBlockType: "invalid block type",
        InvalidMutability: "invalid mutability",
        InvalidLimitFlags: "invalid limits flags",
        InvalidImportKind: "invalid import kind",
        InvalidExportKind: "invalid export kind",
        InvalidInitExpr: "constant expression required",
        InvalidElemType: "invalid table element type",
        InvalidAlignment: "alignment must not be larger than natural",
        ZeroByteExpected: "zero byte expected",
        UnsupportedOpcode: "unsupported opcode",
        EndOpcodeExpected: "END opcode expected",
        FunctionSizeMismatch: "function body size mismatch",
        CodeCountMismatch: "function and code section have inconsistent lengths",
        DataCountMismatch: "data count and data section have inconsistent lengths",
        InvalidNameSection: "malformed name section",
        TooManyTypes: "too many types",
        TooManyParams: "too many parameters",
        TooManyReturns: "too many return values",
        TooManyImports: "too many imports",
        TooManyFunctions: "too many functions",
        TooManyTables: "multiple tables",
        TooManyMemories: "multiple memories",
        TooManyGlobals: "too many globals",
        TooManyExports: "too many exports",
        TooManyElemSegments: "too many element segments",
        TooManyDataSegments: "too many data segments",
        TooManyLocals: "too many locals",
        TooManyItems: "too many items",
        ModuleSizeTooLarge: "module size too large",
        FunctionSizeTooLarge: "function size too large",
        TableSizeTooLarge: "table size too large",
        MemoryPagesTooLarge: "memory size must be at most 65536 pages",
        DataSectionTooLarge: "total size of data segments too large",
        MinGreaterThanMax: "size minimum must not be greater than maximum",
        UnknownType: "unknown type",
        UnknownFunction: "unknown function",
        UnknownTable: "unknown table",
        UnknownMemory: "unknown memory",
        UnknownGlobal: "unknown global",
        UnknownLocal: "unknown local",
        TypeMismatch: "type mismatch",
        BrTableTargetTypeMismatch: "type mismatch in br_table targets",
        UnbalancedIfElse: "else branch expected",
        OperandStackUnderflow: "operand stack underflow",
        GlobalIsImmutable: "global is immutable",
        InvalidStartFunction: "invalid start function type",
        DuplicateExportName: "duplicate export name",
        UnknownImport: "unknown import",
        IncompatibleImportType: "incompatible import type",
        UnsupportedImport: "unsupported import",
        SymbolAllocFailed: "failed to allocate symbol",
        DuplicateHostModule: "host module already registered",
        DuplicateHostFunction: "duplicate host function name",
        OutOfMemory: "out of memory",
    }
    Instantiation => {
        MemorySizeTooLarge: "memory size too large",
        ElemSegmentDoesNotFit: "elements segment does not fit",
        DataSegmentDoesNotFit: "data segment does not fit",
        AllocationFailed: "allocation failed",
    }
    Compilation => {
        UnsupportedRunMode: "unsupported run mode",
    }
    BeforeExecution => {
        FunctionNotFound: "function not found",
        ArgumentCountMismatch: "argument count mismatch",
        ArgumentTypeMismatch: "argument type mismatch",
    }
    Execution => {
        Unreachable: "unreachable",
        OutOfBoundsMemory: "out of bounds memory access",
        IntegerOverflow: "integer overflow",
        IntegerDivByZero: "integer divide by zero",
        InvalidConversionToInteger: "invalid conversion to integer",
        UndefinedElement: "undefined element",
        UninitializedElement: "uninitialized element",
        IndirectCallTypeMismatch: "indirect call type mismatch",
        CallStackExhausted: "call stack exhausted",
        GasLimitExceeded: "gas limit exceeded",
        InstanceExit: "instance exit",
        EnvAbort: "env.abort called",
        Host: "host error",
    }
}

/// An engine error: a kind, the phase it was raised in, and optional context.
///
/// The phase defaults to the kind's natural phase but can be re-tagged, e.g.
/// a memory-allocation failure surfaces as a load error while loading and as
/// an instantiation error while instantiating.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    phase: ErrorPhase,
    extra: Option<String>,
    host: Option<Arc<dyn HostError>>,
}

impl Error {
    /// Creates a new error of the given kind in its natural phase.
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            phase: kind.phase(),
            extra: None,
            host: None,
        }
    }

    /// Creates a new error carrying a dynamic extra message, e.g. `"#42"`.
    pub fn with_extra(kind: ErrorKind, extra: impl Into<String>) -> Self {
        Error {
            kind,
            phase: kind.phase(),
            extra: Some(extra.into()),
            host: None,
        }
    }

    /// Wraps an embedder-defined error as an execution trap.
    pub fn host(error: impl HostError) -> Self {
        Error {
            kind: ErrorKind::Host,
            phase: ErrorPhase::Execution,
            extra: Some(error.to_string()),
            host: Some(Arc::new(error)),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the phase this error was raised in.
    pub fn phase(&self) -> ErrorPhase {
        self.phase
    }

    /// Re-tags the phase, keeping kind and messages.
    pub fn with_phase(mut self, phase: ErrorPhase) -> Self {
        self.phase = phase;
        self
    }

    /// Returns the static message of this error.
    pub fn message(&self) -> &'static str {
        self.kind.message()
    }

    /// Returns the dynamic extra message, if any.
    pub fn extra_message(&self) -> Option<&str> {
        self.extra.as_deref()
    }

    /// Attaches (or replaces) the dynamic extra message.
    pub fn set_extra_message(&mut self, extra: impl Into<String>) {
        self.extra = Some(extra.into());
    }

    /// Returns the attached [`HostError`] if this error carries one.
    pub fn as_host_error(&self) -> Option<&dyn HostError> {
        self.host.as_deref()
    }

    /// Renders the error, optionally prefixed with its phase label.
    ///
    /// With the prefix this yields strings such as
    /// `"execution error: call stack exhausted"`.
    pub fn formatted_message(&self, with_prefix: bool) -> String {
        let mut out = String::new();
        if with_prefix {
            out.push_str(self.phase.prefix());
        }
        out.push_str(self.message());
        if let Some(extra) = &self.extra {
            out.push(' ');
            out.push_str(extra);
        }
        out
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        self.kind == other.kind
    }
}

impl PartialEq<ErrorKind> for Error {
    fn eq(&self, other: &ErrorKind) -> bool {
        self.kind == *other
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error::new(kind)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.formatted_message(true))
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_attached_to_kinds() {
        assert_eq!(ErrorKind::MagicNotDetected.phase(), ErrorPhase::Load);
        assert_eq!(ErrorKind::DataSegmentDoesNotFit.phase(), ErrorPhase::Instantiation);
        assert_eq!(ErrorKind::GasLimitExceeded.phase(), ErrorPhase::Execution);
    }

    #[test]
    fn formatting_matches_phase_prefix() {
        let err = Error::new(ErrorKind::CallStackExhausted);
        assert_eq!(
            err.formatted_message(true),
            "execution error: call stack exhausted"
        );
        assert_eq!(err.formatted_message(false), "call stack exhausted");
    }

    #[test]
    fn extra_message_is_appended() {
        let err = Error::with_extra(ErrorKind::UnknownFunction, "#42");
        assert_eq!(err.formatted_message(true), "load error: unknown function #42");
    }

    #[test]
    fn equality_is_by_kind() {
        let a = Error::with_extra(ErrorKind::TypeMismatch, "at opcode 3");
        let b = Error::new(ErrorKind::TypeMismatch);
        assert_eq!(a, b);
        assert_ne!(a, Error::new(ErrorKind::UnknownType));
    }
}
