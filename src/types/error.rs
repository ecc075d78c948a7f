use crate::types::HostError;
use alloc::boxed::Box;
use core::fmt::Formatter;
use std::io;

/// A bytecode-visible fault. Each code maps to the canonical exception
/// message written into the module instance's exception buffer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TrapCode {
    UnreachableCodeReached,
    IntegerOverflow,
    IntegerDivisionByZero,
    BadConversionToInteger,
    MemoryOutOfBounds,
    TableOutOfBounds,
    IndirectCallToNull,
    BadSignature,
    UnsupportedOpcode,
    UnalignedAtomic,
    StackOverflow,
    AuxStackOverflow,
    AuxStackUnderflow,
    UnknownFunction,
    UnlinkedImportFunction,
    FindBlockAddrFailed,
    ExpectedSharedMemory,
    GrowthOperationLimited,
}

impl TrapCode {
    /// The canonical exception message for this trap.
    pub fn message(&self) -> &'static str {
        match self {
            TrapCode::UnreachableCodeReached => "unreachable",
            TrapCode::IntegerOverflow => "integer overflow",
            TrapCode::IntegerDivisionByZero => "integer divide by zero",
            TrapCode::BadConversionToInteger => "invalid conversion to integer",
            TrapCode::MemoryOutOfBounds => "out of bounds memory access",
            TrapCode::TableOutOfBounds => "undefined element",
            TrapCode::IndirectCallToNull => "uninitialized element",
            TrapCode::BadSignature => "indirect call type mismatch",
            TrapCode::UnsupportedOpcode => "unsupported opcode",
            TrapCode::UnalignedAtomic => "unaligned atomic",
            TrapCode::StackOverflow => "wasm operand stack overflow",
            TrapCode::AuxStackOverflow => "wasm auxiliary stack overflow",
            TrapCode::AuxStackUnderflow => "wasm auxiliary stack underflow",
            TrapCode::UnknownFunction => "unknown function",
            TrapCode::UnlinkedImportFunction => "failed to call unlinked import function",
            TrapCode::FindBlockAddrFailed => "find block address failed",
            TrapCode::ExpectedSharedMemory => "atomic wait on non-shared memory",
            TrapCode::GrowthOperationLimited => "growth operation limited",
        }
    }
}

impl core::fmt::Display for TrapCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.message())
    }
}

/// Errors surfaced by the restore engine before dispatch is entered.
#[derive(Debug)]
pub enum RestoreError {
    Io(io::Error),
    /// A file ended before its declared contents.
    UnexpectedEof(&'static str),
    /// An offset fell outside its declared range.
    MalformedOffset(&'static str),
    /// A type tag was neither 0 nor 1.
    MalformedTypeTag,
    /// The image was produced from a different module binary or
    /// pointer width.
    FingerprintMismatch,
    /// Frame records disagree with each other or with the module.
    FrameMismatch(&'static str),
}

impl From<io::Error> for RestoreError {
    fn from(err: io::Error) -> Self {
        RestoreError::Io(err)
    }
}

impl core::fmt::Display for RestoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            RestoreError::Io(err) => write!(f, "restore i/o failure: {err}"),
            RestoreError::UnexpectedEof(what) => write!(f, "unexpected end of image: {what}"),
            RestoreError::MalformedOffset(what) => write!(f, "malformed image offset: {what}"),
            RestoreError::MalformedTypeTag => write!(f, "malformed type tag in image"),
            RestoreError::FingerprintMismatch => write!(f, "image fingerprint mismatch"),
            RestoreError::FrameMismatch(what) => write!(f, "frame record mismatch: {what}"),
        }
    }
}

#[derive(Debug)]
pub enum WasmigError {
    TrapCode(TrapCode),
    /// A native import reported failure through the exception buffer.
    NativeFunctionFailed,
    HostInterruption(Box<dyn HostError>),
    /// The invocation was halted by a checkpoint request; the image has
    /// been written and this executor is terminal.
    Checkpointed,
    /// The executor was terminated through the thread manager.
    Terminated,
    Restore(RestoreError),
    CheckpointIo(io::Error),
    /// Checkpoint fired while a cross-module call boundary was live.
    CheckpointAcrossModuleBoundary,
}

impl core::fmt::Display for WasmigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            WasmigError::TrapCode(trap) => write!(f, "{trap}"),
            WasmigError::NativeFunctionFailed => write!(f, "native function failed"),
            WasmigError::HostInterruption(_) => write!(f, "host interruption"),
            WasmigError::Checkpointed => write!(f, "execution checkpointed"),
            WasmigError::Terminated => write!(f, "executor terminated"),
            WasmigError::Restore(err) => write!(f, "{err}"),
            WasmigError::CheckpointIo(err) => write!(f, "checkpoint i/o failure: {err}"),
            WasmigError::CheckpointAcrossModuleBoundary => {
                write!(f, "checkpoint across module boundary")
            }
        }
    }
}

impl From<TrapCode> for WasmigError {
    fn from(trap: TrapCode) -> Self {
        WasmigError::TrapCode(trap)
    }
}

impl From<RestoreError> for WasmigError {
    fn from(err: RestoreError) -> Self {
        WasmigError::Restore(err)
    }
}

impl WasmigError {
    pub fn as_trap(&self) -> Option<TrapCode> {
        match self {
            WasmigError::TrapCode(trap) => Some(*trap),
            _ => None,
        }
    }
}
