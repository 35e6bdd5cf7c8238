//! Runtime and pipeline error types.

use std::{error::Error as StdError, fmt, io};
use thiserror::Error;

use crate::asm::Instruction;

/// Reasons the interpreter can raise a recoverable panic instead of halting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
#[non_exhaustive]
pub enum PanicReason {
    /// The byte can't be mapped to any known reason.
    UnknownPanicReason = 0x00,
    /// `alloc` returned 0: no free block large enough was found.
    OutOfMemory = 0x01,
    /// An effective address fell outside the heap and wasn't whitelisted.
    InvalidAddress = 0x02,
    /// A memory access would cross the heap's upper bound.
    MemoryOverflow = 0x03,
    /// Division or modulo by zero.
    DivideByZero = 0x04,
    /// An `ffi` instruction referenced an unregistered signature id.
    InvalidFfiCall = 0x05,
    /// A write targeted a reserved (non-writable) register.
    ReservedRegisterNotWritable = 0x06,
    /// An instruction referenced a register index outside its register file.
    InvalidRegister = 0x07,
    /// A float operation was attempted at a size other than dword/qword.
    InvalidFloatSize = 0x08,
    /// `swi` referenced an interrupt vector slot outside the table.
    InvalidInterruptVector = 0x09,
    /// The opcode byte didn't decode to any known instruction.
    InvalidOpcode = 0x0a,
    /// Explicit `exit` instruction (not actually an error; reported so
    /// callers can distinguish a deliberate stop from other halts).
    Exited = 0x0b,
}

impl fmt::Display for PanicReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StdError for PanicReason {}

/// Runtime error description: either a protocol-specified panic with a
/// well-formed fallback, or an unspecified condition that must halt
/// execution.
#[derive(Debug)]
pub enum RuntimeError {
    /// Specified error with well-formed fallback strategy (a trap).
    Recoverable(PanicReason),
    /// Unspecified error that should halt the execution.
    Halt(io::Error),
}

impl RuntimeError {
    /// Whether this error is recoverable via a registered trap handler.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Recoverable(_))
    }

    /// Whether this error must halt execution regardless of trap handlers.
    pub const fn must_halt(&self) -> bool {
        matches!(self, Self::Halt(_))
    }

    /// Build a halting error from any type convertible to [`io::Error`].
    pub fn from_io<E>(e: E) -> Self
    where
        E: Into<io::Error>,
    {
        Self::Halt(e.into())
    }
}

impl From<PanicReason> for RuntimeError {
    fn from(r: PanicReason) -> Self {
        RuntimeError::Recoverable(r)
    }
}

impl From<io::Error> for RuntimeError {
    fn from(e: io::Error) -> Self {
        RuntimeError::Halt(e)
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable(e) => e.fmt(f),
            Self::Halt(e) => e.fmt(f),
        }
    }
}

impl StdError for RuntimeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Recoverable(e) => Some(e),
            Self::Halt(e) => Some(e),
        }
    }
}

/// The outcome of a trapped instruction: which reason, and at which
/// instruction it occurred — mirrors `fuel_asm::InstructionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanicInstruction {
    reason: PanicReason,
    instruction: Instruction,
}

impl PanicInstruction {
    /// Pair a reason with the instruction that caused it.
    pub const fn new(reason: PanicReason, instruction: Instruction) -> Self {
        Self {
            reason,
            instruction,
        }
    }

    /// The panic reason.
    pub const fn reason(&self) -> &PanicReason {
        &self.reason
    }

    /// The instruction that panicked.
    pub const fn instruction(&self) -> &Instruction {
        &self.instruction
    }
}

/// Top-level error returned by the interpreter's public API.
#[derive(Debug, Error)]
pub enum InterpreterError {
    /// Execution resulted in a well-formed panic caused by an instruction.
    #[error("execution panicked: {0:?}")]
    PanicInstruction(PanicInstruction),
    /// Unrecoverable I/O-level error (also used for "should halt" runtime
    /// errors with no natural I/O origin).
    #[error("unrecoverable error: {0}")]
    Io(#[from] io::Error),
}

impl InterpreterError {
    /// Classify a [`RuntimeError`] raised while executing `instruction`.
    pub fn from_runtime(error: RuntimeError, instruction: Instruction) -> Self {
        match error {
            RuntimeError::Recoverable(reason) => {
                Self::PanicInstruction(PanicInstruction::new(reason, instruction))
            }
            RuntimeError::Halt(e) => Self::Io(e),
        }
    }

    /// The panic reason that caused this error, if applicable.
    pub const fn panic_reason(&self) -> Option<&PanicReason> {
        match self {
            Self::PanicInstruction(p) => Some(p.reason()),
            Self::Io(_) => None,
        }
    }
}

/// A diagnostic emitted by the encoder or assembler pipeline.
///
/// Codes `A001..A005` are assembler diagnostics; `B003..B014` are
/// encoder/decoder diagnostics (bounds, alignment, and size checks).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Diagnostic {
    /// Short machine-readable code, e.g. `"B003"`.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl Diagnostic {
    /// Construct a new diagnostic.
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// An accumulating bag of diagnostics, returned by every pipeline stage.
///
/// Mirrors the `result` object named in spec §6: the sole error channel
/// for the assembler pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiagnosticBag {
    entries: Vec<Diagnostic>,
}

impl DiagnosticBag {
    /// An empty diagnostic bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic.
    pub fn error(&mut self, code: &'static str, message: impl Into<String>) {
        self.entries.push(Diagnostic::new(code, message));
    }

    /// Whether any diagnostics were recorded.
    pub fn is_failed(&self) -> bool {
        !self.entries.is_empty()
    }

    /// The recorded diagnostics, in emission order.
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }
}

impl fmt::Display for DiagnosticBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{d}")?;
        }
        Ok(())
    }
}
