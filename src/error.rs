//! The error taxonomy for every pipeline stage (§7).
//!
//! Every stage fails fast with a typed error carrying the offending entity.
//! Nothing is retried and nothing is silently swallowed: a compile produces
//! either a [`crate::binemit::Code`] or exactly one of these errors.

use core::fmt;

use crate::ir::{Block, CallConv, Inst, Opcode, Type, Value};
use crate::regalloc::RegClass;

/// Where inside a function an error was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Site {
    Value(Value),
    Inst(Inst),
    Block(Block),
    Function,
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Site::Value(v) => write!(f, "{v}"),
            Site::Inst(i) => write!(f, "{i}"),
            Site::Block(b) => write!(f, "{b}"),
            Site::Function => write!(f, "<function>"),
        }
    }
}

/// Errors produced while building a function from its textual form, used by
/// the (out-of-scope) parser collaborator. Exposed here because
/// `CodegenError::Build` carries them across the parser/back-end boundary.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("invalid type token at {0}")]
    InvalidType(String),
    #[error("invalid opcode token {0:?}")]
    InvalidOpcode(String),
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("expected {expected} operands, found {found}")]
    ArityMismatch { expected: usize, found: usize },
}

/// Errors produced by the verifier (§4.1).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerifierError {
    #[error("use of {0} does not dominate its definition")]
    DanglingUse(Site),
    #[error("type mismatch at {site}: expected {expected:?}, found {found:?}")]
    TypeMismatch { site: Site, expected: Type, found: Type },
    #[error("block {0} has no terminator")]
    UnterminatedBlock(Block),
    #[error("bad terminator at {0}")]
    BadTerminator(Site),
    #[error("{site}: expected {expected} arguments, found {found}")]
    ArityMismatch { site: Site, expected: usize, found: usize },
    #[error("use of undefined value at {0}")]
    UndefinedValue(Site),
    #[error("{0} is defined more than once")]
    DuplicateDefinition(Value),
    #[error("return at {0} does not match the function signature")]
    BadReturn(Site),
}

/// Errors produced while legalizing ops for a target profile (§4.3, §4.4).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LegalizeError {
    #[error("{opcode} is not supported on {target} for type {ty:?}")]
    UnsupportedOp { target: &'static str, opcode: Opcode, ty: Type },
    #[error("{ty:?} is not a legal vector shape on {target}")]
    UnsupportedVector { target: &'static str, ty: Type },
    #[error("{target} does not support the {call_conv} calling convention")]
    UnsupportedCallConv { target: &'static str, call_conv: CallConv },
}

/// Errors produced while lowering IR to machine instructions (§4.5).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    #[error("no lowering rule matched {opcode} for operand types {types:?}")]
    NoMatchingRule { opcode: Opcode, types: Vec<Type> },
    #[error("immediate {0} is not legal in this position")]
    IllegalImmediate(i64),
}

/// Errors produced by the register allocator (§4.6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegallocError {
    #[error("ran out of physical registers in class {0:?}")]
    OutOfRegisters(RegClass),
}

/// Errors produced by the encoder (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EncodingError {
    #[error("branch at offset {instruction} cannot reach displacement {displacement}")]
    BranchOutOfRange { instruction: u32, displacement: i64 },
}

/// The union of every stage's error, returned by [`crate::context::Context::compile`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    #[error("build error: {0}")]
    Build(#[from] BuildError),
    #[error("verification failed: {0}")]
    Verify(#[from] VerifierError),
    #[error("legalization failed: {0}")]
    Legalize(#[from] LegalizeError),
    #[error("lowering failed: {0}")]
    Lower(#[from] LowerError),
    #[error("register allocation failed: {0}")]
    Regalloc(#[from] RegallocError),
    #[error("encoding failed: {0}")]
    Encode(#[from] EncodingError),
}

pub type CodegenResult<T> = Result<T, CodegenError>;
