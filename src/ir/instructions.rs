//! Instruction opcodes and their operand formats.
//!
//! Every [`InstructionData`] variant corresponds to one of the formats
//! enumerated in the data model: `nullary`, `unary`, `unary_imm`, `binary`,
//! `int_compare`/`float_compare`, `branch`, `jump`, `call`, `load`, `store`,
//! `stack_alloc`, `return`, plus the I128 pseudo-ops and the TLS op.

use core::fmt::{self, Display, Formatter};
use smallvec::SmallVec;

use super::condcodes::{FloatCC, IntCC};
use super::entities::{Block, SigRef, StackSlot, Value};
use super::immediates::{Ieee64, Imm64};
use super::memflags::MemFlags;
use super::types::Type;

/// The operation an instruction performs. Many opcodes share the same
/// operand shape (e.g. `Iadd`/`Isub`/`Imul` are all [`InstructionData::Binary`]);
/// the opcode distinguishes them for the verifier, optimizer and lowering.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum Opcode {
    // -- nullary --
    Iconst,
    Fconst,

    // -- unary --
    Ineg,
    Fneg,
    Sextend,
    Uextend,
    Ireduce,
    Fpromote,
    Fdemote,
    Bitcast,
    Bmask,
    FcvtToSint,
    FcvtToUint,
    FcvtFromSint,
    FcvtFromUint,

    // -- binary --
    Iadd,
    Isub,
    Imul,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Iand,
    Ior,
    Ixor,
    Ishl,
    Ushr,
    Sshr,
    Fadd,
    Fsub,
    Fmul,
    Fdiv,

    // -- comparisons --
    Icmp,
    Fcmp,

    // -- control flow --
    Brif,
    Jump,
    Select,

    // -- memory --
    Load,
    Store,
    StackAlloc,

    // -- calls/returns --
    Call,
    Return,

    // -- I128 pseudo-ops --
    Iconcat,
    Isplit,

    // -- thread-local storage --
    TlsValue,
}

impl Opcode {
    /// True for the opcodes whose `Binary` form is a basic commutative or
    /// associative integer operator, eligible for e-graph AC-canonicalization.
    pub fn is_commutative(self) -> bool {
        matches!(self, Opcode::Iadd | Opcode::Imul | Opcode::Iand | Opcode::Ior | Opcode::Ixor)
    }

    pub fn is_associative(self) -> bool {
        matches!(self, Opcode::Iadd | Opcode::Iand | Opcode::Ior | Opcode::Ixor)
    }

    /// True for opcodes that can trap, write memory, or otherwise must not
    /// be deduplicated or reordered across side effects.
    pub fn has_side_effects(self) -> bool {
        matches!(
            self,
            Opcode::Load
                | Opcode::Store
                | Opcode::Call
                | Opcode::Return
                | Opcode::Brif
                | Opcode::Jump
                | Opcode::StackAlloc
                | Opcode::Udiv
                | Opcode::Sdiv
                | Opcode::Urem
                | Opcode::Srem
        )
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            Opcode::Iconst => "iconst",
            Opcode::Fconst => "fconst",
            Opcode::Ineg => "ineg",
            Opcode::Fneg => "fneg",
            Opcode::Sextend => "sextend",
            Opcode::Uextend => "uextend",
            Opcode::Ireduce => "ireduce",
            Opcode::Fpromote => "fpromote",
            Opcode::Fdemote => "fdemote",
            Opcode::Bitcast => "bitcast",
            Opcode::Bmask => "bmask",
            Opcode::FcvtToSint => "fcvt_to_sint",
            Opcode::FcvtToUint => "fcvt_to_uint",
            Opcode::FcvtFromSint => "fcvt_from_sint",
            Opcode::FcvtFromUint => "fcvt_from_uint",
            Opcode::Iadd => "iadd",
            Opcode::Isub => "isub",
            Opcode::Imul => "imul",
            Opcode::Udiv => "udiv",
            Opcode::Sdiv => "sdiv",
            Opcode::Urem => "urem",
            Opcode::Srem => "srem",
            Opcode::Iand => "iand",
            Opcode::Ior => "ior",
            Opcode::Ixor => "ixor",
            Opcode::Ishl => "ishl",
            Opcode::Ushr => "ushr",
            Opcode::Sshr => "sshr",
            Opcode::Fadd => "fadd",
            Opcode::Fsub => "fsub",
            Opcode::Fmul => "fmul",
            Opcode::Fdiv => "fdiv",
            Opcode::Icmp => "icmp",
            Opcode::Fcmp => "fcmp",
            Opcode::Brif => "brif",
            Opcode::Jump => "jump",
            Opcode::Select => "select",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::StackAlloc => "stack_alloc",
            Opcode::Call => "call",
            Opcode::Return => "return",
            Opcode::Iconcat => "iconcat",
            Opcode::Isplit => "isplit",
            Opcode::TlsValue => "tls_value",
        };
        f.write_str(s)
    }
}

/// A jump target together with the block-parameter arguments passed to it;
/// this is how block parameters ("phi" nodes) get their values.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct BlockCall {
    pub block: Block,
    pub args: SmallVec<[Value; 4]>,
}

impl BlockCall {
    pub fn new(block: Block, args: impl IntoIterator<Item = Value>) -> Self {
        Self { block, args: args.into_iter().collect() }
    }
}

/// The operand payload of an instruction, tagged by shape as described in
/// the data model (§3). `opcode` distinguishes operations that share a
/// shape (e.g. every integer binary op is `Binary`).
#[derive(Clone, PartialEq, Debug)]
pub enum InstructionData {
    Nullary { opcode: Opcode, imm: Imm64 },
    NullaryFloat { opcode: Opcode, imm: Ieee64 },
    Unary { opcode: Opcode, arg: Value },
    UnaryImm { opcode: Opcode, imm: Imm64 },
    Binary { opcode: Opcode, args: [Value; 2] },
    IntCompare { cond: IntCC, args: [Value; 2] },
    FloatCompare { cond: FloatCC, args: [Value; 2] },
    Branch { cond: Value, then_dest: BlockCall, else_dest: BlockCall },
    Jump { dest: BlockCall },
    Select { cond: Value, if_true: Value, if_false: Value },
    Call { sig: SigRef, args: SmallVec<[Value; 4]> },
    Load { ty: Type, addr: Value, offset: i32, flags: MemFlags },
    Store { addr: Value, value: Value, offset: i32, flags: MemFlags },
    StackAlloc { slot: StackSlot, size: u32, align: u8 },
    Return { args: SmallVec<[Value; 4]> },
    Iconcat { lo: Value, hi: Value },
    Isplit { arg: Value },
    TlsValue { offset: i64 },
}

impl InstructionData {
    pub fn opcode(&self) -> Opcode {
        match self {
            InstructionData::Nullary { opcode, .. } => *opcode,
            InstructionData::NullaryFloat { opcode, .. } => *opcode,
            InstructionData::Unary { opcode, .. } => *opcode,
            InstructionData::UnaryImm { opcode, .. } => *opcode,
            InstructionData::Binary { opcode, .. } => *opcode,
            InstructionData::IntCompare { .. } => Opcode::Icmp,
            InstructionData::FloatCompare { .. } => Opcode::Fcmp,
            InstructionData::Branch { .. } => Opcode::Brif,
            InstructionData::Jump { .. } => Opcode::Jump,
            InstructionData::Select { .. } => Opcode::Select,
            InstructionData::Call { .. } => Opcode::Call,
            InstructionData::Load { .. } => Opcode::Load,
            InstructionData::Store { .. } => Opcode::Store,
            InstructionData::StackAlloc { .. } => Opcode::StackAlloc,
            InstructionData::Return { .. } => Opcode::Return,
            InstructionData::Iconcat { .. } => Opcode::Iconcat,
            InstructionData::Isplit { .. } => Opcode::Isplit,
            InstructionData::TlsValue { .. } => Opcode::TlsValue,
        }
    }

    /// The argument `Value`s read by this instruction, in operand order.
    /// Does not include block-call arguments of terminators; see
    /// [`Self::outgoing_block_args`] for those.
    pub fn args(&self) -> SmallVec<[Value; 4]> {
        match self {
            InstructionData::Nullary { .. } | InstructionData::NullaryFloat { .. } | InstructionData::UnaryImm { .. } => {
                SmallVec::new()
            }
            InstructionData::Unary { arg, .. } => SmallVec::from_slice(&[*arg]),
            InstructionData::Binary { args, .. } => SmallVec::from_slice(args),
            InstructionData::IntCompare { args, .. } => SmallVec::from_slice(args),
            InstructionData::FloatCompare { args, .. } => SmallVec::from_slice(args),
            InstructionData::Branch { cond, .. } => SmallVec::from_slice(&[*cond]),
            InstructionData::Jump { .. } => SmallVec::new(),
            InstructionData::Select { cond, if_true, if_false } => {
                SmallVec::from_slice(&[*cond, *if_true, *if_false])
            }
            InstructionData::Call { args, .. } => args.clone(),
            InstructionData::Load { addr, .. } => SmallVec::from_slice(&[*addr]),
            InstructionData::Store { addr, value, .. } => SmallVec::from_slice(&[*addr, *value]),
            InstructionData::StackAlloc { .. } => SmallVec::new(),
            InstructionData::Return { args } => args.clone(),
            InstructionData::Iconcat { lo, hi } => SmallVec::from_slice(&[*lo, *hi]),
            InstructionData::Isplit { arg } => SmallVec::from_slice(&[*arg]),
            InstructionData::TlsValue { .. } => SmallVec::new(),
        }
    }

    /// The block-call arguments passed along each outgoing edge of a
    /// terminator (used to type-check block-parameter arity, §3 invariant 2).
    pub fn outgoing_block_calls(&self) -> SmallVec<[&BlockCall; 2]> {
        match self {
            InstructionData::Branch { then_dest, else_dest, .. } => {
                SmallVec::from_slice(&[then_dest, else_dest])
            }
            InstructionData::Jump { dest } => SmallVec::from_slice(&[dest]),
            _ => SmallVec::new(),
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, InstructionData::Branch { .. } | InstructionData::Jump { .. } | InstructionData::Return { .. })
    }
}
