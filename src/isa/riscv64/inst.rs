//! The RV64GC machine-instruction set this back end lowers to (§4.5/§4.6):
//! one variant per instruction shape actually needed, plus the handful of
//! multi-word pseudo-instructions (`SelectSeq`, `Bmask`, the two-instruction
//! `IntCmp` forms) that stand in for operations RV64 has no single opcode
//! for.
//!
//! Grounded on the teacher's `isa::aarch64::inst::Inst`: the same "one
//! variant per addressing/operand shape" design and the same `MachInst`
//! `uses`/`defs` contract, applied to RV64's very different primitive set
//! (no condition flags, no hardware select, native compare-and-branch).

use smallvec::{smallvec, SmallVec};

use crate::ir::Block;
use crate::regalloc::VReg;

use super::legalize::{CondCodeR64, FloatCmpOp, IntCmpOp};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Width {
    W32,
    W64,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FpuSize {
    Size32,
    Size64,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ShiftOp {
    Sll,
    Srl,
    Sra,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FpuOp2 {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum MemSize {
    S8,
    S16,
    S32,
    S64,
}

impl MemSize {
    pub fn bytes(self) -> u32 {
        match self {
            MemSize::S8 => 1,
            MemSize::S16 => 2,
            MemSize::S32 => 4,
            MemSize::S64 => 8,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FcvtDir {
    FloatToSint,
    FloatToUint,
    SintToFloat,
    UintToFloat,
}

#[derive(Clone, Debug)]
pub enum Inst {
    Lui { rd: VReg, imm20: i32 },
    Addi { rd: VReg, rn: VReg, imm12: i16, width: Width },
    MovReg { rd: VReg, rn: VReg },
    Slli { rd: VReg, rn: VReg, shamt: u8, width: Width },
    AluRRR { op: AluOp, rd: VReg, rn: VReg, rm: VReg, width: Width },
    AluRRImm12 { op: AluOp, rd: VReg, rn: VReg, imm12: i16 },
    Mul { rd: VReg, rn: VReg, rm: VReg, width: Width },
    Div { rd: VReg, rn: VReg, rm: VReg, width: Width },
    Divu { rd: VReg, rn: VReg, rm: VReg, width: Width },
    Rem { rd: VReg, rn: VReg, rm: VReg, width: Width },
    Remu { rd: VReg, rn: VReg, rm: VReg, width: Width },
    ShiftRRR { op: ShiftOp, rd: VReg, rn: VReg, rm: VReg, width: Width },
    ShiftRRImm { op: ShiftOp, rd: VReg, rn: VReg, shamt: u8, width: Width },
    /// `rd = (rn <op> rm)` as `0`/`1`. `Eq`/`Ne` are two-instruction
    /// (`XOR`+`SLTIU`/`SLTU`) pseudo-forms; `Slt`/`Sltu` are the native
    /// single-instruction comparisons.
    IntCmp { op: IntCmpOp, rd: VReg, rn: VReg, rm: VReg },
    /// Logical complement of a `0`/`1` value (`XORI rd, rn, 1`), used to
    /// realize `sge`/`uge`/`sle`/`ule` from their `Slt`/`Sltu` counterpart.
    Not01 { rd: VReg, rn: VReg },
    Neg { rd: VReg, rn: VReg, width: Width },
    /// `rd = 0 - (rn != 0)`: an all-ones mask if `rn` is nonzero, else zero.
    Bmask { rd: VReg, rn: VReg, width: Width },
    Extend { rd: VReg, rn: VReg, signed: bool, from_bits: u8, width: Width },
    FpuRRR { op: FpuOp2, rd: VReg, rn: VReg, rm: VReg, size: FpuSize },
    FNeg { rd: VReg, rn: VReg, size: FpuSize },
    /// `rd = (rn <op> rm)` as `0`/`1`, native (`FEQ`/`FLT`/`FLE`).
    FloatCmp { op: FloatCmpOp, rd: VReg, rn: VReg, rm: VReg, size: FpuSize },
    /// A self-contained branch-based conditional move (§9: RV64 has no
    /// hardware select). Encoded as a fixed four-instruction sequence with
    /// compile-time-constant local displacements -- it never needs the
    /// `MachBuffer` block-fixup machinery, since its internal branch targets
    /// are known the moment this variant is emitted.
    SelectSeq { rd: VReg, cond: VReg, rn: VReg, rm: VReg, is_float: bool },
    Fcvt { rd: VReg, rn: VReg, dir: FcvtDir, int_width: Width, float_size: FpuSize },
    FMovGpr { rd: VReg, rn: VReg, to_float: bool, size: FpuSize },
    FcvtFp { rd: VReg, rn: VReg, widen: bool },
    FMovReg { rd: VReg, rn: VReg, size: FpuSize },
    StackAddr { rd: VReg, imm12: i16 },
    Load { rd: VReg, base: VReg, offset: i32, size: MemSize, signed: bool, is_float: bool },
    Store { base: VReg, src: VReg, offset: i32, size: MemSize, is_float: bool },
    Jump { target: Block },
    CondBr { cc: CondCodeR64, rs1: VReg, rs2: VReg, taken: Block },
    Ret,
    Call {
        symbol: String,
        int_args: SmallVec<[VReg; 8]>,
        float_args: SmallVec<[VReg; 8]>,
        int_rets: SmallVec<[VReg; 2]>,
        float_rets: SmallVec<[VReg; 2]>,
    },
    ReadThreadPointer { rd: VReg },
    Return { int_regs: SmallVec<[VReg; 4]>, float_regs: SmallVec<[VReg; 4]> },
}

impl crate::isa::MachInst for Inst {
    fn uses(&self) -> SmallVec<[VReg; 4]> {
        match self {
            Inst::Lui { .. } => smallvec![],
            Inst::Addi { rn, .. } => smallvec![*rn],
            Inst::MovReg { rn, .. } => smallvec![*rn],
            Inst::Slli { rn, .. } => smallvec![*rn],
            Inst::AluRRR { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::AluRRImm12 { rn, .. } => smallvec![*rn],
            Inst::Mul { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::Div { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::Divu { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::Rem { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::Remu { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::ShiftRRR { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::ShiftRRImm { rn, .. } => smallvec![*rn],
            Inst::IntCmp { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::Not01 { rn, .. } => smallvec![*rn],
            Inst::Neg { rn, .. } => smallvec![*rn],
            Inst::Bmask { rn, .. } => smallvec![*rn],
            Inst::Extend { rn, .. } => smallvec![*rn],
            Inst::FpuRRR { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::FNeg { rn, .. } => smallvec![*rn],
            Inst::FloatCmp { rn, rm, .. } => smallvec![*rn, *rm],
            Inst::SelectSeq { cond, rn, rm, .. } => smallvec![*cond, *rn, *rm],
            Inst::Fcvt { rn, .. } => smallvec![*rn],
            Inst::FMovGpr { rn, .. } => smallvec![*rn],
            Inst::FcvtFp { rn, .. } => smallvec![*rn],
            Inst::FMovReg { rn, .. } => smallvec![*rn],
            Inst::StackAddr { .. } => smallvec![],
            Inst::Load { base, .. } => smallvec![*base],
            Inst::Store { base, src, .. } => smallvec![*base, *src],
            Inst::Jump { .. } => smallvec![],
            Inst::CondBr { rs1, rs2, .. } => smallvec![*rs1, *rs2],
            Inst::Ret => smallvec![],
            Inst::Call { int_args, float_args, .. } => int_args.iter().chain(float_args.iter()).copied().collect(),
            Inst::ReadThreadPointer { .. } => smallvec![],
            Inst::Return { int_regs, float_regs } => int_regs.iter().chain(float_regs.iter()).copied().collect(),
        }
    }

    fn defs(&self) -> SmallVec<[VReg; 2]> {
        match self {
            Inst::Lui { rd, .. } => smallvec![*rd],
            Inst::Addi { rd, .. } => smallvec![*rd],
            Inst::MovReg { rd, .. } => smallvec![*rd],
            Inst::Slli { rd, .. } => smallvec![*rd],
            Inst::AluRRR { rd, .. } => smallvec![*rd],
            Inst::AluRRImm12 { rd, .. } => smallvec![*rd],
            Inst::Mul { rd, .. } => smallvec![*rd],
            Inst::Div { rd, .. } => smallvec![*rd],
            Inst::Divu { rd, .. } => smallvec![*rd],
            Inst::Rem { rd, .. } => smallvec![*rd],
            Inst::Remu { rd, .. } => smallvec![*rd],
            Inst::ShiftRRR { rd, .. } => smallvec![*rd],
            Inst::ShiftRRImm { rd, .. } => smallvec![*rd],
            Inst::IntCmp { rd, .. } => smallvec![*rd],
            Inst::Not01 { rd, .. } => smallvec![*rd],
            Inst::Neg { rd, .. } => smallvec![*rd],
            Inst::Bmask { rd, .. } => smallvec![*rd],
            Inst::Extend { rd, .. } => smallvec![*rd],
            Inst::FpuRRR { rd, .. } => smallvec![*rd],
            Inst::FNeg { rd, .. } => smallvec![*rd],
            Inst::FloatCmp { rd, .. } => smallvec![*rd],
            Inst::SelectSeq { rd, .. } => smallvec![*rd],
            Inst::Fcvt { rd, .. } => smallvec![*rd],
            Inst::FMovGpr { rd, .. } => smallvec![*rd],
            Inst::FcvtFp { rd, .. } => smallvec![*rd],
            Inst::FMovReg { rd, .. } => smallvec![*rd],
            Inst::StackAddr { rd, .. } => smallvec![*rd],
            Inst::Load { rd, .. } => smallvec![*rd],
            Inst::Store { .. } => smallvec![],
            Inst::Jump { .. } => smallvec![],
            Inst::CondBr { .. } => smallvec![],
            Inst::Ret => smallvec![],
            Inst::Call { int_rets, float_rets, .. } => int_rets.iter().chain(float_rets.iter()).copied().collect(),
            Inst::ReadThreadPointer { rd } => smallvec![*rd],
            Inst::Return { .. } => smallvec![],
        }
    }
}
