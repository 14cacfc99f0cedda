//! The AArch64 machine-instruction set this back end lowers to: one variant
//! per instruction family actually needed by [`super::lower`]'s rule
//! tables. Every variant is built from virtual registers; concrete hardware
//! registers only appear once [`super::emit`] resolves the final
//! allocation.

use smallvec::SmallVec;

use crate::ir::Block;
use crate::regalloc::VReg;

use super::legalize::CondCodeA64;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OperandSize {
    Size32,
    Size64,
}

impl OperandSize {
    pub fn sf_bit(self) -> u32 {
        match self {
            OperandSize::Size32 => 0,
            OperandSize::Size64 => 1,
        }
    }

    pub fn from_bits(bits: u32) -> Self {
        if bits > 32 {
            OperandSize::Size64
        } else {
            OperandSize::Size32
        }
    }
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
    Orr,
    Eor,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ShiftOp {
    Lsl,
    Lsr,
    Asr,
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

/// The AArch64 instruction set, over virtual registers. See the module doc
/// for the scope this covers.
#[derive(Clone, Debug)]
pub enum Inst {
    /// `MOVZ rd, #imm16, LSL #(16*shift)`.
    MovZ { rd: VReg, imm16: u16, shift: u8, size: OperandSize },
    /// `MOVN rd, #imm16, LSL #(16*shift)` (used to synthesize negative
    /// constants in one instruction when `MOVZ` would need more chunks).
    MovN { rd: VReg, imm16: u16, shift: u8, size: OperandSize },
    /// `MOVK rd, #imm16, LSL #(16*shift)`.
    MovK { rd: VReg, imm16: u16, shift: u8, size: OperandSize },
    /// `ORR rd, xzr, rm` / `MOV rd, rm` (register move; also used to realize
    /// `bitcast` between two integer registers of equal width).
    MovReg { rd: VReg, rm: VReg, size: OperandSize },
    /// `{ADD,SUB,AND,ORR,EOR} rd, rn, rm`.
    AluRRR { op: AluOp, rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    /// `{ADD,SUB,AND,ORR,EOR} rd, rn, #imm12{, LSL #12}`.
    AluRRImm12 { op: AluOp, rd: VReg, rn: VReg, imm12: u16, shift12: bool, size: OperandSize },
    /// `SUBS xzr, rn, rm` (sets flags only; backs `icmp`).
    Cmp { rn: VReg, rm: VReg, size: OperandSize },
    /// `MADD rd, rn, rm, ra`: a genuine fused multiply-add with a runtime
    /// accumulator, when one survives the e-graph's rewrite rules.
    Madd { rd: VReg, rn: VReg, rm: VReg, ra: VReg, size: OperandSize },
    /// `MUL rd, rn, rm`: the architectural `MADD rd, rn, rm, xzr` alias,
    /// kept as its own variant (accumulator hard-wired to the zero
    /// register) rather than threading a materialized-zero `VReg` through
    /// `Madd`, so plain `imul` never pays for an extra allocated register.
    Mul { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    Sdiv { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    Udiv { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    /// `ADDS rd, rn, rm` / `SUBS rd, rn, rm`: flag-setting add/sub, the
    /// low-half step of an `I128` `iadd`/`isub` carry chain (§4.5's I128
    /// pseudo-ops; a real carry, not a separate `Cmp`-only compare).
    AddsRRR { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    SubsRRR { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    /// `ADC rd, rn, rm` / `SBC rd, rn, rm`: add/subtract-with-carry, the
    /// high-half step consuming the flags `AddsRRR`/`SubsRRR` set.
    AdcRRR { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    SbcRRR { rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    /// `{LSL,LSR,ASR} rd, rn, rm` (register-controlled shift amount).
    ShiftRRR { op: ShiftOp, rd: VReg, rn: VReg, rm: VReg, size: OperandSize },
    /// `{LSL,LSR,ASR} rd, rn, #amount`.
    ShiftRRImm { op: ShiftOp, rd: VReg, rn: VReg, amount: u8, size: OperandSize },
    /// `SXTB/SXTH/SXTW/SXTX` or `UXTB/UXTH/UXTW` -- `sextend`/`uextend`/`ireduce`
    /// realized as a sign/zero-extending move, `from_bits` the narrower
    /// width.
    Extend { rd: VReg, rn: VReg, signed: bool, from_bits: u8, to_size: OperandSize },
    /// `FADD/FSUB/FMUL/FDIV` on the `D`/`S` register file.
    FpuRRR { op: FpuOp2, rd: VReg, rn: VReg, rm: VReg, size: FpuSize },
    /// `FNEG rd, rn`.
    FNeg { rd: VReg, rn: VReg, size: FpuSize },
    /// `FCMP rn, rm` (sets flags only; backs `fcmp`).
    FCmp { rn: VReg, rm: VReg, size: FpuSize },
    /// `CSEL rd, rn, rm, cond` (integer `select`, or a native-mapped float
    /// comparison's `select`).
    CSel { rd: VReg, rn: VReg, rm: VReg, cond: CondCodeA64, size: OperandSize },
    /// `FCSEL rd, rn, rm, cond`.
    FCSel { rd: VReg, rn: VReg, rm: VReg, cond: CondCodeA64, size: FpuSize },
    /// A `select` on an unordered `FloatCC`, not representable by one
    /// `FCSEL`: expands to an `OR` of two flag tests via two `CSEL`s
    /// (§4.4's `condSelectStrategy` *expand* path; which two flags compose
    /// the unordered test is looked up from the `FloatCC` itself at
    /// lowering time -- see `super::lower::lower_select`).
    FCSelOr { rd: VReg, rn: VReg, rm: VReg, cond_a: CondCodeA64, cond_b: CondCodeA64, size: FpuSize },
    /// Integer-to-float or float-to-integer conversion.
    Fcvt { rd: VReg, rn: VReg, dir: FcvtDir, int_size: OperandSize, float_size: FpuSize },
    /// Move a GPR's bits into a float register or vice versa, realizing
    /// `bitcast` between the two register files.
    FMovGpr { rd: VReg, rn: VReg, to_float: bool, size: OperandSize },
    /// `FCVT` between `F32` and `F64`, native on every target this back end
    /// lowers `fpromote`/`fdemote` for directly (the op legalizer's libcall
    /// table only covers `F16` conversions, see `legalize::libcall_for`).
    FcvtFp { rd: VReg, rn: VReg, widen: bool },
    /// `FMOV Sd, Sn` / `FMOV Dd, Dn`: float-to-float register move, used by
    /// `bitcast`-free value copies (block-param marshaling between two float
    /// VRegs) where `FMovGpr`'s register-file crossing would be wrong.
    FMovReg { rd: VReg, rn: VReg, size: FpuSize },
    /// `ADD rd, sp, #imm12{, LSL #12}`: the address of a stack slot relative
    /// to the (callee-adjusted) stack pointer.
    StackAddr { rd: VReg, imm12: u16, shift12: bool },
    Load { rd: VReg, base: VReg, offset: i32, size: MemSize, signed: bool, is_float: bool },
    Store { base: VReg, src: VReg, offset: i32, size: MemSize, is_float: bool },
    /// Unconditional jump to an IR block (resolved to a `B` or elided if
    /// the block is the immediately-following one -- simplicity over that
    /// peephole is left to a future pass; this crate always emits the `B`).
    Jump { target: Block },
    /// `B.cond`, falling through to `not_taken` only in the sense that the
    /// lowering driver also emits a `Jump` to it right after (§4.5's
    /// `lower_branch` contract: the backend emits both edges explicitly).
    CondBr { cond: CondCodeA64, taken: Block },
    /// `CBZ`/`CBNZ rt, target`.
    CmpBr { rt: VReg, nonzero: bool, target: Block, size: OperandSize },
    /// `RET x30`.
    Ret,
    /// `BL symbol` (relocated against an external call target; used for
    /// both real calls and op-legalizer libcalls). Arguments and returns are
    /// split by register class so each vec's position directly is its
    /// AAPCS64 register index within that class (`x0..x7`/`v0..v7`); an
    /// `I128` argument or return occupies two consecutive `int` entries.
    Call {
        symbol: String,
        int_args: SmallVec<[VReg; 8]>,
        float_args: SmallVec<[VReg; 8]>,
        int_rets: SmallVec<[VReg; 2]>,
        float_rets: SmallVec<[VReg; 2]>,
    },
    /// `MRS rd, TPIDR_EL0` (thread pointer read, the first instruction of
    /// every `tls_value` sequence, §4.8).
    ReadThreadPointer { rd: VReg },
    /// `SUB rd, xzr, rn` (the `NEG` alias; `ineg`).
    Neg { rd: VReg, rn: VReg, size: OperandSize },
    /// Marshal each return value into its AAPCS64 register, split by class
    /// the same way `Call`'s arguments are, then `RET x30`.
    Return { int_regs: SmallVec<[VReg; 4]>, float_regs: SmallVec<[VReg; 4]> },
}

impl crate::isa::MachInst for Inst {
    fn uses(&self) -> SmallVec<[VReg; 4]> {
        match *self {
            Inst::MovZ { .. } | Inst::MovN { .. } | Inst::Ret | Inst::ReadThreadPointer { .. } => SmallVec::new(),
            Inst::MovK { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::MovReg { rm, .. } => SmallVec::from_slice(&[rm]),
            Inst::AluRRR { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::AluRRImm12 { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::Cmp { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::Madd { rn, rm, ra, .. } => SmallVec::from_slice(&[rn, rm, ra]),
            Inst::Mul { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::Sdiv { rn, rm, .. } | Inst::Udiv { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::AddsRRR { rn, rm, .. }
            | Inst::SubsRRR { rn, rm, .. }
            | Inst::AdcRRR { rn, rm, .. }
            | Inst::SbcRRR { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::ShiftRRR { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::ShiftRRImm { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::Extend { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::FpuRRR { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::FNeg { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::FCmp { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::CSel { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::FCSel { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::FCSelOr { rn, rm, .. } => SmallVec::from_slice(&[rn, rm]),
            Inst::Fcvt { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::FMovGpr { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::FcvtFp { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::FMovReg { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::StackAddr { .. } => SmallVec::new(),
            Inst::Load { base, .. } => SmallVec::from_slice(&[base]),
            Inst::Store { base, src, .. } => SmallVec::from_slice(&[base, src]),
            Inst::Jump { .. } | Inst::CondBr { .. } => SmallVec::new(),
            Inst::CmpBr { rt, .. } => SmallVec::from_slice(&[rt]),
            Inst::Call { ref int_args, ref float_args, .. } => {
                int_args.iter().chain(float_args.iter()).copied().collect()
            }
            Inst::Neg { rn, .. } => SmallVec::from_slice(&[rn]),
            Inst::Return { ref int_regs, ref float_regs } => {
                int_regs.iter().chain(float_regs.iter()).copied().collect()
            }
        }
    }

    fn defs(&self) -> SmallVec<[VReg; 2]> {
        match *self {
            Inst::MovZ { rd, .. } | Inst::MovN { rd, .. } | Inst::MovK { rd, .. } | Inst::MovReg { rd, .. } => {
                SmallVec::from_slice(&[rd])
            }
            Inst::AluRRR { rd, .. } | Inst::AluRRImm12 { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::Cmp { .. } | Inst::FCmp { .. } => SmallVec::new(),
            Inst::Madd { rd, .. } | Inst::Mul { rd, .. } | Inst::Sdiv { rd, .. } | Inst::Udiv { rd, .. } => {
                SmallVec::from_slice(&[rd])
            }
            Inst::AddsRRR { rd, .. } | Inst::SubsRRR { rd, .. } | Inst::AdcRRR { rd, .. } | Inst::SbcRRR { rd, .. } => {
                SmallVec::from_slice(&[rd])
            }
            Inst::ShiftRRR { rd, .. } | Inst::ShiftRRImm { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::Extend { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::FpuRRR { rd, .. } | Inst::FNeg { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::CSel { rd, .. } | Inst::FCSel { rd, .. } | Inst::FCSelOr { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::Fcvt { rd, .. } | Inst::FMovGpr { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::FcvtFp { rd, .. } | Inst::FMovReg { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::StackAddr { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::Load { rd, .. } => SmallVec::from_slice(&[rd]),
            Inst::Store { .. } => SmallVec::new(),
            Inst::Jump { .. }
            | Inst::CondBr { .. }
            | Inst::CmpBr { .. }
            | Inst::Ret
            | Inst::Return { .. } => SmallVec::new(),
            Inst::Call { ref int_rets, ref float_rets, .. } => {
                int_rets.iter().chain(float_rets.iter()).copied().collect()
            }
            Inst::ReadThreadPointer { rd } => SmallVec::from_slice(&[rd]),
            Inst::Neg { rd, .. } => SmallVec::from_slice(&[rd]),
        }
    }
}
