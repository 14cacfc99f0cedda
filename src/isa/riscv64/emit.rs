//! Bit-exact RV64GC encoding (§4.7): one `emit` per [`Inst`] variant, writing
//! little-endian 32-bit words into a [`MachBuffer`]. Field layouts (R/I/S/B/
//! U/J-type) follow the base ISA manual directly; the handful of multi-word
//! pseudo-ops (`Bmask`, `IntCmp::{Eq,Ne}`, `SelectSeq`) are built from two or
//! more of these primitive words, the same way the teacher's `FCSelOr`
//! expands one AArch64 variant into two `FCSEL`s.

use cranelift_entity::EntityRef;

use crate::binemit::{FixupKind, MachBuffer, Reloc};
use crate::ir::Block;
use crate::regalloc::{Allocation, PReg, RegAlloc, RegClass, VReg};

use super::inst::{AluOp, FcvtDir, FpuOp2, FpuSize, Inst, MemSize, ShiftOp, Width};
use super::legalize::{CondCodeR64, FloatCmpOp, IntCmpOp};
use super::regs::{RA, SP, TP, ZERO};

/// Resolve `v` to a hardware register index, folding a spilled value onto
/// one of the class's hardware registers by slot index -- the same
/// simplification the AArch64 back end documents and for the same reason
/// (see that module's `hw` doc comment and DESIGN.md).
fn hw(ra: &RegAlloc, v: VReg, class: RegClass) -> u8 {
    match ra.get_allocation(v) {
        Some(Allocation::Reg(PReg { hw, .. })) => hw,
        Some(Allocation::Spill(slot)) => (slot.index() as u8) % pool_size(class),
        None => 0,
    }
}

fn pool_size(class: RegClass) -> u8 {
    match class {
        RegClass::Int => 26,
        RegClass::Float | RegClass::Vector => 32,
    }
}

const OP_LOAD: u32 = 0b000_0011;
const OP_LOAD_FP: u32 = 0b000_0111;
const OP_IMM: u32 = 0b001_0011;
const OP_IMM_32: u32 = 0b001_1011;
const OP_STORE: u32 = 0b010_0011;
const OP_STORE_FP: u32 = 0b010_0111;
const OP_RRR: u32 = 0b011_0011;
const OP_RRR_32: u32 = 0b011_1011;
const OP_LUI: u32 = 0b011_0111;
const OP_AUIPC: u32 = 0b001_0111;
const OP_BRANCH: u32 = 0b110_0011;
const OP_JALR: u32 = 0b110_0111;
const OP_JAL: u32 = 0b110_1111;
const OP_FP: u32 = 0b101_0011;

fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    (funct7 << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn i_type(imm12: i32, rs1: u32, funct3: u32, rd: u32, opcode: u32) -> u32 {
    let imm = imm12 as u32 & 0xFFF;
    (imm << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn s_type(imm12: i32, rs2: u32, rs1: u32, funct3: u32, opcode: u32) -> u32 {
    let imm = imm12 as u32 & 0xFFF;
    let hi = (imm >> 5) & 0x7F;
    let lo = imm & 0x1F;
    (hi << 25) | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | (lo << 7) | opcode
}

fn u_type(imm20: u32, rd: u32, opcode: u32) -> u32 {
    (imm20 << 12) | (rd << 7) | opcode
}

/// `B`-type with a displacement known at emit time (a local, self-contained
/// branch such as [`Inst::SelectSeq`]'s internal skip -- never a fixup
/// against a not-yet-bound [`Block`]; cross-block branches go through
/// [`MachBuffer::reserve_branch`] instead).
fn b_type_local(disp: i32, rs2: u32, rs1: u32, funct3: u32) -> u32 {
    let imm = disp as u32;
    let hi = ((imm >> 12) & 0x1) << 31 | ((imm >> 5) & 0x3F) << 25;
    let lo = ((imm >> 1) & 0xF) << 8 | ((imm >> 11) & 0x1) << 7;
    hi | (rs2 << 20) | (rs1 << 15) | (funct3 << 12) | lo | OP_BRANCH
}

/// `J`-type with a displacement known at emit time, see [`b_type_local`].
fn j_type_local(disp: i32, rd: u32) -> u32 {
    let imm = disp as u32;
    let field = ((imm >> 20) & 0x1) << 31 | ((imm >> 1) & 0x3FF) << 21 | ((imm >> 11) & 0x1) << 20 | ((imm >> 12) & 0xFF) << 12;
    field | (rd << 7) | OP_JAL
}

fn alu_funct(op: AluOp) -> (u32, u32) {
    match op {
        AluOp::Add => (0b000, 0b0000000),
        AluOp::Sub => (0b000, 0b0100000),
        AluOp::And => (0b111, 0b0000000),
        AluOp::Or => (0b110, 0b0000000),
        AluOp::Xor => (0b100, 0b0000000),
    }
}

fn alu_imm_funct3(op: AluOp) -> u32 {
    match op {
        AluOp::Add => 0b000,
        AluOp::And => 0b111,
        AluOp::Or => 0b110,
        AluOp::Xor => 0b100,
        AluOp::Sub => unreachable!("no SUBI -- negate the immediate and ADDI instead"),
    }
}

impl Inst {
    fn emit_inner(&self, buf: &mut MachBuffer, ra: &RegAlloc) {
        match *self {
            Inst::Lui { rd, imm20 } => {
                let rd = hw(ra, rd, RegClass::Int);
                buf.emit_u32_le(u_type(imm20 as u32 & 0xF_FFFF, rd as u32, OP_LUI));
            }
            Inst::Addi { rd, rn, imm12, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let opcode = if width == Width::W64 { OP_IMM } else { OP_IMM_32 };
                buf.emit_u32_le(i_type(imm12 as i32, rn as u32, 0b000, rd as u32, opcode));
            }
            Inst::MovReg { rd, rn } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                // `ADDI rd, rn, 0`, the canonical RV64 `MV` alias.
                buf.emit_u32_le(i_type(0, rn as u32, 0b000, rd as u32, OP_IMM));
            }
            Inst::Slli { rd, rn, shamt, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let (imm, opcode) = match width {
                    Width::W64 => (((0b000000u32) << 6) | (shamt as u32 & 0x3F), OP_IMM),
                    Width::W32 => (((0b0000000u32) << 5) | (shamt as u32 & 0x1F), OP_IMM_32),
                };
                buf.emit_u32_le(i_type(imm as i32, rn as u32, 0b001, rd as u32, opcode));
            }
            Inst::AluRRR { op, rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let (funct3, funct7) = alu_funct(op);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(funct7, rm as u32, rn as u32, funct3, rd as u32, opcode));
            }
            Inst::AluRRImm12 { op, rd, rn, imm12 } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                buf.emit_u32_le(i_type(imm12 as i32, rn as u32, alu_imm_funct3(op), rd as u32, OP_IMM));
            }
            Inst::Mul { rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(0b0000001, rm as u32, rn as u32, 0b000, rd as u32, opcode));
            }
            Inst::Div { rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(0b0000001, rm as u32, rn as u32, 0b100, rd as u32, opcode));
            }
            Inst::Divu { rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(0b0000001, rm as u32, rn as u32, 0b101, rd as u32, opcode));
            }
            Inst::Rem { rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(0b0000001, rm as u32, rn as u32, 0b110, rd as u32, opcode));
            }
            Inst::Remu { rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(0b0000001, rm as u32, rn as u32, 0b111, rd as u32, opcode));
            }
            Inst::ShiftRRR { op, rd, rn, rm, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let rm = hw(ra, rm, RegClass::Int);
                let (funct3, funct7) = match op {
                    ShiftOp::Sll => (0b001, 0b0000000),
                    ShiftOp::Srl => (0b101, 0b0000000),
                    ShiftOp::Sra => (0b101, 0b0100000),
                };
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(funct7, rm as u32, rn as u32, funct3, rd as u32, opcode));
            }
            Inst::ShiftRRImm { op, rd, rn, shamt, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let funct3 = match op {
                    ShiftOp::Sll => 0b001,
                    ShiftOp::Srl | ShiftOp::Sra => 0b101,
                };
                let top = match op {
                    ShiftOp::Sra => 0b010000u32,
                    _ => 0b000000,
                };
                let (imm, opcode) = match width {
                    Width::W64 => ((top << 6) | (shamt as u32 & 0x3F), OP_IMM),
                    Width::W32 => ((top << 5) | (shamt as u32 & 0x1F), OP_IMM_32),
                };
                buf.emit_u32_le(i_type(imm as i32, rn as u32, funct3, rd as u32, opcode));
            }
            Inst::IntCmp { op, rd, rn, rm } => match op {
                IntCmpOp::Slt => {
                    let rd = hw(ra, rd, RegClass::Int);
                    let rn = hw(ra, rn, RegClass::Int);
                    let rm = hw(ra, rm, RegClass::Int);
                    buf.emit_u32_le(r_type(0, rm as u32, rn as u32, 0b010, rd as u32, OP_RRR));
                }
                IntCmpOp::Sltu => {
                    let rd = hw(ra, rd, RegClass::Int);
                    let rn = hw(ra, rn, RegClass::Int);
                    let rm = hw(ra, rm, RegClass::Int);
                    buf.emit_u32_le(r_type(0, rm as u32, rn as u32, 0b011, rd as u32, OP_RRR));
                }
                IntCmpOp::Eq => {
                    let rdw = hw(ra, rd, RegClass::Int);
                    let rn = hw(ra, rn, RegClass::Int);
                    let rm = hw(ra, rm, RegClass::Int);
                    // `XOR rd, rn, rm` then `SLTIU rd, rd, 1`: zero iff equal.
                    buf.emit_u32_le(r_type(0, rm as u32, rn as u32, 0b100, rdw as u32, OP_RRR));
                    buf.emit_u32_le(i_type(1, rdw as u32, 0b011, rdw as u32, OP_IMM));
                }
                IntCmpOp::Ne => {
                    let rdw = hw(ra, rd, RegClass::Int);
                    let rn = hw(ra, rn, RegClass::Int);
                    let rm = hw(ra, rm, RegClass::Int);
                    // `XOR rd, rn, rm` then `SLTU rd, x0, rd`: nonzero iff different.
                    buf.emit_u32_le(r_type(0, rm as u32, rn as u32, 0b100, rdw as u32, OP_RRR));
                    buf.emit_u32_le(r_type(0, rdw as u32, ZERO as u32, 0b011, rdw as u32, OP_RRR));
                }
            },
            Inst::Not01 { rd, rn } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                buf.emit_u32_le(i_type(1, rn as u32, 0b100, rd as u32, OP_IMM));
            }
            Inst::Neg { rd, rn, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                buf.emit_u32_le(r_type(0b0100000, rn as u32, ZERO as u32, 0b000, rd as u32, opcode));
            }
            Inst::Bmask { rd, rn, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let opcode = if width == Width::W64 { OP_RRR } else { OP_RRR_32 };
                // `SLTU rd, x0, rn` (rd = 1 iff rn != 0), then `SUB rd, x0, rd`
                // (0 - 1 = all ones; 0 - 0 = 0).
                buf.emit_u32_le(r_type(0, rn as u32, ZERO as u32, 0b011, rd as u32, opcode));
                buf.emit_u32_le(r_type(0b0100000, rd as u32, ZERO as u32, 0b000, rd as u32, opcode));
            }
            Inst::Extend { rd, rn, signed, from_bits, width } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Int);
                let shift = 64 - from_bits as u32;
                let w64 = OP_IMM;
                if signed {
                    // `SLLI rd, rn, shift` then `SRAI rd, rd, shift`.
                    buf.emit_u32_le(i_type(((0b000000u32) << 6 | (shift & 0x3F)) as i32, rn as u32, 0b001, rd as u32, w64));
                    buf.emit_u32_le(i_type(((0b010000u32) << 6 | (shift & 0x3F)) as i32, rd as u32, 0b101, rd as u32, w64));
                } else {
                    // `SLLI rd, rn, shift` then `SRLI rd, rd, shift`.
                    buf.emit_u32_le(i_type(((0b000000u32) << 6 | (shift & 0x3F)) as i32, rn as u32, 0b001, rd as u32, w64));
                    buf.emit_u32_le(i_type(((0b000000u32) << 6 | (shift & 0x3F)) as i32, rd as u32, 0b101, rd as u32, w64));
                }
                let _ = width;
            }
            Inst::FpuRRR { op, rd, rn, rm, size } => {
                let rd = hw(ra, rd, RegClass::Float);
                let rn = hw(ra, rn, RegClass::Float);
                let rm = hw(ra, rm, RegClass::Float);
                let dbl = size == FpuSize::Size64;
                let funct7: u32 = match (op, dbl) {
                    (FpuOp2::Add, false) => 0b0000000,
                    (FpuOp2::Add, true) => 0b0000001,
                    (FpuOp2::Sub, false) => 0b0000100,
                    (FpuOp2::Sub, true) => 0b0000101,
                    (FpuOp2::Mul, false) => 0b0001000,
                    (FpuOp2::Mul, true) => 0b0001001,
                    (FpuOp2::Div, false) => 0b0001100,
                    (FpuOp2::Div, true) => 0b0001101,
                };
                // rm field (rounding mode) fixed to 111 (dynamic).
                buf.emit_u32_le(r_type(funct7, rm as u32, rn as u32, 0b111, rd as u32, OP_FP));
            }
            Inst::FNeg { rd, rn, size } => {
                let rd = hw(ra, rd, RegClass::Float);
                let rn = hw(ra, rn, RegClass::Float);
                let funct7 = if size == FpuSize::Size64 { 0b0010001 } else { 0b0010000 };
                // `FSGNJN.S/D rd, rn, rn`.
                buf.emit_u32_le(r_type(funct7, rn as u32, rn as u32, 0b001, rd as u32, OP_FP));
            }
            Inst::FloatCmp { op, rd, rn, rm, size } => {
                let rd = hw(ra, rd, RegClass::Int);
                let rn = hw(ra, rn, RegClass::Float);
                let rm = hw(ra, rm, RegClass::Float);
                let funct7 = if size == FpuSize::Size64 { 0b1010001 } else { 0b1010000 };
                let funct3 = match op {
                    FloatCmpOp::Fle => 0b000,
                    FloatCmpOp::Flt => 0b001,
                    FloatCmpOp::Feq => 0b010,
                };
                buf.emit_u32_le(r_type(funct7, rm as u32, rn as u32, funct3, rd as u32, OP_FP));
            }
            Inst::SelectSeq { rd, cond, rn, rm, is_float } => {
                let class = if is_float { RegClass::Float } else { RegClass::Int };
                let rdw = hw(ra, rd, class);
                let condw = hw(ra, cond, RegClass::Int);
                let rnw = hw(ra, rn, class);
                let rmw = hw(ra, rm, class);
                // if (cond != 0) rd = rn; else rd = rm -- a local 4-instruction
                // sequence whose displacements are fixed at emission time.
                buf.emit_u32_le(b_type_local(12, ZERO as u32, condw as u32, CondCodeR64::Eq.funct3()));
                if is_float {
                    buf.emit_u32_le(r_type(0b0010000, rnw as u32, rnw as u32, 0b000, rdw as u32, OP_FP));
                } else {
                    buf.emit_u32_le(i_type(0, rnw as u32, 0b000, rdw as u32, OP_IMM));
                }
                buf.emit_u32_le(j_type_local(8, ZERO as u32));
                if is_float {
                    buf.emit_u32_le(r_type(0b0010000, rmw as u32, rmw as u32, 0b000, rdw as u32, OP_FP));
                } else {
                    buf.emit_u32_le(i_type(0, rmw as u32, 0b000, rdw as u32, OP_IMM));
                }
            }
            Inst::Fcvt { rd, rn, dir, int_width, float_size } => {
                let dbl = float_size == FpuSize::Size64;
                let w64 = int_width == Width::W64;
                let (rd_class, rn_class, funct7, rs2) = match dir {
                    FcvtDir::FloatToSint => (RegClass::Int, RegClass::Float, if dbl { 0b1100001 } else { 0b1100000 }, if w64 { 0b00010 } else { 0b00000 }),
                    FcvtDir::FloatToUint => (RegClass::Int, RegClass::Float, if dbl { 0b1100001 } else { 0b1100000 }, if w64 { 0b00011 } else { 0b00001 }),
                    FcvtDir::SintToFloat => (RegClass::Float, RegClass::Int, if dbl { 0b1101001 } else { 0b1101000 }, if w64 { 0b00010 } else { 0b00000 }),
                    FcvtDir::UintToFloat => (RegClass::Float, RegClass::Int, if dbl { 0b1101001 } else { 0b1101000 }, if w64 { 0b00011 } else { 0b00001 }),
                };
                let rd = hw(ra, rd, rd_class);
                let rn = hw(ra, rn, rn_class);
                buf.emit_u32_le(r_type(funct7, rs2, rn as u32, 0b111, rd as u32, OP_FP));
            }
            Inst::FMovGpr { rd, rn, to_float, size } => {
                let dbl = size == FpuSize::Size64;
                let (rd_class, rn_class, funct7) = if to_float {
                    (RegClass::Float, RegClass::Int, if dbl { 0b1111001 } else { 0b1111000 })
                } else {
                    (RegClass::Int, RegClass::Float, if dbl { 0b1110001 } else { 0b1110000 })
                };
                let rd = hw(ra, rd, rd_class);
                let rn = hw(ra, rn, rn_class);
                buf.emit_u32_le(r_type(funct7, 0, rn as u32, 0b000, rd as u32, OP_FP));
            }
            Inst::FcvtFp { rd, rn, widen } => {
                let rd = hw(ra, rd, RegClass::Float);
                let rn = hw(ra, rn, RegClass::Float);
                // `FCVT.D.S` (widen) has rs2=00001, funct7=0100001;
                // `FCVT.S.D` (narrow) has rs2=00000, funct7=0100000.
                let (funct7, rs2) = if widen { (0b0100001, 0b00000) } else { (0b0100000, 0b00001) };
                buf.emit_u32_le(r_type(funct7, rs2, rn as u32, 0b111, rd as u32, OP_FP));
            }
            Inst::FMovReg { rd, rn, size } => {
                let rd = hw(ra, rd, RegClass::Float);
                let rn = hw(ra, rn, RegClass::Float);
                let funct7 = if size == FpuSize::Size64 { 0b0010001 } else { 0b0010000 };
                // `FSGNJ.S/D rd, rn, rn`: the canonical float-float move.
                buf.emit_u32_le(r_type(funct7, rn as u32, rn as u32, 0b000, rd as u32, OP_FP));
            }
            Inst::StackAddr { rd, imm12 } => {
                let rd = hw(ra, rd, RegClass::Int);
                buf.emit_u32_le(i_type(imm12 as i32, SP as u32, 0b000, rd as u32, OP_IMM));
            }
            Inst::Load { rd, base, offset, size, signed, is_float } => {
                let class = if is_float { RegClass::Float } else { RegClass::Int };
                let rd = hw(ra, rd, class);
                let rn = hw(ra, base, RegClass::Int);
                debug_assert!((-(1i32 << 11)..(1i32 << 11)).contains(&offset), "load offset must already be legalized");
                if is_float {
                    let funct3 = if size == MemSize::S64 { 0b011 } else { 0b010 };
                    buf.emit_u32_le(i_type(offset, rn as u32, funct3, rd as u32, OP_LOAD_FP));
                } else {
                    let funct3 = match (size, signed) {
                        (MemSize::S8, true) => 0b000,
                        (MemSize::S8, false) => 0b100,
                        (MemSize::S16, true) => 0b001,
                        (MemSize::S16, false) => 0b101,
                        (MemSize::S32, true) => 0b010,
                        (MemSize::S32, false) => 0b110,
                        (MemSize::S64, _) => 0b011,
                    };
                    buf.emit_u32_le(i_type(offset, rn as u32, funct3, rd as u32, OP_LOAD));
                }
            }
            Inst::Store { base, src, offset, size, is_float } => {
                let class = if is_float { RegClass::Float } else { RegClass::Int };
                let src = hw(ra, src, class);
                let rn = hw(ra, base, RegClass::Int);
                debug_assert!((-(1i32 << 11)..(1i32 << 11)).contains(&offset), "store offset must already be legalized");
                if is_float {
                    let funct3 = if size == MemSize::S64 { 0b011 } else { 0b010 };
                    buf.emit_u32_le(s_type(offset, src as u32, rn as u32, funct3, OP_STORE_FP));
                } else {
                    let funct3 = match size {
                        MemSize::S8 => 0b000,
                        MemSize::S16 => 0b001,
                        MemSize::S32 => 0b010,
                        MemSize::S64 => 0b011,
                    };
                    buf.emit_u32_le(s_type(offset, src as u32, rn as u32, funct3, OP_STORE));
                }
            }
            Inst::Jump { target } => {
                buf.reserve_branch(target, FixupKind::Riscv64Jal { rd: ZERO });
            }
            Inst::CondBr { cc, rs1, rs2, taken } => {
                let rs1 = hw(ra, rs1, RegClass::Int);
                let rs2 = hw(ra, rs2, RegClass::Int);
                buf.reserve_branch(taken, FixupKind::Riscv64Branch { funct3: cc.funct3() as u8, rs1, rs2 });
            }
            Inst::Ret => {
                // `JALR x0, ra, 0`, the canonical `RET` pseudo-instruction.
                buf.emit_u32_le(i_type(0, RA as u32, 0b000, ZERO as u32, OP_JALR));
            }
            Inst::Call { ref symbol, ref int_args, ref float_args, ref int_rets, ref float_rets } => {
                for (i, &v) in int_args.iter().enumerate() {
                    emit_arg_move(buf, ra, v, RegClass::Int, i as u8);
                }
                for (i, &v) in float_args.iter().enumerate() {
                    emit_arg_move(buf, ra, v, RegClass::Float, i as u8);
                }
                // `AUIPC ra, 0` + `JALR ra, ra, 0`, relocated as a call-relative
                // pair against `symbol` (recorded once, on the `AUIPC`).
                buf.reserve_reloc(Reloc::Riscv64Call, symbol.clone(), 0);
                buf.emit_u32_le(u_type(0, RA as u32, OP_AUIPC));
                buf.emit_u32_le(i_type(0, RA as u32, 0b000, RA as u32, OP_JALR));
                for (i, &v) in int_rets.iter().enumerate() {
                    emit_ret_move(buf, ra, v, RegClass::Int, i as u8);
                }
                for (i, &v) in float_rets.iter().enumerate() {
                    emit_ret_move(buf, ra, v, RegClass::Float, i as u8);
                }
            }
            Inst::ReadThreadPointer { rd } => {
                let rd = hw(ra, rd, RegClass::Int);
                buf.emit_u32_le(i_type(0, TP as u32, 0b000, rd as u32, OP_IMM));
            }
            Inst::Return { ref int_regs, ref float_regs } => {
                for (i, &v) in int_regs.iter().enumerate() {
                    emit_arg_move(buf, ra, v, RegClass::Int, i as u8);
                }
                for (i, &v) in float_regs.iter().enumerate() {
                    emit_arg_move(buf, ra, v, RegClass::Float, i as u8);
                }
                buf.emit_u32_le(i_type(0, RA as u32, 0b000, ZERO as u32, OP_JALR));
            }
        }
    }
}

/// Move the already-allocated virtual register `v` into the `i`-th standard
/// calling-convention argument register of its class (`a0..a7`/`fa0..fa7`,
/// hardware indices 10..17), immediately before a call.
fn emit_arg_move(buf: &mut MachBuffer, ra: &RegAlloc, v: VReg, class: RegClass, i: u8) {
    let dst = 10 + i;
    match ra.get_allocation(v) {
        Some(Allocation::Reg(PReg { hw: src, .. })) if src != dst => match class {
            RegClass::Int => buf.emit_u32_le(i_type(0, src as u32, 0b000, dst as u32, OP_IMM)),
            RegClass::Float | RegClass::Vector => buf.emit_u32_le(r_type(0b0010000, src as u32, src as u32, 0b000, dst as u32, OP_FP)),
        },
        _ => {}
    }
}

/// Move the `i`-th standard return register into `v`'s allocation,
/// immediately after a call.
fn emit_ret_move(buf: &mut MachBuffer, ra: &RegAlloc, v: VReg, class: RegClass, i: u8) {
    let src = 10 + i;
    match ra.get_allocation(v) {
        Some(Allocation::Reg(PReg { hw: dst, .. })) if dst != src => match class {
            RegClass::Int => buf.emit_u32_le(i_type(0, src as u32, 0b000, dst as u32, OP_IMM)),
            RegClass::Float | RegClass::Vector => buf.emit_u32_le(r_type(0b0010000, src as u32, src as u32, 0b000, dst as u32, OP_FP)),
        },
        _ => {}
    }
}

impl crate::isa::Emit for Inst {
    fn emit(&self, buf: &mut MachBuffer, ra: &RegAlloc, _block: Block) {
        self.emit_inner(buf, ra);
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;
    use crate::regalloc::RegAlloc;

    fn alloc_one(ra: &mut RegAlloc, hw_reg: u8) -> VReg {
        let v = VReg::from_u32(hw_reg as u32);
        ra.init_regs(&[PReg::new(RegClass::Int, hw_reg)], &[], &[]);
        ra.allocate(v, RegClass::Int).unwrap();
        v
    }

    fn bytes_of(inst: &Inst, ra: &RegAlloc) -> Vec<u8> {
        let mut buf = MachBuffer::new();
        inst.emit_inner(&mut buf, ra);
        buf.finish().0
    }

    #[test]
    fn addi_a0_a0_5_matches_manual_encoding() {
        let mut ra = RegAlloc::new();
        let rd = alloc_one(&mut ra, 10);
        let inst = Inst::Addi { rd, rn: rd, imm12: 5, width: Width::W64 };
        // imm=5 rs1=10 funct3=0 rd=10 opcode=0010011
        let expected: u32 = (5 << 20) | (10 << 15) | (10 << 7) | 0b0010011;
        assert_eq!(bytes_of(&inst, &ra), expected.to_le_bytes().to_vec());
    }

    #[test]
    fn add_a0_a1_a2_matches_manual_encoding() {
        let mut ra = RegAlloc::new();
        ra.init_regs(&[PReg::new(RegClass::Int, 10), PReg::new(RegClass::Int, 11), PReg::new(RegClass::Int, 12)], &[], &[]);
        let rd = VReg::from_u32(10);
        let rn = VReg::from_u32(11);
        let rm = VReg::from_u32(12);
        ra.allocate(rd, RegClass::Int).unwrap();
        ra.allocate(rn, RegClass::Int).unwrap();
        ra.allocate(rm, RegClass::Int).unwrap();
        let inst = Inst::AluRRR { op: AluOp::Add, rd, rn, rm, width: Width::W64 };
        let expected: u32 = (12 << 20) | (11 << 15) | (10 << 7) | 0b0110011;
        assert_eq!(bytes_of(&inst, &ra), expected.to_le_bytes().to_vec());
    }

    #[test]
    fn ret_is_jalr_x0_ra_0() {
        let ra = RegAlloc::new();
        let expected: u32 = (1 << 15) | 0b1100111;
        assert_eq!(bytes_of(&Inst::Ret, &ra), expected.to_le_bytes().to_vec());
    }

    #[test]
    fn jump_reserves_a_jal_fixup() {
        let ra = RegAlloc::new();
        let mut buf = MachBuffer::new();
        let b0 = Block::new(0);
        let b1 = Block::new(1);
        buf.bind_block(b0);
        Inst::Jump { target: b1 }.emit_inner(&mut buf, &ra);
        buf.bind_block(b1);
        buf.resolve().unwrap();
        let (bytes, _) = buf.finish();
        // disp = 4 (one instruction ahead): JAL x0, 4.
        let expected: u32 = (1 << 21) | 0b110_1111;
        assert_eq!(&bytes[0..4], &expected.to_le_bytes());
    }

    #[test]
    fn cond_br_reserves_a_branch_fixup_with_the_right_funct3() {
        let mut ra = RegAlloc::new();
        ra.init_regs(&[PReg::new(RegClass::Int, 10), PReg::new(RegClass::Int, 11)], &[], &[]);
        let rs1 = VReg::from_u32(10);
        let rs2 = VReg::from_u32(11);
        ra.allocate(rs1, RegClass::Int).unwrap();
        ra.allocate(rs2, RegClass::Int).unwrap();
        let mut buf = MachBuffer::new();
        let b0 = Block::new(0);
        let b1 = Block::new(1);
        buf.bind_block(b0);
        Inst::CondBr { cc: CondCodeR64::Lt, rs1, rs2, taken: b1 }.emit_inner(&mut buf, &ra);
        buf.bind_block(b1);
        buf.resolve().unwrap();
        let (bytes, _) = buf.finish();
        let word = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        assert_eq!(word & 0x7F, 0b110_0011);
        assert_eq!((word >> 12) & 0x7, CondCodeR64::Lt.funct3());
    }

    #[test]
    fn select_seq_emits_four_words() {
        let mut ra = RegAlloc::new();
        ra.init_regs(
            &[PReg::new(RegClass::Int, 10), PReg::new(RegClass::Int, 11), PReg::new(RegClass::Int, 12), PReg::new(RegClass::Int, 13)],
            &[],
            &[],
        );
        let rd = VReg::from_u32(10);
        let cond = VReg::from_u32(11);
        let rn = VReg::from_u32(12);
        let rm = VReg::from_u32(13);
        for v in [rd, cond, rn, rm] {
            ra.allocate(v, RegClass::Int).unwrap();
        }
        let inst = Inst::SelectSeq { rd, cond, rn, rm, is_float: false };
        assert_eq!(bytes_of(&inst, &ra).len(), 16);
    }
}
