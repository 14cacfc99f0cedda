//! RISC-V64 target legalizer predicates (§4.4): condition-code mapping for
//! a flagless ISA, I-type immediate legality, and thread-pointer offset
//! folding.
//!
//! Grounded on the teacher's `isa::aarch64::legalize` module shape (a total
//! condition-code map plus small `is_valid_*`/`legalize_*` predicates), but
//! the mappings themselves are RV64's: there is no flags register, so every
//! comparison either is one of the six native branch conditions or is
//! synthesized from `SLT`/`SLTU` plus a complement, never a flag test.

use crate::ir::{FloatCC, IntCC};

/// The six native RV64 branch conditions (`BEQ`/`BNE`/`BLT`/`BGE`/`BLTU`/
/// `BGEU`), keyed by `funct3`. Unlike AArch64's 14-way `Cond` field, this is
/// the complete set: RV64 has no separate signed-overflow or carry flags to
/// test, so every `IntCC` variant maps onto one of these six, swapping
/// operands where needed (`sgt`/`sle`/`ugt`/`ule` have no dedicated opcode).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CondCodeR64 {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
}

impl CondCodeR64 {
    pub fn funct3(self) -> u32 {
        match self {
            CondCodeR64::Eq => 0b000,
            CondCodeR64::Ne => 0b001,
            CondCodeR64::Lt => 0b100,
            CondCodeR64::Ge => 0b101,
            CondCodeR64::Ltu => 0b110,
            CondCodeR64::Geu => 0b111,
        }
    }
}

/// `(cc, swap)`: the branch condition and whether the operand pair `(rs1,
/// rs2)` must be swapped to realize `cond` with a native branch. Total over
/// `IntCC` (§4.4's condition-code table, this target's version).
pub fn branch_cond_code(cond: IntCC) -> (CondCodeR64, bool) {
    use IntCC::*;
    match cond {
        Equal => (CondCodeR64::Eq, false),
        NotEqual => (CondCodeR64::Ne, false),
        SignedLessThan => (CondCodeR64::Lt, false),
        SignedGreaterThanOrEqual => (CondCodeR64::Ge, false),
        SignedGreaterThan => (CondCodeR64::Lt, true),
        SignedLessThanOrEqual => (CondCodeR64::Ge, true),
        UnsignedLessThan => (CondCodeR64::Ltu, false),
        UnsignedGreaterThanOrEqual => (CondCodeR64::Geu, false),
        UnsignedGreaterThan => (CondCodeR64::Ltu, true),
        UnsignedLessThanOrEqual => (CondCodeR64::Geu, true),
    }
}

/// The primitive RV64 compare that produces a `0`/`1` integer value directly
/// (no native `SGE`/`SGEU`, so those negate the complementary `SLT`/`SLTU`).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IntCmpOp {
    Eq,
    Ne,
    Slt,
    Sltu,
}

/// `(op, swap, negate)`: how to build `cond`'s `0`/`1` result from one
/// `IntCmpOp`, an optional operand swap, and an optional logical complement.
/// Total over `IntCC`, mirroring [`branch_cond_code`]'s coverage but for
/// value-producing `icmp` rather than a branch.
pub fn int_cmp_plan(cond: IntCC) -> (IntCmpOp, bool, bool) {
    use IntCC::*;
    match cond {
        Equal => (IntCmpOp::Eq, false, false),
        NotEqual => (IntCmpOp::Ne, false, false),
        SignedLessThan => (IntCmpOp::Slt, false, false),
        SignedGreaterThanOrEqual => (IntCmpOp::Slt, false, true),
        SignedGreaterThan => (IntCmpOp::Slt, true, false),
        SignedLessThanOrEqual => (IntCmpOp::Slt, true, true),
        UnsignedLessThan => (IntCmpOp::Sltu, false, false),
        UnsignedGreaterThanOrEqual => (IntCmpOp::Sltu, false, true),
        UnsignedGreaterThan => (IntCmpOp::Sltu, true, false),
        UnsignedLessThanOrEqual => (IntCmpOp::Sltu, true, true),
    }
}

/// The three native float compares (`FEQ`/`FLT`/`FLE`), all producing a
/// `0`/`1` integer result directly -- RV64 has no flags register for floats
/// either.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FloatCmpOp {
    Feq,
    Flt,
    Fle,
}

/// How to realize one `FloatCC`: either a native compare (with optional
/// swap/negate, same shape as [`int_cmp_plan`]), or an *expand* case that
/// needs the ordered-check composition [`super::lower::lower_fcmp`] builds
/// from two `FEQ` self-compares.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum FloatCondPlan {
    Native(FloatCmpOp, bool, bool),
    Expand,
}

/// Total over `FloatCC`. `Ordered`/`Unordered` and the unordered-disjunction
/// family (`one`, `ueq`, `ult`, `ule`, `ugt`, `uge` in the textual syntax)
/// all expand; the rest have a one- or two-instruction native form.
pub fn float_cond_plan(cond: FloatCC) -> FloatCondPlan {
    use FloatCC::*;
    match cond {
        Equal => FloatCondPlan::Native(FloatCmpOp::Feq, false, false),
        NotEqual => FloatCondPlan::Native(FloatCmpOp::Feq, false, true),
        LessThan => FloatCondPlan::Native(FloatCmpOp::Flt, false, false),
        LessThanOrEqual => FloatCondPlan::Native(FloatCmpOp::Fle, false, false),
        GreaterThan => FloatCondPlan::Native(FloatCmpOp::Flt, true, false),
        GreaterThanOrEqual => FloatCondPlan::Native(FloatCmpOp::Fle, true, false),
        Ordered | Unordered | OrderedNotEqual | UnorderedOrEqual | UnorderedOrLessThan
        | UnorderedOrLessThanOrEqual | UnorderedOrGreaterThan | UnorderedOrGreaterThanOrEqual => {
            FloatCondPlan::Expand
        }
    }
}

/// True iff `v` fits a 12-bit sign-extended I-type/S-type immediate (`ADDI`,
/// loads, stores): the one immediate shape every RV64 addressing mode and
/// arithmetic-immediate instruction shares.
pub fn fits_imm12(v: i64) -> bool {
    (-(1i64 << 11)..(1i64 << 11)).contains(&v)
}

/// An arithmetic (`ADDI`-style) immediate either fits directly, or must be
/// synthesized into a scratch register first via the `LUI`+`ADDI`(+`SLLI`)
/// chain in [`super::lower::emit_materialize`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ArithImmStrategy {
    Valid,
    Synthesize,
}

pub fn legalize_arith_imm(v: i64) -> ArithImmStrategy {
    if fits_imm12(v) {
        ArithImmStrategy::Valid
    } else {
        ArithImmStrategy::Synthesize
    }
}

/// A load/store byte offset either fits the 12-bit immediate directly, can
/// be split into a `hi20`/`lo12` pair added to the base once (amortizing the
/// `LUI`+`ADD` across a run of accesses at different offsets from the same
/// synthesized address the caller builds), or -- for an offset wider than 32
/// bits, never produced by this crate's own lowering but kept for
/// completeness -- must be fully materialized before use.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum OffsetStrategy {
    Valid,
    SplitOffset { hi20: i32, lo12: i16 },
    MaterializeBase,
}

pub fn legalize_offset(offset: i64) -> OffsetStrategy {
    if fits_imm12(offset) {
        return OffsetStrategy::Valid;
    }
    if (i32::MIN as i64..=i32::MAX as i64).contains(&offset) {
        let lo12 = (((offset & 0xFFF) as i32) << 20 >> 20) as i16;
        let hi20 = ((offset - lo12 as i64) >> 12) as i32;
        return OffsetStrategy::SplitOffset { hi20, lo12 };
    }
    OffsetStrategy::MaterializeBase
}

/// Thread-pointer offset folding for `tls_value` (§4.4's TLS op): `tp`
/// already holds the thread pointer on RV64 (no `MRS`-equivalent read), so
/// this is strictly simpler than AArch64's strategy -- either the offset
/// folds into the same `ADDI` that reads `tp`, or it needs a synthesized add.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum TlsOffsetStrategy {
    ThreadPointerOnly,
    AddImm12 { imm12: i16 },
    AddSynthesized,
}

pub fn legalize_tls_offset(offset: i64) -> TlsOffsetStrategy {
    if offset == 0 {
        TlsOffsetStrategy::ThreadPointerOnly
    } else if fits_imm12(offset) {
        TlsOffsetStrategy::AddImm12 { imm12: offset as i16 }
    } else {
        TlsOffsetStrategy::AddSynthesized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_cond_code_total_map_matches_funct3_table() {
        assert_eq!(branch_cond_code(IntCC::Equal), (CondCodeR64::Eq, false));
        assert_eq!(branch_cond_code(IntCC::SignedGreaterThan), (CondCodeR64::Lt, true));
        assert_eq!(branch_cond_code(IntCC::UnsignedLessThanOrEqual), (CondCodeR64::Geu, true));
        assert_eq!(CondCodeR64::Lt.funct3(), 0b100);
        assert_eq!(CondCodeR64::Geu.funct3(), 0b111);
    }

    #[test]
    fn sge_negates_slt_without_swapping() {
        assert_eq!(int_cmp_plan(IntCC::SignedGreaterThanOrEqual), (IntCmpOp::Slt, false, true));
    }

    #[test]
    fn ugt_swaps_sltu_without_negating() {
        assert_eq!(int_cmp_plan(IntCC::UnsignedGreaterThan), (IntCmpOp::Sltu, true, false));
    }

    #[test]
    fn unordered_family_expands() {
        assert_eq!(float_cond_plan(FloatCC::Unordered), FloatCondPlan::Expand);
        assert_eq!(float_cond_plan(FloatCC::UnorderedOrLessThan), FloatCondPlan::Expand);
        assert!(matches!(float_cond_plan(FloatCC::GreaterThanOrEqual), FloatCondPlan::Native(FloatCmpOp::Fle, true, false)));
    }

    #[test]
    fn imm12_boundaries() {
        assert!(fits_imm12(2047));
        assert!(!fits_imm12(2048));
        assert!(fits_imm12(-2048));
        assert!(!fits_imm12(-2049));
    }

    #[test]
    fn offset_beyond_imm12_splits_into_hi20_lo12() {
        let strategy = legalize_offset(100_000);
        match strategy {
            OffsetStrategy::SplitOffset { hi20, lo12 } => {
                assert_eq!((hi20 as i64) * 4096 + lo12 as i64, 100_000);
            }
            _ => panic!("expected a split offset"),
        }
    }
}
