//! AArch64's target legalizer (§4.4): pure, side-effect-free predicates and
//! decision functions consulted during lowering. Every function here
//! mirrors one bullet of §4.4 exactly; none of them mutate IR or emit
//! instructions -- they only classify a value so [`super::lower`] knows
//! which rule to commit to.

use crate::ir::{CondCode, FloatCC, IntCC, Type};

/// `IntCC -> CondCode` total map (§4.4).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CondCodeA64 {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
    Cc,
    Cs,
    Hi,
    Ls,
    Mi,
    Vs,
    Vc,
    Al,
}

impl CondCodeA64 {
    /// The 4-bit AArch64 condition field encoding (`Cond` in the manual).
    pub fn bits(self) -> u8 {
        match self {
            CondCodeA64::Eq => 0b0000,
            CondCodeA64::Ne => 0b0001,
            CondCodeA64::Cs => 0b0010,
            CondCodeA64::Cc => 0b0011,
            CondCodeA64::Mi => 0b0100,
            CondCodeA64::Vs => 0b0110,
            CondCodeA64::Vc => 0b0111,
            CondCodeA64::Hi => 0b1000,
            CondCodeA64::Ls => 0b1001,
            CondCodeA64::Ge => 0b1010,
            CondCodeA64::Lt => 0b1011,
            CondCodeA64::Gt => 0b1100,
            CondCodeA64::Le => 0b1101,
            CondCodeA64::Al => 0b1110,
        }
    }

    /// The complemented condition, used to invert a `brif`'s taken/not-taken
    /// sense when only one ordering of successor blocks is convenient to
    /// emit.
    pub fn invert(self) -> CondCodeA64 {
        match self {
            CondCodeA64::Eq => CondCodeA64::Ne,
            CondCodeA64::Ne => CondCodeA64::Eq,
            CondCodeA64::Lt => CondCodeA64::Ge,
            CondCodeA64::Ge => CondCodeA64::Lt,
            CondCodeA64::Gt => CondCodeA64::Le,
            CondCodeA64::Le => CondCodeA64::Gt,
            CondCodeA64::Cc => CondCodeA64::Cs,
            CondCodeA64::Cs => CondCodeA64::Cc,
            CondCodeA64::Hi => CondCodeA64::Ls,
            CondCodeA64::Ls => CondCodeA64::Hi,
            CondCodeA64::Mi => CondCodeA64::Vc,
            CondCodeA64::Vs => CondCodeA64::Vc,
            CondCodeA64::Vc => CondCodeA64::Vs,
            CondCodeA64::Al => CondCodeA64::Al,
        }
    }
}

/// `IntCC -> CondCode` total map: `eq->EQ, ne->NE, slt->LT, sge->GE,
/// sgt->GT, sle->LE, ult->CC, uge->CS, ugt->HI, ule->LS` (§4.4, verbatim).
pub fn int_cond_code(cc: IntCC) -> CondCodeA64 {
    match cc {
        IntCC::Equal => CondCodeA64::Eq,
        IntCC::NotEqual => CondCodeA64::Ne,
        IntCC::SignedLessThan => CondCodeA64::Lt,
        IntCC::SignedGreaterThanOrEqual => CondCodeA64::Ge,
        IntCC::SignedGreaterThan => CondCodeA64::Gt,
        IntCC::SignedLessThanOrEqual => CondCodeA64::Le,
        IntCC::UnsignedLessThan => CondCodeA64::Cc,
        IntCC::UnsignedGreaterThanOrEqual => CondCodeA64::Cs,
        IntCC::UnsignedGreaterThan => CondCodeA64::Hi,
        IntCC::UnsignedLessThanOrEqual => CondCodeA64::Ls,
    }
}

/// Whether an ordered `FloatCC` maps to one native condition code, or needs
/// the unordered-family expansion (§4.4: "unordered variants... return
/// *expand*").
pub enum FloatCondStrategy {
    Native(CondCodeA64),
    Expand,
}

/// `FloatCC -> CondCode | expand` (§4.4). Ordered conditions map natively;
/// `uno`/`ord` map to the flag tests `VS`/`VC`; the unordered-disjunction
/// family (`ueq, one, ult, ule, ugt, uge`) expands.
pub fn float_cond_code(cc: FloatCC) -> FloatCondStrategy {
    use FloatCondStrategy::*;
    match cc {
        FloatCC::Equal => Native(CondCodeA64::Eq),
        FloatCC::NotEqual => Native(CondCodeA64::Ne),
        FloatCC::LessThan => Native(CondCodeA64::Mi),
        FloatCC::GreaterThan => Native(CondCodeA64::Gt),
        FloatCC::GreaterThanOrEqual => Native(CondCodeA64::Ge),
        FloatCC::LessThanOrEqual => Native(CondCodeA64::Ls),
        FloatCC::Unordered => Native(CondCodeA64::Vs),
        FloatCC::Ordered => Native(CondCodeA64::Vc),
        FloatCC::OrderedNotEqual
        | FloatCC::UnorderedOrEqual
        | FloatCC::UnorderedOrLessThan
        | FloatCC::UnorderedOrLessThanOrEqual
        | FloatCC::UnorderedOrGreaterThan
        | FloatCC::UnorderedOrGreaterThanOrEqual => Expand,
    }
}

/// How a `select` on this condition should lower (§4.4's `condSelectStrategy`):
/// always native for integer comparisons, native-when-ordered/expand-when-
/// unordered for floats.
pub enum SelectStrategy {
    Native,
    Expand,
}

pub fn int_select_strategy(_cc: IntCC) -> SelectStrategy {
    SelectStrategy::Native
}

pub fn float_select_strategy(cc: FloatCC) -> SelectStrategy {
    match float_cond_code(cc) {
        FloatCondStrategy::Native(_) => SelectStrategy::Native,
        FloatCondStrategy::Expand => SelectStrategy::Expand,
    }
}

/// How an arithmetic immediate should be materialized (§4.4's
/// `legalizeArithImm`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArithImmStrategy {
    /// Fits directly in the instruction's 12-bit (optionally shifted-by-12)
    /// immediate field.
    Valid,
    /// Needs 2 or fewer `MOVZ`/`MOVK` move-wide instructions.
    SynthesizeMov,
    /// Needs a literal-pool load (more than 2 move-wide chunks).
    LiteralPool,
}

/// `isValidArithImm(v)`: true iff `v` fits in 12 bits, or `v & 0xFFF == 0 &&
/// (v >> 12)` fits in 12 bits (the shifted-12 form) (§4.4, verbatim).
pub fn is_valid_arith_imm(v: i64) -> bool {
    if v < 0 {
        return false;
    }
    (v & !0xFFF) == 0 || (v & 0xFFF == 0 && (v >> 12) & !0xFFF == 0 && v >> 12 != 0)
}

/// `legalizeArithImm`: `valid` when [`is_valid_arith_imm`] holds, otherwise
/// *synthesize_mov* for values expressible in <=2 move-wide immediates
/// ([`count_mov_instructions`] <= 2), else *literal_pool*.
pub fn legalize_arith_imm(v: i64) -> ArithImmStrategy {
    if is_valid_arith_imm(v) {
        ArithImmStrategy::Valid
    } else if count_mov_instructions(v as u64) <= 2 {
        ArithImmStrategy::SynthesizeMov
    } else {
        ArithImmStrategy::LiteralPool
    }
}

/// `countMovInstructions(v)`: number of 16-bit chunks that are non-zero in
/// the little-endian 64-bit representation (1 if `v==0`) (§4.4, verbatim).
pub fn count_mov_instructions(v: u64) -> u32 {
    if v == 0 {
        return 1;
    }
    let mut count = 0;
    for chunk in 0..4 {
        if (v >> (chunk * 16)) & 0xFFFF != 0 {
            count += 1;
        }
    }
    count
}

/// How a `load`/`store` byte offset should be legalized (§4.4's
/// `legalizeOffset`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OffsetStrategy {
    Valid,
    /// `off` decomposes into a valid base plus a small remainder.
    SplitOffset { base: i64, remainder: i64 },
    /// Materialize the full address into a scratch register.
    MaterializeBase,
}

/// `isValidLoadStoreOffset(off, size)`: non-negative, a multiple of `size`,
/// and `off/size` in `[0, 4095]` (§4.4, verbatim).
pub fn is_valid_load_store_offset(off: i64, size: u32) -> bool {
    off >= 0 && off % size as i64 == 0 && (off / size as i64) <= 4095
}

pub fn legalize_offset(off: i64, size: u32) -> OffsetStrategy {
    if is_valid_load_store_offset(off, size) {
        return OffsetStrategy::Valid;
    }
    let max_scaled = 4095 * size as i64;
    if off > max_scaled && off - max_scaled < size as i64 * 4096 {
        let base = max_scaled;
        return OffsetStrategy::SplitOffset { base, remainder: off - base };
    }
    OffsetStrategy::MaterializeBase
}

/// `isValidIndexedOffset(off)`: `off in [-256, 255]` (§4.4, verbatim), used
/// for unscaled (`LDUR`/`STUR`) addressing.
pub fn is_valid_indexed_offset(off: i64) -> bool {
    (-256..=255).contains(&off)
}

/// `checkVectorElementSize(T)`: supported when scalar, or a fixed 128-bit
/// vector with lane width in `{8,16,32,64}` (§4.4, verbatim).
pub fn check_vector_element_size(ty: Type) -> bool {
    if !ty.is_vector() {
        return true;
    }
    let lane_bits = ty.lane_type().bits(&crate::ir::TypePool::new());
    matches!(lane_bits, 8 | 16 | 32 | 64) && ty.lane_count() as u32 * lane_bits == 128
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_cc_total_map_matches_spec_table() {
        assert_eq!(int_cond_code(IntCC::Equal), CondCodeA64::Eq);
        assert_eq!(int_cond_code(IntCC::UnsignedLessThan), CondCodeA64::Cc);
        assert_eq!(int_cond_code(IntCC::UnsignedGreaterThanOrEqual), CondCodeA64::Cs);
        assert_eq!(int_cond_code(IntCC::UnsignedGreaterThan), CondCodeA64::Hi);
        assert_eq!(int_cond_code(IntCC::UnsignedLessThanOrEqual), CondCodeA64::Ls);
    }

    #[test]
    fn s5_legalize_arith_imm() {
        assert_eq!(legalize_arith_imm(100), ArithImmStrategy::Valid);
        assert_ne!(legalize_arith_imm(0x123456789ABC), ArithImmStrategy::Valid);
    }

    #[test]
    fn shifted_12_form_is_valid() {
        assert!(is_valid_arith_imm(0x1000));
        assert!(is_valid_arith_imm(0xFFF_000));
        assert!(!is_valid_arith_imm(0x1001_000_000));
    }

    #[test]
    fn count_mov_instructions_zero_is_one() {
        assert_eq!(count_mov_instructions(0), 1);
        assert_eq!(count_mov_instructions(0x10000), 1);
        assert_eq!(count_mov_instructions(0x1_0001), 2);
    }

    #[test]
    fn unordered_float_cc_expands() {
        assert!(matches!(float_cond_code(FloatCC::UnorderedOrEqual), FloatCondStrategy::Expand));
        assert!(matches!(float_cond_code(FloatCC::Equal), FloatCondStrategy::Native(_)));
    }
}
