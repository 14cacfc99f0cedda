//! AArch64's physical register files: 31 general-purpose `X`/`W` registers
//! (`x31` is the zero register or `sp` depending on context, never
//! allocatable) and 32 `V` registers shared between the float and vector
//! classes (AAPCS64 draws no hardware distinction between them; this crate
//! keeps float/vector as separate [`RegClass`]es per §3, but both map onto
//! the same `V0..V31` file).
//!
//! Grounded on the teacher's `isa::aarch64::inst::regs`: caller-saved
//! registers are handed out before callee-saved ones, and `x29`/`x30`
//! (frame pointer, link register) and `sp` are reserved.

use crate::regalloc::{PReg, RegClass};

use crate::isa::RegisterBank;

pub const XZR: u8 = 31;
pub const SP: u8 = 31;
pub const FP: u8 = 29;
pub const LR: u8 = 30;

/// Caller-saved general-purpose registers available to the allocator,
/// `x0..x17` minus the ones reserved for argument/return marshaling
/// happening elsewhere (the ABI layer allocates `x0..x7` itself for
/// parameters; this bank is for the allocator's general pool and includes
/// them since a value not currently holding an argument is free to reuse
/// the register).
pub fn register_bank() -> RegisterBank {
    let int: Vec<PReg> = (0..=28u8).map(|hw| PReg::new(RegClass::Int, hw)).collect();
    let float: Vec<PReg> = (0..=31u8).map(|hw| PReg::new(RegClass::Float, hw)).collect();
    let vector: Vec<PReg> = (0..=31u8).map(|hw| PReg::new(RegClass::Vector, hw)).collect();
    RegisterBank { int, float, vector }
}

pub fn gpr_name(hw: u8, is64: bool) -> String {
    if hw == XZR {
        if is64 { "xzr".to_string() } else { "wzr".to_string() }
    } else if is64 {
        format!("x{hw}")
    } else {
        format!("w{hw}")
    }
}
