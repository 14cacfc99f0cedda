//! Binary machine-code emission: the [`MachBuffer`] byte sink, relocations,
//! and branch fixups (§4.7).
//!
//! Grounded on the teacher's `binemit` module naming (`CodeOffset`, `Reloc`,
//! `Addend`) -- the teacher's modern MachBuffer with branch-island relaxation
//! lives in a `machinst::buffer` module not present in this crate's
//! retrieval pack, so this is a from-scratch buffer of the same shape: a
//! byte vector, a relocation list, and a one-pass fixup resolver.

use crate::error::EncodingError;
use crate::ir::Block;

/// Offset in bytes from the start of the function's code. Kept as a fixed
/// `u32` rather than `usize` since this back end is a cross compiler: the
/// *target's* offset width must not depend on the host's pointer width.
pub type CodeOffset = u32;

/// Addend added to a relocation's symbol value at link time.
pub type Addend = i64;

/// Relocation kinds this back end can emit. Kept small and target-tagged
/// (rather than one enum per ISA) since every target in this crate only
/// needs an absolute 8-byte form (for literal pools) and one PC-relative
/// call form.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reloc {
    /// Absolute 8-byte pointer-sized relocation (literal-pool entries).
    Abs8,
    /// AArch64 `BL`-style PC-relative call, encoded as the accompanying
    /// `ADRP`+`ADD` or literal-pool sequence's relocation against the call
    /// target symbol.
    Aarch64Call,
    /// RISC-V `AUIPC`+`JALR` call-relative relocation pair, recorded once
    /// against the `AUIPC` instruction's offset.
    Riscv64Call,
}

/// One relocation: a byte offset into the code buffer, the kind, the target
/// external symbol, and an addend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachRelocation {
    pub offset: CodeOffset,
    pub kind: Reloc,
    pub target: String,
    pub addend: Addend,
}

/// The kind of fixup a pending branch needs, carrying enough of the
/// instruction's fixed bits to re-encode it once the displacement is known.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FixupKind {
    /// AArch64 unconditional `B`: 26-bit word-granularity signed displacement.
    Aarch64Branch26,
    /// AArch64 `B.cond`: 19-bit word-granularity displacement, low 4 bits of
    /// the encoded condition code folded in.
    Aarch64CondBranch19 { cond_bits: u8 },
    /// AArch64 `CBZ`/`CBNZ`: 19-bit displacement, `sf` (1 = 64-bit) and sense
    /// (1 = branch-if-nonzero) folded in, register in bits [4:0].
    Aarch64CmpBranch19 { sf: bool, nonzero: bool, reg: u8 },
    /// RISC-V `JAL`: 20-bit, 2-byte-granularity signed displacement, `rd` in
    /// bits [11:7] (0 for a plain jump).
    Riscv64Jal { rd: u8 },
    /// RISC-V conditional branch (`BEQ`/`BNE`/...): 12-bit, 2-byte-granularity
    /// displacement; `funct3` and the two source registers are fixed bits.
    Riscv64Branch { funct3: u8, rs1: u8, rs2: u8 },
}

#[derive(Clone, Copy, Debug)]
struct BranchFixup {
    offset: CodeOffset,
    target_block: Block,
    kind: FixupKind,
}

/// A byte vector plus a pending-fixup list; one per function compile.
#[derive(Default)]
pub struct MachBuffer {
    data: Vec<u8>,
    relocs: Vec<MachRelocation>,
    fixups: Vec<BranchFixup>,
    block_offsets: rustc_hash::FxHashMap<Block, CodeOffset>,
}

impl MachBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cur_offset(&self) -> CodeOffset {
        self.data.len() as CodeOffset
    }

    /// Record the offset of `block`'s first instruction, so that later
    /// fixups targeting it can be resolved.
    pub fn bind_block(&mut self, block: Block) {
        self.block_offsets.insert(block, self.cur_offset());
    }

    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn emit_u32_le(&mut self, word: u32) {
        self.data.extend_from_slice(&word.to_le_bytes());
    }

    pub fn reserve_reloc(&mut self, kind: Reloc, target: impl Into<String>, addend: Addend) {
        self.relocs.push(MachRelocation { offset: self.cur_offset(), kind, target: target.into(), addend });
    }

    /// Emit a zeroed placeholder word and remember it as a fixup against
    /// `target_block`, resolved once every block's offset is known.
    pub fn reserve_branch(&mut self, target_block: Block, kind: FixupKind) {
        let offset = self.cur_offset();
        self.emit_u32_le(0);
        self.fixups.push(BranchFixup { offset, target_block, kind });
    }

    /// Patch every pending branch fixup now that all blocks have been bound.
    /// Fails if any displacement does not fit its instruction's reach.
    pub fn resolve(&mut self) -> Result<(), EncodingError> {
        for fx in &self.fixups {
            let target = *self
                .block_offsets
                .get(&fx.target_block)
                .expect("resolve() called before every block was bound");
            let disp = target as i64 - fx.offset as i64;
            let word = encode_fixup(fx.kind, disp)
                .ok_or(EncodingError::BranchOutOfRange { instruction: fx.offset, displacement: disp })?;
            self.data[fx.offset as usize..fx.offset as usize + 4].copy_from_slice(&word.to_le_bytes());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consume the buffer, returning its bytes and accumulated relocations.
    pub fn finish(self) -> (Vec<u8>, Vec<MachRelocation>) {
        (self.data, self.relocs)
    }
}

fn fits_signed(v: i64, bits: u32) -> bool {
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    v >= min && v <= max
}

fn encode_fixup(kind: FixupKind, disp: i64) -> Option<u32> {
    match kind {
        FixupKind::Aarch64Branch26 => {
            if disp % 4 != 0 {
                return None;
            }
            let imm26 = disp / 4;
            if !fits_signed(imm26, 26) {
                return None;
            }
            Some(0x1400_0000 | (imm26 as u32 & 0x03FF_FFFF))
        }
        FixupKind::Aarch64CondBranch19 { cond_bits } => {
            if disp % 4 != 0 {
                return None;
            }
            let imm19 = disp / 4;
            if !fits_signed(imm19, 19) {
                return None;
            }
            Some(0x5400_0000 | ((imm19 as u32 & 0x7FFFF) << 5) | (cond_bits as u32 & 0xF))
        }
        FixupKind::Aarch64CmpBranch19 { sf, nonzero, reg } => {
            if disp % 4 != 0 {
                return None;
            }
            let imm19 = disp / 4;
            if !fits_signed(imm19, 19) {
                return None;
            }
            let sf_bit = if sf { 1u32 << 31 } else { 0 };
            let op_bit = if nonzero { 1u32 << 24 } else { 0 };
            Some(sf_bit | 0x3400_0000 | op_bit | ((imm19 as u32 & 0x7FFFF) << 5) | (reg as u32 & 0x1F))
        }
        FixupKind::Riscv64Jal { rd } => {
            if disp % 2 != 0 {
                return None;
            }
            let imm = disp;
            if !fits_signed(imm, 21) {
                return None;
            }
            let imm = imm as u32;
            // J-type immediate field order: imm[20|10:1|11|19:12].
            let field = ((imm >> 20) & 0x1) << 31
                | ((imm >> 1) & 0x3FF) << 21
                | ((imm >> 11) & 0x1) << 20
                | ((imm >> 12) & 0xFF) << 12;
            Some(field | ((rd as u32 & 0x1F) << 7) | 0x6F)
        }
        FixupKind::Riscv64Branch { funct3, rs1, rs2 } => {
            if disp % 2 != 0 {
                return None;
            }
            let imm = disp;
            if !fits_signed(imm, 13) {
                return None;
            }
            let imm = imm as u32;
            // B-type immediate field order: imm[12|10:5] | ... | imm[4:1|11].
            let hi = ((imm >> 12) & 0x1) << 31 | ((imm >> 5) & 0x3F) << 25;
            let lo = ((imm >> 1) & 0xF) << 8 | ((imm >> 11) & 0x1) << 7;
            Some(hi | ((rs2 as u32 & 0x1F) << 20) | ((rs1 as u32 & 0x1F) << 15) | ((funct3 as u32 & 0x7) << 12) | lo | 0x63)
        }
    }
}

/// Minimal unwind metadata: enough for a caller to build a `.eh_frame`/FDE or
/// Windows unwind table entry without this crate depending on either format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnwindInfo {
    pub prologue_size: u32,
    pub frame_size: u32,
}

/// The relocatable code image produced by one compile (§6).
#[derive(Clone, Debug, PartialEq)]
pub struct Code {
    pub bytes: Vec<u8>,
    pub frame_size: u32,
    pub relocs: Vec<MachRelocation>,
    pub unwind: Option<UnwindInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cranelift_entity::EntityRef;

    #[test]
    fn branch_fixup_resolves_forward() {
        let mut buf = MachBuffer::new();
        let b0 = Block::new(0);
        let b1 = Block::new(1);
        buf.bind_block(b0);
        buf.reserve_branch(b1, FixupKind::Aarch64Branch26);
        buf.emit_u32_le(0xC003_5FD6); // RET, filler
        buf.bind_block(b1);
        buf.resolve().unwrap();
        let (bytes, _) = buf.finish();
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &0x1400_0002u32.to_le_bytes());
    }

    #[test]
    fn out_of_range_branch_errors() {
        let mut buf = MachBuffer::new();
        let b0 = Block::new(0);
        let b1 = Block::new(1);
        buf.bind_block(b0);
        buf.reserve_branch(b1, FixupKind::Aarch64CondBranch19 { cond_bits: 0 });
        for _ in 0..(1 << 20) {
            buf.emit_u32_le(0);
        }
        buf.bind_block(b1);
        assert!(matches!(buf.resolve(), Err(EncodingError::BranchOutOfRange { .. })));
    }
}
