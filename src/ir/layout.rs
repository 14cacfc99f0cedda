//! Function layout: the order of blocks, and of instructions within a block.
//!
//! The DFG says what a `Value` or `Inst` *is*; the layout says where it
//! *sits*. Kept as doubly-linked lists (via dense secondary maps) so that
//! the legalizer and lowering passes can splice instructions in without
//! renumbering anything.

use cranelift_entity::SecondaryMap;

use super::entities::{Block, Inst};

#[derive(Clone, Copy, Default)]
struct BlockNode {
    prev: Option<Block>,
    next: Option<Block>,
    first_inst: Option<Inst>,
    last_inst: Option<Inst>,
}

#[derive(Clone, Copy, Default)]
struct InstNode {
    block: Option<Block>,
    prev: Option<Inst>,
    next: Option<Inst>,
}

/// Doubly linked block and instruction order for a [`Function`](super::Function).
#[derive(Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    insts: SecondaryMap<Inst, InstNode>,
    first_block: Option<Block>,
    last_block: Option<Block>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.insts.clear();
        self.first_block = None;
        self.last_block = None;
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.first_block
    }

    /// Append `block` to the end of the layout.
    pub fn append_block(&mut self, block: Block) {
        let node = BlockNode { prev: self.last_block, next: None, first_inst: None, last_inst: None };
        self.blocks[block] = node;
        if let Some(prev) = self.last_block {
            self.blocks[prev].next = Some(block);
        } else {
            self.first_block = Some(block);
        }
        self.last_block = Some(block);
    }

    pub fn is_block_inserted(&self, block: Block) -> bool {
        Some(block) == self.first_block || self.blocks[block].prev.is_some() || self.blocks[block].next.is_some()
    }

    pub fn blocks(&self) -> BlockIter<'_> {
        BlockIter { layout: self, next: self.first_block }
    }

    pub fn next_block(&self, block: Block) -> Option<Block> {
        self.blocks[block].next
    }

    /// Append `inst` to the end of `block`'s instruction list.
    pub fn append_inst(&mut self, inst: Inst, block: Block) {
        let prev = self.blocks[block].last_inst;
        self.insts[inst] = InstNode { block: Some(block), prev, next: None };
        if let Some(prev) = prev {
            self.insts[prev].next = Some(inst);
        } else {
            self.blocks[block].first_inst = Some(inst);
        }
        self.blocks[block].last_inst = Some(inst);
    }

    /// Insert `inst` immediately before `before`, in the same block.
    pub fn insert_inst_before(&mut self, inst: Inst, before: Inst) {
        let block = self.insts[before].block.expect("`before` must be in the layout");
        let prev = self.insts[before].prev;
        self.insts[inst] = InstNode { block: Some(block), prev, next: Some(before) };
        self.insts[before].prev = Some(inst);
        match prev {
            Some(prev) => self.insts[prev].next = Some(inst),
            None => self.blocks[block].first_inst = Some(inst),
        }
    }

    pub fn inst_block(&self, inst: Inst) -> Option<Block> {
        self.insts[inst].block
    }

    pub fn block_insts(&self, block: Block) -> InstIter<'_> {
        InstIter { layout: self, next: self.blocks[block].first_inst }
    }

    pub fn last_inst(&self, block: Block) -> Option<Inst> {
        self.blocks[block].last_inst
    }
}

pub struct BlockIter<'a> {
    layout: &'a Layout,
    next: Option<Block>,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = Block;
    fn next(&mut self) -> Option<Block> {
        let block = self.next?;
        self.next = self.layout.blocks[block].next;
        Some(block)
    }
}

pub struct InstIter<'a> {
    layout: &'a Layout,
    next: Option<Inst>,
}

impl<'a> Iterator for InstIter<'a> {
    type Item = Inst;
    fn next(&mut self) -> Option<Inst> {
        let inst = self.next?;
        self.next = self.layout.insts[inst].next;
        Some(inst)
    }
}
