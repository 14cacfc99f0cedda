//! The `Function`: owns a signature, a data-flow graph, and a layout.

use core::fmt::{self, Display, Formatter};

use super::dfg::{DataFlowGraph, Signature};
use super::entities::{Block, StackSlot};
use super::layout::Layout;
use super::types::Type;
use cranelift_entity::PrimaryMap;

/// Calling convention identifiers recognized by the ABI layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// Best performance, not ABI-stable.
    Fast,
    /// The stable System V AMD64 / AAPCS64-family convention.
    SystemV,
    /// `AAPCS64`, AArch64's canonical calling convention.
    AppleAarch64,
}

impl Display for CallConv {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let s = match self {
            CallConv::Fast => "fast",
            CallConv::SystemV => "system_v",
            CallConv::AppleAarch64 => "aapcs64",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StackSlotData {
    pub size: u32,
    pub align_shift: u8,
}

/// A function: signature, data-flow graph, and layout. Destruction is
/// bottom-up (dropping `dfg`/`layout`/`stack_slots` just frees arenas; there
/// are no back-references to clean up, since the IR has no owning pointers,
/// only arena indices).
#[derive(Clone)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub dfg: DataFlowGraph,
    pub layout: Layout,
    pub stack_slots: PrimaryMap<StackSlot, StackSlotData>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: Signature) -> Self {
        Self {
            name: name.into(),
            signature,
            dfg: DataFlowGraph::new(),
            layout: Layout::new(),
            stack_slots: PrimaryMap::new(),
        }
    }

    pub fn clear(&mut self) {
        self.dfg.clear();
        self.layout.clear();
        self.stack_slots.clear();
    }

    pub fn create_block(&mut self) -> Block {
        let block = self.dfg.make_block();
        block
    }

    pub fn create_stack_slot(&mut self, size: u32, align_shift: u8) -> StackSlot {
        self.stack_slots.push(StackSlotData { size, align_shift })
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.layout.entry_block()
    }

    pub fn return_types(&self) -> &[Type] {
        &self.signature.returns
    }

    pub fn param_types(&self) -> &[Type] {
        &self.signature.params
    }
}
