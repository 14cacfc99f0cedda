//! The data-flow graph: dense arenas for values, instructions and blocks.
//!
//! The DFG owns the *definitions* (what each `Value` is, what each `Inst`
//! computes); the [`super::layout::Layout`] owns their *order*. Nothing in
//! here enforces SSA or dominance -- that's the verifier's job.

use cranelift_entity::{PrimaryMap, SecondaryMap};
use smallvec::SmallVec;

use super::entities::{Block, Inst, SigRef, Value};
use super::instructions::InstructionData;
use super::types::{Type, TypePool};

/// An external function signature, declared once and referenced by `call`.
///
/// `external_name` is `None` for an ordinary call to another IR function and
/// `Some(symbol)` for a libcall synthesized by the op legalizer (§4.3) --
/// this crate doesn't model a separate `FuncRef`/`ExternalName` table, so the
/// symbol a `Call` should be relocated against travels with its signature.
#[derive(Clone, PartialEq, Eq, Debug, Hash)]
pub struct Signature {
    pub call_conv: super::CallConv,
    pub params: Vec<Type>,
    pub returns: Vec<Type>,
    pub external_name: Option<&'static str>,
}

impl Signature {
    pub fn new(call_conv: super::CallConv, params: Vec<Type>, returns: Vec<Type>) -> Self {
        Self { call_conv, params, returns, external_name: None }
    }

    pub fn libcall(call_conv: super::CallConv, name: &'static str, params: Vec<Type>, returns: Vec<Type>) -> Self {
        Self { call_conv, params, returns, external_name: Some(name) }
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Hash)]
enum ValueData {
    Param { block: Block, index: u32, ty: Type },
    Result { inst: Inst, num: u32, ty: Type },
}

#[derive(Clone, Default)]
struct BlockData {
    params: Vec<Value>,
}

/// Dense arenas for Values, Instructions, Blocks, and external signatures.
#[derive(Clone, Default)]
pub struct DataFlowGraph {
    insts: PrimaryMap<Inst, InstructionData>,
    results: SecondaryMap<Inst, SmallVec<[Value; 2]>>,
    blocks: PrimaryMap<Block, BlockData>,
    values: PrimaryMap<Value, ValueData>,
    signatures: PrimaryMap<SigRef, Signature>,
    pub types: TypePool,
}

impl DataFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.insts.clear();
        self.results.clear();
        self.blocks.clear();
        self.values.clear();
        self.signatures.clear();
        self.types.clear();
    }

    // -- blocks --

    pub fn make_block(&mut self) -> Block {
        self.blocks.push(BlockData::default())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn append_block_param(&mut self, block: Block, ty: Type) -> Value {
        let index = self.blocks[block].params.len() as u32;
        let value = self.values.push(ValueData::Param { block, index, ty });
        self.blocks[block].params.push(value);
        value
    }

    pub fn block_params(&self, block: Block) -> &[Value] {
        &self.blocks[block].params
    }

    // -- signatures --

    pub fn import_signature(&mut self, sig: Signature) -> SigRef {
        self.signatures.push(sig)
    }

    pub fn signature(&self, sig: SigRef) -> &Signature {
        &self.signatures[sig]
    }

    // -- instructions --

    /// Insert an instruction and allocate `result_types.len()` fresh result
    /// values for it, in order.
    pub fn make_inst(&mut self, data: InstructionData, result_types: &[Type]) -> Inst {
        let inst = self.insts.push(data);
        let mut results = SmallVec::new();
        for (num, &ty) in result_types.iter().enumerate() {
            results.push(self.values.push(ValueData::Result { inst, num: num as u32, ty }));
        }
        self.results[inst] = results;
        inst
    }

    pub fn replace_inst(&mut self, inst: Inst, data: InstructionData) {
        self.insts[inst] = data;
    }

    pub fn inst_data(&self, inst: Inst) -> &InstructionData {
        &self.insts[inst]
    }

    pub fn inst_args(&self, inst: Inst) -> SmallVec<[Value; 4]> {
        self.insts[inst].args()
    }

    pub fn inst_results(&self, inst: Inst) -> &[Value] {
        &self.results[inst]
    }

    pub fn first_result(&self, inst: Inst) -> Value {
        self.results[inst][0]
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    // -- values --

    pub fn value_type(&self, value: Value) -> Type {
        match self.values[value] {
            ValueData::Param { ty, .. } => ty,
            ValueData::Result { ty, .. } => ty,
        }
    }

    pub fn value_def(&self, value: Value) -> ValueDef {
        match self.values[value] {
            ValueData::Param { block, index, .. } => ValueDef::Param(block, index),
            ValueData::Result { inst, num, .. } => ValueDef::Result(inst, num),
        }
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }
}

/// Where a `Value` was defined: a block parameter, or the Nth result of an
/// instruction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ValueDef {
    Param(Block, u32),
    Result(Inst, u32),
}

impl ValueDef {
    pub fn block(self) -> Option<Block> {
        match self {
            ValueDef::Param(b, _) => Some(b),
            ValueDef::Result(..) => None,
        }
    }
}
