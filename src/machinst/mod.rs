//! The target-independent lowering framework (§4.5): walks IR blocks in
//! layout order and asks a target backend to turn each instruction into zero
//! or more machine instructions over virtual registers, producing a
//! [`VCode`].

use cranelift_entity::{entity_impl, EntityRef, PrimaryMap};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::LowerError;
use crate::ir::{Block, Function, Inst, StackSlot, Value};
use crate::regalloc::{RegClass, VReg};

/// A block in the lowered instruction stream. Created 1:1 with IR blocks in
/// a pre-pass so that jump targets are known before any instruction is
/// lowered (§4.5 step 1).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachBlock(u32);
entity_impl!(MachBlock, "mb");

/// Maps one SSA `Value` to the one or two `VReg`s that hold it (two for
/// `I128` lo/hi pairs and two-lane HFA returns).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueRegs {
    One(VReg),
    Two(VReg, VReg),
}

impl ValueRegs {
    /// The single register backing this value. Panics if called on a
    /// two-register value; callers that may see I128s must match explicitly.
    pub fn only(self) -> VReg {
        match self {
            ValueRegs::One(v) => v,
            ValueRegs::Two(..) => panic!("value is backed by two VRegs (I128/HFA), not one"),
        }
    }

    pub fn regs(self) -> SmallVec<[VReg; 2]> {
        match self {
            ValueRegs::One(v) => SmallVec::from_slice(&[v]),
            ValueRegs::Two(lo, hi) => SmallVec::from_slice(&[lo, hi]),
        }
    }
}

/// Records which lowering rules fired, keyed by rule id (§4.5's "instruction
/// selection guarantees" (iii)). Installed/uninstalled around a compile;
/// never required for correctness (§5, §9).
#[derive(Default, Debug, Clone)]
pub struct CoverageTracker {
    hits: FxHashMap<&'static str, u32>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, rule_id: &'static str) {
        *self.hits.entry(rule_id).or_insert(0) += 1;
    }

    pub fn hits(&self, rule_id: &str) -> u32 {
        self.hits.get(rule_id).copied().unwrap_or(0)
    }

    pub fn drain(&mut self) -> FxHashMap<&'static str, u32> {
        core::mem::take(&mut self.hits)
    }
}

/// The ordered output of lowering: one block of target instructions per IR
/// block, in IR layout order (§5's ordering guarantee).
pub struct VCode<I> {
    blocks: PrimaryMap<MachBlock, Vec<I>>,
    block_order: Vec<MachBlock>,
    ir_to_mach: FxHashMap<Block, MachBlock>,
    vreg_classes: Vec<RegClass>,
    stack_bytes: u32,
}

impl<I> VCode<I> {
    fn new() -> Self {
        Self {
            blocks: PrimaryMap::new(),
            block_order: Vec::new(),
            ir_to_mach: FxHashMap::default(),
            vreg_classes: Vec::new(),
            stack_bytes: 0,
        }
    }

    /// Total bytes of `stack_alloc`'d frame space this function needs,
    /// independent of the register allocator's own spill-slot area (§4.8's
    /// frame layout is the sum of the two).
    pub fn stack_bytes(&self) -> u32 {
        self.stack_bytes
    }

    pub fn mach_block_of(&self, ir_block: Block) -> MachBlock {
        self.ir_to_mach[&ir_block]
    }

    pub fn block_order(&self) -> &[MachBlock] {
        &self.block_order
    }

    pub fn insts(&self, block: MachBlock) -> &[I] {
        &self.blocks[block]
    }

    pub fn vreg_class(&self, v: VReg) -> RegClass {
        self.vreg_classes[v.index()]
    }

    pub fn num_vregs(&self) -> usize {
        self.vreg_classes.len()
    }
}

/// Per-function lowering state: the value-to-registers map, the VReg
/// counter, the block currently being lowered into, and the VCode under
/// construction (§4.5's "lowering context").
pub struct LowerCtx<'a, I> {
    pub func: &'a Function,
    vcode: VCode<I>,
    value_regs: FxHashMap<Value, ValueRegs>,
    next_vreg: u32,
    cur_block: MachBlock,
    coverage: Option<&'a mut CoverageTracker>,
    stack_slots: FxHashMap<StackSlot, i32>,
}

impl<'a, I> LowerCtx<'a, I> {
    pub fn alloc_vreg(&mut self, class: RegClass) -> VReg {
        let v = VReg::from_u32(self.next_vreg);
        self.next_vreg += 1;
        self.vcode.vreg_classes.push(class);
        v
    }

    /// Allocate a 2-VReg pair (I128 lo/hi, or a 2-element HFA).
    pub fn alloc_vreg_pair(&mut self, class: RegClass) -> (VReg, VReg) {
        (self.alloc_vreg(class), self.alloc_vreg(class))
    }

    pub fn emit(&mut self, inst: I) {
        self.vcode.blocks[self.cur_block].push(inst);
    }

    pub fn set_value_regs(&mut self, value: Value, regs: ValueRegs) {
        self.value_regs.insert(value, regs);
    }

    /// The registers backing `value`. Panics if `value` has not been lowered
    /// yet; guaranteed not to happen for a verified function lowered in
    /// layout order, since every use is dominated by its definition.
    pub fn value_regs(&self, value: Value) -> ValueRegs {
        self.value_regs[&value]
    }

    pub fn mach_block_of(&self, ir_block: Block) -> MachBlock {
        self.vcode.mach_block_of(ir_block)
    }

    pub fn record_rule(&mut self, rule_id: &'static str) {
        if let Some(tracker) = self.coverage.as_deref_mut() {
            tracker.record(rule_id);
        }
    }

    /// The byte offset of `slot` within the function's `stack_alloc` area,
    /// assigned once up front by [`stack_slot_layout`] (§4.8's `StackAddr`
    /// lowering reads this rather than recomputing frame layout per use).
    pub fn stack_slot_offset(&self, slot: StackSlot) -> i32 {
        self.stack_slots[&slot]
    }
}

/// The two-function-pointer backend contract of §4.5: convert one
/// non-terminator instruction, or one terminator, into target instructions.
pub trait LowerBackend {
    type Inst;

    /// Lower a single non-terminator IR instruction. Implementations try
    /// their rule table in descending priority order (ties broken by
    /// declaration order) and commit to the first rule whose extractors all
    /// succeed.
    fn lower_inst(&self, ctx: &mut LowerCtx<Self::Inst>, inst: Inst) -> Result<(), LowerError>;

    /// Lower a block terminator (`jump`, `brif`, or `return`), resolving
    /// block targets through `ctx.mach_block_of`.
    fn lower_branch(&self, ctx: &mut LowerCtx<Self::Inst>, inst: Inst) -> Result<(), LowerError>;
}

/// Run the lowering framework over `func` with `backend`, producing a
/// [`VCode`]. See §4.5 for the algorithm.
pub fn lower_function<'a, B: LowerBackend>(
    func: &'a Function,
    backend: &B,
    coverage: Option<&'a mut CoverageTracker>,
) -> Result<VCode<B::Inst>, LowerError> {
    let mut vcode = VCode::new();

    // Step 1: create a VCode block for each IR block, in layout order, so
    // that jump targets are known before lowering any terminator.
    for ir_block in func.layout.blocks() {
        let mb = vcode.blocks.push(Vec::new());
        vcode.block_order.push(mb);
        vcode.ir_to_mach.insert(ir_block, mb);
    }

    let (stack_slots, stack_bytes) = stack_slot_layout(func);
    vcode.stack_bytes = stack_bytes;

    let mut ctx = LowerCtx {
        func,
        vcode,
        value_regs: FxHashMap::default(),
        next_vreg: 0,
        cur_block: MachBlock::from_u32(0),
        coverage,
        stack_slots,
    };

    // Step 2: allocate every block's parameters up front, in layout order,
    // before lowering any instruction body. A `jump`/`brif` to a block later
    // in the layout (e.g. an if/else join) needs that block's param VRegs to
    // already exist so it can move its block-call arguments into them; a
    // single interleaved pass would leave forward edges unresolved.
    for ir_block in func.layout.blocks() {
        ctx.cur_block = ctx.vcode.mach_block_of(ir_block);
        for &param in func.dfg.block_params(ir_block) {
            let class = reg_class_of(func, param);
            let regs = alloc_value_regs(&mut ctx, class, func.dfg.value_type(param));
            ctx.set_value_regs(param, regs);
        }
    }

    for ir_block in func.layout.blocks() {
        ctx.cur_block = ctx.vcode.mach_block_of(ir_block);
        let last = func.layout.last_inst(ir_block);
        for inst in func.layout.block_insts(ir_block) {
            if Some(inst) == last {
                backend.lower_branch(&mut ctx, inst)?;
            } else {
                backend.lower_inst(&mut ctx, inst)?;
            }
        }
    }

    Ok(ctx.vcode)
}

fn reg_class_of(func: &Function, value: Value) -> RegClass {
    let ty = func.dfg.value_type(value);
    if ty.is_float() {
        if ty.is_vector() {
            RegClass::Vector
        } else {
            RegClass::Float
        }
    } else {
        RegClass::Int
    }
}

fn alloc_value_regs<I>(ctx: &mut LowerCtx<I>, class: RegClass, ty: crate::ir::Type) -> ValueRegs {
    if ty == crate::ir::I128 {
        let (lo, hi) = ctx.alloc_vreg_pair(class);
        ValueRegs::Two(lo, hi)
    } else {
        ValueRegs::One(ctx.alloc_vreg(class))
    }
}

/// Allocate the `ValueRegs` for one IR result and record it, used by every
/// backend's `lower_inst` rule bodies (spec's "constructors allocate VRegs").
pub fn alloc_result<I>(ctx: &mut LowerCtx<I>, value: Value, class: RegClass) -> ValueRegs {
    let ty = ctx.func.dfg.value_type(value);
    let regs = alloc_value_regs(ctx, class, ty);
    ctx.set_value_regs(value, regs);
    regs
}

/// Assign each of `func`'s stack slots a byte offset in a single bump-
/// allocated frame area, target-independently (every target in this crate
/// addresses its frame the same way: a flat area below the incoming stack
/// pointer, slots packed in declaration order with each slot aligned to its
/// own `align_shift`). Returns the per-slot offsets and the total rounded-up
/// size. Run once per compile, before any instruction is lowered, so every
/// `stack_alloc` use in the function agrees on the same layout.
pub fn stack_slot_layout(func: &Function) -> (FxHashMap<StackSlot, i32>, u32) {
    let mut offsets = FxHashMap::default();
    let mut cursor: u32 = 0;
    for (slot, data) in func.stack_slots.iter() {
        let align = 1u32 << data.align_shift;
        cursor = (cursor + align - 1) & !(align - 1);
        offsets.insert(slot, cursor as i32);
        cursor += data.size;
    }
    let total = (cursor + 15) & !15;
    (offsets, total)
}
