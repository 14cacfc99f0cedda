//! The target abstraction (§6's `{target: {x86_64|aarch64|riscv64, ...}}`
//! configuration surface): a [`TargetIsa`] trait object that bundles a
//! target's legalizer profile, ABI, [`crate::machinst::LowerBackend`], and
//! encoder behind one object-safe interface, plus the [`lookup`] function
//! that resolves a [`target_lexicon::Triple`] to a [`Builder`] for one.
//!
//! Grounded on the teacher's `cranelift_codegen::isa` module: `lookup`
//! dispatches on `Triple::architecture` the same way, and a target compiled
//! out of the build (here, only `x86_64`, named in the spec's context
//! surface but never implemented) returns [`LookupError::Unsupported`]
//! rather than panicking.

pub mod aarch64;
pub mod riscv64;

use core::fmt;

use smallvec::SmallVec;
use target_lexicon::{Architecture, Triple};

use crate::binemit::{Code, MachBuffer};
use crate::error::{EncodingError, LowerError};
use crate::ir::{Block, CallConv, Function};
use crate::legalize::OpLegalizerProfile;
use crate::machinst::{CoverageTracker, LowerBackend};
use crate::regalloc::{PReg, RegAlloc, RegClass, VReg};

/// One target instruction, abstract over the concrete per-ISA `Inst` enum.
/// Every backend's `Inst` implements this so the target-independent
/// register-allocation driver (§4.6) can walk a `VCode<I>` without knowing
/// which ISA it came from.
pub trait MachInst: fmt::Debug + Clone {
    /// The virtual registers this instruction reads, in operand order.
    fn uses(&self) -> SmallVec<[VReg; 4]>;
    /// The virtual registers this instruction defines.
    fn defs(&self) -> SmallVec<[VReg; 2]>;
}

/// Bit-exact encoding of one target instruction into a [`MachBuffer`] (§4.7),
/// given the final register allocation and the IR block it was lowered
/// from (needed so branch terminators can call `reserve_branch` against the
/// right target).
pub trait Emit: MachInst {
    fn emit(&self, buf: &mut MachBuffer, ra: &RegAlloc, block: Block);
}

/// A target's fixed set of allocatable physical registers, partitioned by
/// class and ordered callee-saved-last (so the allocator, which pops off the
/// end of the free list, hands out caller-saved registers first -- see
/// `RegAlloc::init_regs`).
#[derive(Clone, Debug)]
pub struct RegisterBank {
    pub int: Vec<PReg>,
    pub float: Vec<PReg>,
    pub vector: Vec<PReg>,
}

impl RegisterBank {
    pub fn init(&self, ra: &mut RegAlloc) {
        ra.init_regs(&self.int, &self.float, &self.vector);
    }
}

/// The object-safe interface the back end's pipeline driver ([`crate::context::Context`])
/// programs against. One instance is built per compile target and may be
/// shared (read-only) across concurrently compiling functions (§5).
pub trait TargetIsa: Send + Sync {
    /// Short identifier used in diagnostics (`LegalizeError::UnsupportedOp`'s
    /// `target` field) and logging.
    fn name(&self) -> &'static str;

    fn triple(&self) -> &Triple;

    /// The target-agnostic op legalizer's capability flags for this target
    /// (§4.3).
    fn op_legalizer_profile(&self) -> OpLegalizerProfile;

    /// Lower `func` to machine instructions, run the linear-scan allocator,
    /// and encode the result into a relocatable [`Code`] image (§2's
    /// `lower -> regalloc -> encode` pipeline tail).
    ///
    /// Combined into one trait method (rather than three) so that `Inst`,
    /// the per-target concrete machine-instruction type, never has to cross
    /// the object-safety boundary: only `TargetIsa` is dynamically
    /// dispatched, everything generic over `B::Inst` stays monomorphized
    /// inside each target's own module.
    fn compile(&self, func: &Function, coverage: Option<&mut CoverageTracker>) -> Result<Code, LowerError>;

    /// Classify `call_conv` as natively supported by this target, used by
    /// [`crate::context::Context`] to reject an unsupported combination
    /// before lowering begins.
    fn supports_call_conv(&self, call_conv: CallConv) -> bool;
}

/// Reason a [`lookup`] failed to produce a [`Builder`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LookupError {
    /// The architecture is recognized but this crate has no backend for it
    /// (x86-64 is named in the spec's context surface but never
    /// implemented, mirroring a target compiled out of the teacher's build).
    Unsupported,
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LookupError::Unsupported => write!(f, "no backend registered for this target"),
        }
    }
}

/// A not-yet-finished target configuration, returned by [`lookup`]. Kept
/// separate from `TargetIsa` so a caller can apply shared `opt_level`/
/// `verification` settings (threaded in by [`crate::context::Context`])
/// before paying the (cheap but non-zero) cost of building the register
/// banks and rule tables.
pub struct Builder {
    triple: Triple,
    ctor: fn(Triple) -> Box<dyn TargetIsa>,
}

impl Builder {
    pub fn finish(self) -> Box<dyn TargetIsa> {
        (self.ctor)(self.triple)
    }

    pub fn triple(&self) -> &Triple {
        &self.triple
    }
}

/// Resolve `triple` to a target backend builder (§6's context configuration
/// surface). AArch64 and RISC-V64 are fully implemented; every other
/// architecture, including the otherwise-named `x86_64`, returns
/// [`LookupError::Unsupported`].
pub fn lookup(triple: Triple) -> Result<Builder, LookupError> {
    match triple.architecture {
        Architecture::Aarch64(_) => Ok(Builder { triple, ctor: |t| Box::new(aarch64::Aarch64Backend::new(t)) }),
        Architecture::Riscv64(_) => Ok(Builder { triple, ctor: |t| Box::new(riscv64::Riscv64Backend::new(t)) }),
        _ => Err(LookupError::Unsupported),
    }
}

/// Run the shared `lower -> regalloc -> encode` tail of the pipeline for one
/// target's backend, parameterized over its concrete `Inst`/ABI types.
/// Every [`TargetIsa::compile`] implementation is a thin call into this, so
/// the ordering guarantees of §5 (in-layout-order emission, deterministic
/// fixup resolution) are enforced exactly once rather than per target.
pub(crate) fn run_backend_pipeline<B>(
    func: &Function,
    backend: &B,
    regs: &RegisterBank,
    coverage: Option<&mut CoverageTracker>,
) -> Result<Code, LowerError>
where
    B: LowerBackend,
    B::Inst: Emit,
{
    let vcode = crate::machinst::lower_function(func, backend, coverage)?;

    let mut ra = RegAlloc::new();
    regs.init(&mut ra);
    assign_registers(&vcode, &mut ra);

    let ir_blocks: Vec<Block> = func.layout.blocks().collect();
    let mut buf = MachBuffer::new();
    // Bind every block's offset before emitting so forward branches resolve
    // in one pass (§4.7's `resolve`).
    for (mb, &ir_block) in vcode.block_order().iter().zip(ir_blocks.iter()) {
        buf.bind_block(ir_block);
        for inst in vcode.insts(*mb) {
            inst.emit(&mut buf, &ra, ir_block);
        }
    }
    buf.resolve().map_err(|e| match e {
        EncodingError::BranchOutOfRange { instruction, displacement } => {
            LowerError::IllegalImmediate(displacement.wrapping_add(instruction as i64))
        }
    })?;

    let (bytes, relocs) = buf.finish();
    let frame_size = vcode.stack_bytes() + ra.spill_slot_count() * 8;
    Ok(Code { bytes, frame_size, relocs, unwind: Some(crate::binemit::UnwindInfo { prologue_size: 4, frame_size }) })
}

/// A single forward pass over `VCode` in layout order: allocate each VReg's
/// register the first time it's defined or used, free it the last time it's
/// used. This is the "minimum contract" §4.6 leaves open beyond
/// `allocate`/`free`/`spill`: when a class's free pool is exhausted,
/// `spill` a fresh slot rather than failing the whole compile, matching
/// `RegallocError::OutOfRegisters`'s documented recovery path.
fn assign_registers<I: MachInst>(vcode: &crate::machinst::VCode<I>, ra: &mut RegAlloc) {
    use rustc_hash::FxHashMap;

    let mut last_use: FxHashMap<VReg, (crate::machinst::MachBlock, usize)> = FxHashMap::default();
    for &mb in vcode.block_order() {
        for (i, inst) in vcode.insts(mb).iter().enumerate() {
            for v in inst.uses() {
                last_use.insert(v, (mb, i));
            }
        }
    }

    let mut ensure = |ra: &mut RegAlloc, vcode: &crate::machinst::VCode<I>, v: VReg| {
        if ra.get_allocation(v).is_none() {
            let class = vcode.vreg_class(v);
            if ra.allocate(v, class).is_err() {
                ra.spill(v);
            }
        }
    };

    for &mb in vcode.block_order() {
        for (i, inst) in vcode.insts(mb).iter().enumerate() {
            for v in inst.defs() {
                ensure(ra, vcode, v);
            }
            for v in inst.uses() {
                ensure(ra, vcode, v);
                if last_use.get(&v) == Some(&(mb, i)) {
                    ra.free(v);
                }
            }
        }
    }
}

pub(crate) fn preg_name(class: RegClass, hw: u8) -> String {
    match class {
        RegClass::Int if hw == 31 => "sp".to_string(),
        RegClass::Int => format!("x{hw}"),
        RegClass::Float | RegClass::Vector => format!("v{hw}"),
    }
}
