//! The RISC-V64 (RV64GC) target back end (§4.4-§4.8): target legalizer
//! predicates ([`legalize`]), the machine instruction set ([`inst`]), its
//! bit-exact encoder ([`emit`]), the standard calling-convention
//! argument/return marshaling ([`abi`]), the register file ([`regs`]), and
//! the lowering rule tables ([`lower`]) that tie them together into a
//! [`TargetIsa`].
//!
//! Grounded on the teacher's `isa::aarch64` module split, adapted to RV64's
//! flagless, no-hardware-select primitive set.

pub mod abi;
pub mod emit;
pub mod inst;
pub mod legalize;
pub mod lower;
pub mod regs;

use target_lexicon::Triple;

use crate::binemit::Code;
use crate::error::LowerError;
use crate::ir::{CallConv, Function};
use crate::isa::{run_backend_pipeline, TargetIsa};
use crate::legalize::OpLegalizerProfile;
use crate::machinst::CoverageTracker;

/// A RISC-V64 back end: an immutable triple plus the fixed register bank
/// (§5: shareable read-only across concurrently compiling functions).
pub struct Riscv64Backend {
    triple: Triple,
}

impl Riscv64Backend {
    pub fn new(triple: Triple) -> Self {
        Self { triple }
    }
}

impl TargetIsa for Riscv64Backend {
    fn name(&self) -> &'static str {
        "riscv64"
    }

    fn triple(&self) -> &Triple {
        &self.triple
    }

    fn op_legalizer_profile(&self) -> OpLegalizerProfile {
        OpLegalizerProfile::native()
    }

    fn compile(&self, func: &Function, coverage: Option<&mut CoverageTracker>) -> Result<Code, LowerError> {
        run_backend_pipeline(func, self, &regs::register_bank(), coverage)
    }

    fn supports_call_conv(&self, call_conv: CallConv) -> bool {
        matches!(call_conv, CallConv::SystemV | CallConv::Fast)
    }
}
