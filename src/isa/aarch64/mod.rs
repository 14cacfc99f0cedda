//! The AArch64 target back end (§4.4-§4.8, illustrated by the spec on this
//! architecture): target legalizer predicates ([`legalize`]), the machine
//! instruction set ([`inst`]), its bit-exact encoder ([`emit`]), AAPCS64
//! argument/return/TLS marshaling ([`abi`]), the register file ([`regs`]),
//! and the ISLE-style lowering rule tables ([`lower`]) that tie them
//! together into a [`TargetIsa`].
//!
//! Grounded on the teacher's `isa::aarch64` module split (`abi`, `inst`,
//! `lower`, plus a `settings` module this crate collapses into
//! [`crate::legalize::OpLegalizerProfile`] since both targets here always
//! set the same flags).

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

/// An AArch64 back end: an immutable triple plus the fixed register bank
/// (§5: shareable read-only across concurrently compiling functions, so it
/// carries no per-compile mutable state).
pub struct Aarch64Backend {
    triple: Triple,
}

impl Aarch64Backend {
    pub fn new(triple: Triple) -> Self {
        Self { triple }
    }
}

impl TargetIsa for Aarch64Backend {
    fn name(&self) -> &'static str {
        "aarch64"
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
        matches!(call_conv, CallConv::SystemV | CallConv::AppleAarch64)
    }
}
