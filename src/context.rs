//! Pipeline driver (§2, §4.9): threads a [`Function`] through
//! `build -> verify -> optimize -> legalize (ops) -> lower -> regalloc -> encode`.
//! Per-target legalization (condition codes, arithmetic immediates, load/store
//! offsets) is not a separate pass here; each backend's lowering rules consult
//! it instruction by instruction as they select machine instructions (§4.4,
//! §4.5), so it has no separate stage in this driver.
//!
//! Grounded on the teacher's `cranelift_codegen::Context`: an ISA instance is
//! immutable and may be shared across concurrently compiling `Context`s
//! (§5), so `compile` takes `&dyn TargetIsa` as an argument instead of owning
//! one, and `Context` itself only carries the `Function` and the knobs that
//! govern how it's compiled.

use rustc_hash::FxHashMap;

use crate::binemit::Code;
use crate::error::{CodegenResult, LegalizeError};
use crate::ir::Function;
use crate::isa::TargetIsa;
use crate::legalize::legalize_function;
use crate::machinst::CoverageTracker;
use crate::opt::optimize;
use crate::verifier::verify;

/// How aggressively the e-graph optimizer runs (§4.9). Mirrors the teacher's
/// three-way `OptLevel` split; `Speed` and `Size` behave identically in this
/// crate since its optimizer has a single saturation loop with no separate
/// size-tradeoff heuristics to pick between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// Skip the optimizer entirely; legalize the function as built.
    None,
    /// Run equality saturation and peephole rewriting (the default).
    #[default]
    Speed,
    Size,
}

/// Persistent compilation state threaded through one function at a time
/// (§2, §6). Reused across compiles of different functions the way the
/// teacher's `Context` is, so the coverage tracker's allocation is amortized
/// rather than rebuilt per function.
pub struct Context {
    /// The function being compiled.
    pub func: Function,
    pub opt_level: OptLevel,
    /// Whether to run the optimizer at all, independent of `opt_level`
    /// (`opt_level` picks *how*; this picks *whether*).
    pub optimize: bool,
    /// Whether to run the verifier between stages. Disabling this is only
    /// safe for a `Function` already known to be well-formed (§4.1's
    /// invariants are otherwise unchecked).
    pub verification: bool,
    coverage: Option<CoverageTracker>,
}

impl Context {
    pub fn new(func: Function) -> Self {
        Self { func, opt_level: OptLevel::default(), optimize: true, verification: true, coverage: None }
    }

    /// Reset to an empty function, keeping the allocated coverage tracker
    /// (if any) so `Context` can be reused for the next compile.
    pub fn clear(&mut self) {
        self.func.clear();
    }

    /// Install an empty rule-coverage tracker (§4.5, §5). Subsequent
    /// `compile` calls record which lowering rules fired until
    /// `take_coverage` drains it.
    pub fn enable_coverage_tracker(&mut self) {
        self.coverage = Some(CoverageTracker::new());
    }

    /// Drain the rule-hit counts recorded since the tracker was installed.
    /// Returns `None` if `enable_coverage_tracker` was never called.
    pub fn take_coverage(&mut self) -> Option<FxHashMap<&'static str, u32>> {
        self.coverage.as_mut().map(CoverageTracker::drain)
    }

    /// Run the full pipeline against `isa`, producing a relocatable code
    /// image (§4.9's state machine: `Built -> Verified -> Optimized ->
    /// Legalized -> Lowered -> Allocated -> Encoded`).
    pub fn compile(&mut self, isa: &dyn TargetIsa) -> CodegenResult<Code> {
        if !isa.supports_call_conv(self.func.signature.call_conv) {
            return Err(LegalizeError::UnsupportedCallConv {
                target: isa.name(),
                call_conv: self.func.signature.call_conv,
            }
            .into());
        }

        if self.verification {
            verify(&self.func)?;
        }

        if self.optimize && self.opt_level != OptLevel::None {
            optimize(&mut self.func);
            if self.verification {
                verify(&self.func)?;
            }
        }

        legalize_function(&mut self.func, &isa.op_legalizer_profile())?;
        if self.verification {
            verify(&self.func)?;
        }

        log::debug!("compiling `{}` for {}", self.func.name, isa.name());
        let code = isa.compile(&self.func, self.coverage.as_mut())?;
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallConv, InstructionData as ID, I32};
    use smallvec::smallvec;
    use std::str::FromStr;

    fn identity_fn() -> Function {
        let sig = crate::ir::Signature::new(CallConv::SystemV, vec![I32], vec![I32]);
        let mut f = Function::new("identity", sig);
        let entry = f.create_block();
        f.layout.append_block(entry);
        let x = f.dfg.append_block_param(entry, I32);
        let ret = f.dfg.make_inst(ID::Return { args: smallvec![x] }, &[]);
        f.layout.append_inst(ret, entry);
        f
    }

    #[test]
    fn compiles_identity_function_for_aarch64() {
        let isa = crate::isa::lookup(target_lexicon::Triple::from_str("aarch64-unknown-linux-gnu").unwrap())
            .unwrap()
            .finish();
        let mut ctx = Context::new(identity_fn());
        let code = ctx.compile(&*isa).unwrap();
        assert!(!code.bytes.is_empty());
    }

    #[test]
    fn rejects_unsupported_target() {
        let err = crate::isa::lookup(target_lexicon::Triple::from_str("x86_64-unknown-linux-gnu").unwrap());
        assert!(matches!(err, Err(crate::isa::LookupError::Unsupported)));
    }

    #[test]
    fn coverage_tracker_records_a_lowering_rule() {
        let isa = crate::isa::lookup(target_lexicon::Triple::from_str("aarch64-unknown-linux-gnu").unwrap())
            .unwrap()
            .finish();
        let mut ctx = Context::new(identity_fn());
        ctx.enable_coverage_tracker();
        ctx.compile(&*isa).unwrap();
        let hits = ctx.take_coverage().unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn rejects_unsupported_call_conv() {
        let sig = crate::ir::Signature::new(CallConv::Fast, vec![I32], vec![I32]);
        let mut f = Function::new("f", sig);
        let entry = f.create_block();
        f.layout.append_block(entry);
        let x = f.dfg.append_block_param(entry, I32);
        let ret = f.dfg.make_inst(ID::Return { args: smallvec![x] }, &[]);
        f.layout.append_inst(ret, entry);

        let isa = crate::isa::lookup(target_lexicon::Triple::from_str("aarch64-unknown-linux-gnu").unwrap())
            .unwrap()
            .finish();
        let mut ctx = Context::new(f);
        assert!(ctx.compile(&*isa).is_err());
    }
}
