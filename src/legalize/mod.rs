//! Target-agnostic op legalization (§4.3): rewrites illegal or expensive
//! integer division/remainder in place, and replaces operations a target
//! profile can't do natively with calls to a closed libcall table.
//!
//! Runs after optimization and before the target legalizer (§2's pipeline:
//! `optimize -> legalize (ops, target) -> lower`).

use crate::error::LegalizeError;
use crate::ir::dfg::Signature;
use crate::ir::{CallConv, Function, Imm64, Inst, InstructionData, Opcode, Type, Value};
use crate::ir::{F16, F32, F64, I128};

/// Target capability flags the legalizer consults (§4.3's "target profile").
/// Every target in this crate sets `has_integer_divide`/`has_integer_remainder`
/// since both AArch64 and RISC-V64 have native 32/64-bit integer divide
/// units; the flags exist so a future target without one (e.g. a
/// divide-less RISC-V `RV64I` profile) can flip them off and fall back to
/// the libcall path below.
#[derive(Clone, Copy, Debug)]
pub struct OpLegalizerProfile {
    pub has_integer_divide: bool,
    pub has_integer_remainder: bool,
}

impl OpLegalizerProfile {
    pub const fn native() -> Self {
        Self { has_integer_divide: true, has_integer_remainder: true }
    }
}

/// One entry in the closed `(opcode x type) -> libcall` table (§4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LibCall {
    pub symbol: &'static str,
    pub return_type: Type,
}

/// Looks up the libcall for `opcode` keyed by its first operand's type. Only
/// entries this crate's legalizer and lowering actually need are populated:
/// float division (when a target lacks a hardware FPU) and the I128
/// arithmetic no target here implements natively.
fn libcall_for(opcode: Opcode, operand_ty: Type) -> Option<LibCall> {
    match (opcode, operand_ty) {
        (Opcode::Fdiv, F32) => Some(LibCall { symbol: "__divsf3", return_type: F32 }),
        (Opcode::Fdiv, F64) => Some(LibCall { symbol: "__divdf3", return_type: F64 }),
        (Opcode::Imul, I128) => Some(LibCall { symbol: "__multi3", return_type: I128 }),
        (Opcode::Sdiv, I128) => Some(LibCall { symbol: "__divti3", return_type: I128 }),
        (Opcode::Udiv, I128) => Some(LibCall { symbol: "__udivti3", return_type: I128 }),
        (Opcode::Srem, I128) => Some(LibCall { symbol: "__modti3", return_type: I128 }),
        (Opcode::Urem, I128) => Some(LibCall { symbol: "__umodti3", return_type: I128 }),
        (Opcode::Fpromote, crate::ir::F16) => Some(LibCall { symbol: "__extendhfsf2", return_type: F32 }),
        (Opcode::Fdemote, F32) => Some(LibCall { symbol: "__truncsfhf2", return_type: crate::ir::F16 }),
        _ => None,
    }
}

/// Legalize every instruction in `func` in place against `profile`.
pub fn legalize_function(func: &mut Function, profile: &OpLegalizerProfile) -> Result<(), LegalizeError> {
    let insts: Vec<Inst> = func.layout.blocks().flat_map(|b| func.layout.block_insts(b).collect::<Vec<_>>()).collect();
    for inst in insts {
        legalize_inst(func, inst, profile)?;
    }
    Ok(())
}

fn legalize_inst(func: &mut Function, inst: Inst, profile: &OpLegalizerProfile) -> Result<(), LegalizeError> {
    let data = func.dfg.inst_data(inst).clone();
    let InstructionData::Binary { opcode, args } = &data else {
        return legalize_conversion(func, inst, &data);
    };
    let opcode = *opcode;
    let args = *args;
    let ty = func.dfg.value_type(args[0]);

    match opcode {
        Opcode::Udiv if ty.is_int() => {
            if let Some(shift) = const_pow2_shift(func, args[1], ty) {
                rewrite_binary(func, inst, Opcode::Ushr, args[0], iconst(func, inst, ty, shift as i64));
                return Ok(());
            }
            if !profile.has_integer_divide {
                return rewrite_to_libcall_or_err(func, inst, opcode, ty, args);
            }
        }
        Opcode::Urem if ty.is_int() => {
            if let Some(shift) = const_pow2_shift(func, args[1], ty) {
                let mask = (1i64 << shift).wrapping_sub(1);
                rewrite_binary(func, inst, Opcode::Iand, args[0], iconst(func, inst, ty, mask));
                return Ok(());
            }
            if !profile.has_integer_remainder {
                return rewrite_to_libcall_or_err(func, inst, opcode, ty, args);
            }
        }
        // Signed division/remainder by a power of two needs a bias-and-shift
        // sequence (round toward zero), which the spec leaves as a choice
        // between this stage and target lowering (§9 Open Question (b));
        // this crate resolves it at target lowering, where the bias add and
        // shift can share an addressing-mode immediate (see DESIGN.md).
        Opcode::Sdiv | Opcode::Srem if ty == I128 => {
            return rewrite_to_libcall_or_err(func, inst, opcode, ty, args);
        }
        Opcode::Imul if ty == I128 => {
            return rewrite_to_libcall_or_err(func, inst, opcode, ty, args);
        }
        // Both shipped targets (AArch64, RISC-V64) have hardware FPUs, so
        // `Fdiv` never reaches the libcall table in practice; the entry in
        // `libcall_for` exists for a future soft-float profile.
        _ => {}
    }
    Ok(())
}

fn legalize_conversion(func: &mut Function, inst: Inst, data: &InstructionData) -> Result<(), LegalizeError> {
    if let InstructionData::Unary { opcode, arg } = data {
        let opcode = *opcode;
        let arg = *arg;
        if matches!(opcode, Opcode::Fpromote | Opcode::Fdemote) {
            let arg_ty = func.dfg.value_type(arg);
            if let Some(call) = libcall_for(opcode, arg_ty) {
                let params = vec![arg_ty];
                let sig = Signature::libcall(CallConv::SystemV, call.symbol, params, vec![call.return_type]);
                let sig_ref = func.dfg.import_signature(sig);
                func.dfg.replace_inst(inst, InstructionData::Call { sig: sig_ref, args: smallvec::smallvec![arg] });
            }
        }
    }
    Ok(())
}

fn rewrite_to_libcall_or_err(
    func: &mut Function,
    inst: Inst,
    opcode: Opcode,
    ty: Type,
    args: [Value; 2],
) -> Result<(), LegalizeError> {
    match libcall_for(opcode, ty) {
        Some(call) => {
            let params = vec![ty, ty];
            let sig = Signature::libcall(CallConv::SystemV, call.symbol, params, vec![call.return_type]);
            let sig_ref = func.dfg.import_signature(sig);
            func.dfg.replace_inst(inst, InstructionData::Call { sig: sig_ref, args: smallvec::smallvec![args[0], args[1]] });
            Ok(())
        }
        None => Err(LegalizeError::UnsupportedOp { target: "generic", opcode, ty }),
    }
}

/// Insert a fresh `iconst` immediately before `before` and return its result.
fn iconst(func: &mut Function, before: Inst, ty: Type, value: i64) -> Value {
    let block = func.layout.inst_block(before).expect("`before` must be in the layout");
    let _ = block;
    let c = func.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: Imm64::new(value) }, &[ty]);
    func.layout.insert_inst_before(c, before);
    func.dfg.first_result(c)
}

fn rewrite_binary(func: &mut Function, inst: Inst, opcode: Opcode, lhs: Value, rhs: Value) {
    func.dfg.replace_inst(inst, InstructionData::Binary { opcode, args: [lhs, rhs] });
}

/// `Some(k)` iff `divisor` is defined by an `iconst` whose value is a
/// strictly-positive power of two at `ty`'s width.
fn const_pow2_shift(func: &Function, divisor: Value, ty: Type) -> Option<u32> {
    let InstructionData::Nullary { opcode: Opcode::Iconst, imm } = func.dfg.inst_data(match func.dfg.value_def(divisor) {
        crate::ir::dfg::ValueDef::Result(inst, _) => inst,
        crate::ir::dfg::ValueDef::Param(..) => return None,
    }) else {
        return None;
    };
    imm.as_pow2_shift(ty.bits(&func.dfg.types))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CallConv as CC, InstructionData as ID, I32};
    use smallvec::smallvec;

    fn make_udiv_by_const(divisor: i64) -> (Function, Inst) {
        let sig = Signature::new(CC::SystemV, vec![I32], vec![I32]);
        let mut f = Function::new("udiv", sig);
        let entry = f.create_block();
        f.layout.append_block(entry);
        let x = f.dfg.append_block_param(entry, I32);
        let c = f.dfg.make_inst(ID::Nullary { opcode: Opcode::Iconst, imm: Imm64::new(divisor) }, &[I32]);
        f.layout.append_inst(c, entry);
        let cv = f.dfg.first_result(c);
        let div = f.dfg.make_inst(ID::Binary { opcode: Opcode::Udiv, args: [x, cv] }, &[I32]);
        f.layout.append_inst(div, entry);
        let r = f.dfg.first_result(div);
        let ret = f.dfg.make_inst(ID::Return { args: smallvec![r] }, &[]);
        f.layout.append_inst(ret, entry);
        (f, div)
    }

    #[test]
    fn udiv_by_pow2_becomes_shift() {
        let (mut f, div) = make_udiv_by_const(8);
        legalize_function(&mut f, &OpLegalizerProfile::native()).unwrap();
        assert_eq!(f.dfg.inst_data(div).opcode(), Opcode::Ushr);
        assert_eq!(crate::verifier::verify(&f), Ok(()));
    }

    #[test]
    fn udiv_by_non_pow2_is_left_alone() {
        let (mut f, div) = make_udiv_by_const(3);
        legalize_function(&mut f, &OpLegalizerProfile::native()).unwrap();
        assert_eq!(f.dfg.inst_data(div).opcode(), Opcode::Udiv);
    }
}
