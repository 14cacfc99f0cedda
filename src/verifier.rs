//! The verifier (§4.1): walks a [`Function`]'s layout once and checks every
//! SSA, dominance, type, and terminator invariant from §3. Pure: never
//! mutates the function it checks.

use rustc_hash::FxHashSet;

use crate::domtree::DomTree;
use crate::error::{Site, VerifierError};
use crate::ir::dfg::ValueDef;
use crate::ir::{Function, Inst, InstructionData, Opcode, Type, Value};

/// Verify every invariant in §3 against `func`. Returns the first violation
/// found, in layout order; never aggregates multiple errors (§7's "one error
/// per compile" propagation policy applies to every stage, including this
/// one).
pub fn verify(func: &Function) -> Result<(), VerifierError> {
    let domtree = DomTree::compute(func);
    let mut defined: FxHashSet<Value> = FxHashSet::default();

    // Invariant 1/4 (partial): every block-param and instruction-result value
    // is recorded as defined exactly once. Structurally guaranteed by the
    // arena builder (`DataFlowGraph::push` never reuses an id), but checked
    // here too since the verifier must not trust its caller blindly -- a
    // future non-arena producer (e.g. a textual-IR parser) could violate it.
    for block in func.layout.blocks() {
        for &p in func.dfg.block_params(block) {
            if !defined.insert(p) {
                return Err(VerifierError::DuplicateDefinition(p));
            }
        }
        for inst in func.layout.block_insts(block) {
            for &r in func.dfg.inst_results(inst) {
                if !defined.insert(r) {
                    return Err(VerifierError::DuplicateDefinition(r));
                }
            }
        }
    }

    for block in func.layout.blocks() {
        let last = func.layout.last_inst(block);
        match last {
            None => return Err(VerifierError::UnterminatedBlock(block)),
            Some(last) if !func.dfg.inst_data(last).is_terminator() => {
                return Err(VerifierError::UnterminatedBlock(block));
            }
            _ => {}
        }

        let mut position = 0u32;
        for inst in func.layout.block_insts(block) {
            let data = func.dfg.inst_data(inst);
            let is_last = Some(inst) == last;

            if data.is_terminator() && !is_last {
                return Err(VerifierError::BadTerminator(Site::Inst(inst)));
            }
            if !data.is_terminator() && is_last {
                return Err(VerifierError::UnterminatedBlock(block));
            }

            for arg in data.args() {
                check_defined_and_dominates(func, &domtree, arg, block, position)?;
            }
            check_types(func, inst, data)?;

            match data {
                InstructionData::Jump { dest } => {
                    check_block_call(func, inst, dest)?;
                }
                InstructionData::Branch { then_dest, else_dest, .. } => {
                    check_block_call(func, inst, then_dest)?;
                    check_block_call(func, inst, else_dest)?;
                }
                InstructionData::Return { args } => {
                    let rets = func.return_types();
                    if args.len() != rets.len() {
                        return Err(VerifierError::BadReturn(Site::Inst(inst)));
                    }
                    for (&a, &want) in args.iter().zip(rets) {
                        if func.dfg.value_type(a) != want {
                            return Err(VerifierError::BadReturn(Site::Inst(inst)));
                        }
                    }
                }
                _ => {}
            }

            position += 1;
        }
    }

    Ok(())
}

fn check_defined_and_dominates(
    func: &Function,
    domtree: &DomTree,
    value: Value,
    use_block: crate::ir::Block,
    use_position: u32,
) -> Result<(), VerifierError> {
    match func.dfg.value_def(value) {
        ValueDef::Param(def_block, _) => {
            if !func.layout.is_block_inserted(def_block) {
                return Err(VerifierError::UndefinedValue(Site::Value(value)));
            }
            if !domtree.dominates(def_block, use_block) {
                return Err(VerifierError::DanglingUse(Site::Value(value)));
            }
            Ok(())
        }
        ValueDef::Result(def_inst, _) => {
            let Some(def_block) = func.layout.inst_block(def_inst) else {
                return Err(VerifierError::UndefinedValue(Site::Value(value)));
            };
            if !domtree.dominates(def_block, use_block) {
                return Err(VerifierError::DanglingUse(Site::Value(value)));
            }
            if def_block == use_block {
                let def_position = position_in_block(func, def_block, def_inst);
                if def_position >= use_position {
                    return Err(VerifierError::DanglingUse(Site::Value(value)));
                }
            }
            Ok(())
        }
    }
}

fn position_in_block(func: &Function, block: crate::ir::Block, target: Inst) -> u32 {
    for (i, inst) in func.layout.block_insts(block).enumerate() {
        if inst == target {
            return i as u32;
        }
    }
    unreachable!("inst must be in its own block's layout")
}

fn check_block_call(func: &Function, inst: Inst, call: &crate::ir::BlockCall) -> Result<(), VerifierError> {
    let params = func.dfg.block_params(call.block);
    if call.args.len() != params.len() {
        return Err(VerifierError::ArityMismatch {
            site: Site::Inst(inst),
            expected: params.len(),
            found: call.args.len(),
        });
    }
    for (&arg, &param) in call.args.iter().zip(params) {
        let arg_ty = func.dfg.value_type(arg);
        let param_ty = func.dfg.value_type(param);
        if arg_ty != param_ty {
            return Err(VerifierError::TypeMismatch { site: Site::Inst(inst), expected: param_ty, found: arg_ty });
        }
    }
    Ok(())
}

/// Check invariant 3: an instruction's argument/result types match its
/// opcode's schema.
fn check_types(func: &Function, inst: Inst, data: &InstructionData) -> Result<(), VerifierError> {
    let site = Site::Inst(inst);
    let pool = &func.dfg.types;
    let results = func.dfg.inst_results(inst);
    let ty_of = |v: Value| func.dfg.value_type(v);

    match data {
        InstructionData::Binary { opcode, args } => {
            let (a, b) = (ty_of(args[0]), ty_of(args[1]));
            if a != b {
                return Err(VerifierError::TypeMismatch { site, expected: a, found: b });
            }
            let wants_float = matches!(opcode, Opcode::Fadd | Opcode::Fsub | Opcode::Fmul | Opcode::Fdiv);
            if wants_float && !a.is_float() {
                return Err(VerifierError::TypeMismatch { site, expected: Type::Float(a.bits(pool) as u16), found: a });
            }
            if !wants_float && !a.is_int() {
                return Err(VerifierError::TypeMismatch { site, expected: Type::Int(a.bits(pool) as u16), found: a });
            }
            let result = results[0];
            if ty_of(result) != a {
                return Err(VerifierError::TypeMismatch { site, expected: a, found: ty_of(result) });
            }
        }
        InstructionData::IntCompare { args, .. } => {
            let (a, b) = (ty_of(args[0]), ty_of(args[1]));
            if a != b || !a.is_int() {
                return Err(VerifierError::TypeMismatch { site, expected: a, found: b });
            }
            let result = ty_of(results[0]);
            if result != a.as_truthy() {
                return Err(VerifierError::TypeMismatch { site, expected: a.as_truthy(), found: result });
            }
        }
        InstructionData::FloatCompare { args, .. } => {
            let (a, b) = (ty_of(args[0]), ty_of(args[1]));
            if a != b || !a.is_float() {
                return Err(VerifierError::TypeMismatch { site, expected: a, found: b });
            }
            let result = ty_of(results[0]);
            if result != a.as_truthy() {
                return Err(VerifierError::TypeMismatch { site, expected: a.as_truthy(), found: result });
            }
        }
        InstructionData::Unary { opcode, arg } => {
            let a = ty_of(*arg);
            let r = ty_of(results[0]);
            let ok = match opcode {
                Opcode::Ineg => a.is_int() && r == a,
                Opcode::Fneg => a.is_float() && r == a,
                Opcode::Sextend | Opcode::Uextend => a.is_int() && r.is_int() && r.bits(pool) > a.bits(pool),
                Opcode::Ireduce => a.is_int() && r.is_int() && r.bits(pool) < a.bits(pool),
                Opcode::Fpromote => a.double_width() == Some(r),
                Opcode::Fdemote => a.half_width() == Some(r),
                Opcode::Bitcast => a.bits(pool) == r.bits(pool),
                Opcode::Bmask => a.is_int() && r.is_int() && a.lane_count() == r.lane_count(),
                Opcode::FcvtToSint | Opcode::FcvtToUint => a.is_float() && r.is_int() && a.lane_count() == r.lane_count(),
                Opcode::FcvtFromSint | Opcode::FcvtFromUint => a.is_int() && r.is_float() && a.lane_count() == r.lane_count(),
                _ => true,
            };
            if !ok {
                return Err(VerifierError::TypeMismatch { site, expected: a, found: r });
            }
        }
        InstructionData::Select { cond, if_true, if_false } => {
            let c = ty_of(*cond);
            let t = ty_of(*if_true);
            let f = ty_of(*if_false);
            if t != f {
                return Err(VerifierError::TypeMismatch { site, expected: t, found: f });
            }
            if c != t.as_truthy() {
                return Err(VerifierError::TypeMismatch { site, expected: t.as_truthy(), found: c });
            }
            if ty_of(results[0]) != t {
                return Err(VerifierError::TypeMismatch { site, expected: t, found: ty_of(results[0]) });
            }
        }
        InstructionData::Branch { cond, .. } => {
            let c = ty_of(*cond);
            if c != crate::ir::I8 {
                return Err(VerifierError::TypeMismatch { site, expected: crate::ir::I8, found: c });
            }
        }
        InstructionData::Load { ty, .. } => {
            if ty_of(results[0]) != *ty {
                return Err(VerifierError::TypeMismatch { site, expected: *ty, found: ty_of(results[0]) });
            }
        }
        InstructionData::Store { addr, value, .. } => {
            let _ = (addr, value);
        }
        InstructionData::Iconcat { lo, hi } => {
            let (l, h) = (ty_of(*lo), ty_of(*hi));
            if l != h || !l.is_int() {
                return Err(VerifierError::TypeMismatch { site, expected: l, found: h });
            }
            if ty_of(results[0]) != crate::ir::I128 {
                return Err(VerifierError::TypeMismatch { site, expected: crate::ir::I128, found: ty_of(results[0]) });
            }
        }
        InstructionData::Isplit { arg } => {
            if ty_of(*arg) != crate::ir::I128 {
                return Err(VerifierError::TypeMismatch { site, expected: crate::ir::I128, found: ty_of(*arg) });
            }
        }
        InstructionData::Call { sig, args } => {
            let signature = func.dfg.signature(*sig);
            if args.len() != signature.params.len() {
                return Err(VerifierError::ArityMismatch { site, expected: signature.params.len(), found: args.len() });
            }
            for (&a, &want) in args.iter().zip(&signature.params) {
                if ty_of(a) != want {
                    return Err(VerifierError::TypeMismatch { site, expected: want, found: ty_of(a) });
                }
            }
            if results.len() != signature.returns.len() {
                return Err(VerifierError::ArityMismatch { site, expected: signature.returns.len(), found: results.len() });
            }
            for (&r, &want) in results.iter().zip(&signature.returns) {
                if ty_of(r) != want {
                    return Err(VerifierError::TypeMismatch { site, expected: want, found: ty_of(r) });
                }
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VerifierError;
    use crate::ir::dfg::Signature;
    use crate::ir::{BlockCall, CallConv, IntCC, I32};
    use smallvec::smallvec;

    fn sig(params: Vec<crate::ir::Type>, returns: Vec<crate::ir::Type>) -> Signature {
        Signature::new(CallConv::SystemV, params, returns)
    }

    #[test]
    fn simple_add_and_return_verifies() {
        let mut f = Function::new("add1", sig(vec![I32], vec![I32]));
        let entry = f.create_block();
        f.layout.append_block(entry);
        let p = f.dfg.append_block_param(entry, I32);
        let one = f.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: 1i64.into() }, &[I32]);
        f.layout.append_inst(one, entry);
        let one_v = f.dfg.first_result(one);
        let add = f.dfg.make_inst(InstructionData::Binary { opcode: Opcode::Iadd, args: [p, one_v] }, &[I32]);
        f.layout.append_inst(add, entry);
        let sum = f.dfg.first_result(add);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![sum] }, &[]);
        f.layout.append_inst(ret, entry);

        assert_eq!(verify(&f), Ok(()));
    }

    #[test]
    fn undefined_value_is_rejected() {
        let mut f = Function::new("bad", sig(vec![], vec![I32]));
        let entry = f.create_block();
        f.layout.append_block(entry);
        // Create a value via an instruction that is never inserted into the layout.
        let orphan = f.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: 7i64.into() }, &[I32]);
        let orphan_v = f.dfg.first_result(orphan);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![orphan_v] }, &[]);
        f.layout.append_inst(ret, entry);

        assert!(matches!(verify(&f), Err(VerifierError::UndefinedValue(_))));
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let mut f = Function::new("noterm", sig(vec![], vec![]));
        let entry = f.create_block();
        f.layout.append_block(entry);
        let c = f.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: 0i64.into() }, &[I32]);
        f.layout.append_inst(c, entry);

        assert!(matches!(verify(&f), Err(VerifierError::UnterminatedBlock(_))));
    }

    #[test]
    fn mismatched_block_param_arity_is_rejected() {
        let mut f = Function::new("badjump", sig(vec![], vec![]));
        let entry = f.create_block();
        let target = f.create_block();
        f.layout.append_block(entry);
        f.layout.append_block(target);
        f.dfg.append_block_param(target, I32);
        let jmp = f.dfg.make_inst(InstructionData::Jump { dest: BlockCall::new(target, []) }, &[]);
        f.layout.append_inst(jmp, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![] }, &[]);
        f.layout.append_inst(ret, target);

        assert!(matches!(verify(&f), Err(VerifierError::ArityMismatch { .. })));
    }

    #[test]
    fn icmp_result_is_truthy_typed() {
        let mut f = Function::new("cmp", sig(vec![I32, I32], vec![]));
        let entry = f.create_block();
        f.layout.append_block(entry);
        let a = f.dfg.append_block_param(entry, I32);
        let b = f.dfg.append_block_param(entry, I32);
        let cmp = f.dfg.make_inst(
            InstructionData::IntCompare { cond: IntCC::SignedGreaterThan, args: [a, b] },
            &[crate::ir::I8],
        );
        f.layout.append_inst(cmp, entry);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![] }, &[]);
        f.layout.append_inst(ret, entry);

        assert_eq!(verify(&f), Ok(()));
    }
}
