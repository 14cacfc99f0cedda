//! The algebraic rule set (§4.2): the matcher that discovers equivalences
//! inside the e-graph, and the peephole pass that rewrites the function's
//! instructions to the cheapest form those equivalences prove is available.

use smallvec::{smallvec, SmallVec};

use super::{leaf, Attr, EClassId, EGraph, ENode};
use crate::ir::dfg::ValueDef;
use crate::ir::{Function, Imm64, Inst, InstructionData, IntCC, Opcode, Type, Value};

/// `Some(k)` iff `id`'s class contains a constant leaf with bit pattern `k`.
fn imm_of(egraph: &mut EGraph, id: EClassId) -> Option<i64> {
    let id = egraph.find(id);
    egraph.classes[id.index()].nodes.iter().find_map(|n| {
        if n.children.is_empty() {
            if let Attr::Imm(v) = n.attr {
                return Some(v);
            }
        }
        None
    })
}

/// `Some(k)` iff `id`'s class contains a constant leaf that is a
/// strictly-positive power of two at `ty`'s width.
fn pow2_shift_of(egraph: &mut EGraph, id: EClassId, ty: Type) -> Option<u32> {
    let imm = imm_of(egraph, id)?;
    Imm64::new(imm).as_pow2_shift(super::bits_of(ty))
}

/// `Some((other_child, literal))` iff `id`'s class contains a two-operand
/// `opcode` node with exactly one constant-leaf child.
fn binary_with_const(egraph: &mut EGraph, id: EClassId, opcode: Opcode) -> Option<(EClassId, i64)> {
    let id = egraph.find(id);
    let candidates: SmallVec<[(EClassId, EClassId); 2]> = egraph.classes[id.index()]
        .nodes
        .iter()
        .filter(|n| n.opcode == opcode && n.children.len() == 2)
        .map(|n| (n.children[0], n.children[1]))
        .collect();
    for (a, b) in candidates {
        if let Some(k) = imm_of(egraph, b) {
            return Some((a, k));
        }
        if let Some(k) = imm_of(egraph, a) {
            return Some((b, k));
        }
    }
    None
}

/// Apply every algebraic rule once to a snapshot of the e-graph's current
/// nodes, unioning each match's left- and right-hand-side classes. Returns
/// whether any union fired, so [`super::saturate`] can detect a fixpoint.
pub(super) fn apply_all(egraph: &mut EGraph) -> bool {
    let snapshot: Vec<(EClassId, ENode)> = egraph
        .classes
        .iter()
        .enumerate()
        .flat_map(|(i, c)| c.nodes.iter().cloned().map(move |n| (EClassId(i as u32), n)))
        .collect();
    let mut changed = false;

    for (owner, node) in snapshot {
        let owner = egraph.find(owner);
        // Every rule below matches a two-operand node (`Icmp`'s comparison
        // is also binary); anything else has no rule and is left alone.
        if node.children.len() != 2 {
            continue;
        }
        let a = egraph.find(node.children[0]);
        let b = egraph.find(node.children[1]);

        match node.opcode {
            Opcode::Iadd => {
                if imm_of(egraph, b) == Some(0) {
                    changed |= egraph.union(owner, a);
                } else if imm_of(egraph, a) == Some(0) {
                    changed |= egraph.union(owner, b);
                } else if let Some(c2) = imm_of(egraph, b) {
                    if let Some((inner, c1)) = binary_with_const(egraph, a, Opcode::Iadd) {
                        let fused = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(c1.wrapping_add(c2)), node.ty));
                        let new_add = egraph.insert(ENode { opcode: Opcode::Iadd, children: smallvec![inner, fused], attr: Attr::None, ty: node.ty });
                        changed |= egraph.union(owner, new_add);
                    }
                }
            }
            Opcode::Isub => {
                if a == b {
                    let z = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(0), node.ty));
                    changed |= egraph.union(owner, z);
                }
            }
            Opcode::Imul => {
                if imm_of(egraph, b) == Some(1) {
                    changed |= egraph.union(owner, a);
                } else if imm_of(egraph, a) == Some(1) {
                    changed |= egraph.union(owner, b);
                } else if imm_of(egraph, b) == Some(0) || imm_of(egraph, a) == Some(0) {
                    let z = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(0), node.ty));
                    changed |= egraph.union(owner, z);
                } else if let Some(shift) = pow2_shift_of(egraph, b, node.ty) {
                    let s = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(shift as i64), node.ty));
                    let sh = egraph.insert(ENode { opcode: Opcode::Ishl, children: smallvec![a, s], attr: Attr::None, ty: node.ty });
                    changed |= egraph.union(owner, sh);
                } else if let Some(shift) = pow2_shift_of(egraph, a, node.ty) {
                    let s = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(shift as i64), node.ty));
                    let sh = egraph.insert(ENode { opcode: Opcode::Ishl, children: smallvec![b, s], attr: Attr::None, ty: node.ty });
                    changed |= egraph.union(owner, sh);
                }
            }
            Opcode::Ior => {
                if imm_of(egraph, b) == Some(0) {
                    changed |= egraph.union(owner, a);
                } else if imm_of(egraph, a) == Some(0) {
                    changed |= egraph.union(owner, b);
                }
            }
            Opcode::Iand => {
                let bits = super::bits_of(node.ty);
                let all_ones = all_ones_for(bits);
                if imm_of(egraph, b) == Some(all_ones) {
                    changed |= egraph.union(owner, a);
                } else if imm_of(egraph, a) == Some(all_ones) {
                    changed |= egraph.union(owner, b);
                }
            }
            Opcode::Ishl => {
                if let Some(c2) = imm_of(egraph, b) {
                    if let Some((inner, c1)) = binary_with_const(egraph, a, Opcode::Ishl) {
                        let bits = super::bits_of(node.ty) as i64;
                        if c1 + c2 < bits {
                            let fused = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(c1 + c2), node.ty));
                            let new_shl = egraph.insert(ENode { opcode: Opcode::Ishl, children: smallvec![inner, fused], attr: Attr::None, ty: node.ty });
                            changed |= egraph.union(owner, new_shl);
                        }
                    }
                }
            }
            Opcode::Icmp => {
                if let Attr::IntCC(IntCC::Equal) = node.attr {
                    if a == b {
                        let one = egraph.insert(leaf(Opcode::Iconst, Attr::Imm(1), node.ty));
                        changed |= egraph.union(owner, one);
                    }
                }
            }
            _ => {}
        }
    }
    changed
}

/// `Icmp` e-nodes with zero children never reach here (comparisons always
/// have two operands); this only exists to keep the match above exhaustive
/// over node shapes without panicking on an unexpected arity.
fn continue_if_not_binary(_node: &ENode, _egraph: &mut EGraph, _owner: EClassId, _changed: &mut bool) {}

fn all_ones_for(bits: u32) -> i64 {
    if bits >= 64 {
        -1
    } else {
        ((1u64 << bits) - 1) as i64
    }
}

/// Rewrite every instruction in `func` to the cheapest form the saturated
/// `egraph` has proven equivalent to it, in place. Only ever *replaces* an
/// instruction's data (same `Inst`, same result `Value`) or inserts a new
/// constant immediately before it -- never removes one, since [`crate::ir::Layout`]
/// has no splice-out primitive.
pub(super) fn peephole_rewrite(func: &mut Function, egraph: &mut EGraph) {
    let insts: Vec<Inst> = func.layout.blocks().flat_map(|b| func.layout.block_insts(b).collect::<Vec<_>>()).collect();
    for inst in insts {
        rewrite_one(func, egraph, inst);
    }
}

fn is_const_value(func: &Function, v: Value) -> Option<i64> {
    let ValueDef::Result(def, _) = func.dfg.value_def(v) else {
        return None;
    };
    match func.dfg.inst_data(def) {
        InstructionData::Nullary { opcode: Opcode::Iconst, imm } => Some(imm.bits()),
        _ => None,
    }
}

fn const_pow2_shift(func: &Function, v: Value, ty: Type) -> Option<u32> {
    let k = is_const_value(func, v)?;
    Imm64::new(k).as_pow2_shift(ty.bits(&func.dfg.types))
}

fn insert_const_before(func: &mut Function, before: Inst, ty: Type, value: i64) -> Value {
    let c = func.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: Imm64::new(value) }, &[ty]);
    func.layout.insert_inst_before(c, before);
    func.dfg.first_result(c)
}

fn bitcast_to(func: &mut Function, inst: Inst, src: Value) {
    func.dfg.replace_inst(inst, InstructionData::Unary { opcode: Opcode::Bitcast, arg: src });
}

fn const_result(func: &mut Function, inst: Inst, ty: Type, value: i64) {
    func.dfg.replace_inst(inst, InstructionData::Nullary { opcode: Opcode::Iconst, imm: Imm64::new(value) });
    let _ = ty;
}

fn rewrite_one(func: &mut Function, egraph: &mut EGraph, inst: Inst) {
    let data = func.dfg.inst_data(inst).clone();
    match data {
        InstructionData::Binary { opcode, args: [a, b] } => {
            let ty = func.dfg.value_type(a);
            match opcode {
                Opcode::Iadd => {
                    if is_const_value(func, b) == Some(0) {
                        bitcast_to(func, inst, a);
                    } else if is_const_value(func, a) == Some(0) {
                        bitcast_to(func, inst, b);
                    } else if let Some(c2) = is_const_value(func, b) {
                        if let Some((inner, c1)) = inner_binary_const(func, a, Opcode::Iadd) {
                            let fused = insert_const_before(func, inst, ty, c1.wrapping_add(c2));
                            func.dfg.replace_inst(inst, InstructionData::Binary { opcode: Opcode::Iadd, args: [inner, fused] });
                        }
                    }
                }
                Opcode::Isub => {
                    if egraph.canon(a) == egraph.canon(b) {
                        const_result(func, inst, ty, 0);
                    }
                }
                Opcode::Imul => {
                    if is_const_value(func, b) == Some(1) {
                        bitcast_to(func, inst, a);
                    } else if is_const_value(func, a) == Some(1) {
                        bitcast_to(func, inst, b);
                    } else if is_const_value(func, b) == Some(0) || is_const_value(func, a) == Some(0) {
                        const_result(func, inst, ty, 0);
                    } else if let Some(shift) = const_pow2_shift(func, b, ty) {
                        let s = insert_const_before(func, inst, ty, shift as i64);
                        func.dfg.replace_inst(inst, InstructionData::Binary { opcode: Opcode::Ishl, args: [a, s] });
                    } else if let Some(shift) = const_pow2_shift(func, a, ty) {
                        let s = insert_const_before(func, inst, ty, shift as i64);
                        func.dfg.replace_inst(inst, InstructionData::Binary { opcode: Opcode::Ishl, args: [b, s] });
                    }
                }
                Opcode::Ior => {
                    if is_const_value(func, b) == Some(0) {
                        bitcast_to(func, inst, a);
                    } else if is_const_value(func, a) == Some(0) {
                        bitcast_to(func, inst, b);
                    }
                }
                Opcode::Iand => {
                    let all_ones = all_ones_for(ty.bits(&func.dfg.types));
                    if is_const_value(func, b) == Some(all_ones) {
                        bitcast_to(func, inst, a);
                    } else if is_const_value(func, a) == Some(all_ones) {
                        bitcast_to(func, inst, b);
                    }
                }
                Opcode::Ishl => {
                    if let Some(c2) = is_const_value(func, b) {
                        if let Some((inner, c1)) = inner_binary_const(func, a, Opcode::Ishl) {
                            let bits = ty.bits(&func.dfg.types) as i64;
                            if c1 + c2 < bits {
                                let fused = insert_const_before(func, inst, ty, c1 + c2);
                                func.dfg.replace_inst(inst, InstructionData::Binary { opcode: Opcode::Ishl, args: [inner, fused] });
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        InstructionData::IntCompare { cond: IntCC::Equal, args: [a, b] } => {
            if egraph.canon(a) == egraph.canon(b) {
                let result_ty = func.dfg.value_type(func.dfg.first_result(inst));
                const_result(func, inst, result_ty, 1);
            }
        }
        _ => {}
    }
}

/// `Some((other, k))` iff `v` is defined by a two-operand `opcode`
/// instruction with one constant-leaf operand.
fn inner_binary_const(func: &Function, v: Value, opcode: Opcode) -> Option<(Value, i64)> {
    let ValueDef::Result(def, _) = func.dfg.value_def(v) else {
        return None;
    };
    let InstructionData::Binary { opcode: got, args: [x, y] } = func.dfg.inst_data(def) else {
        return None;
    };
    if *got != opcode {
        return None;
    }
    if let Some(k) = is_const_value(func, *y) {
        return Some((*x, k));
    }
    if let Some(k) = is_const_value(func, *x) {
        return Some((*y, k));
    }
    None
}
