//! The e-graph optimizer (§4.2): equality saturation over a hash-consed,
//! union-find-backed e-graph, used to prove IR values equivalent under
//! algebraic laws before the cheapest equivalent form is rewritten back
//! into the function's DFG.
//!
//! The teacher's production optimizer pulls in an external `cranelift-egraph`
//! crate (`Id`/`Language`/`UnionFind`) wired through `cranelift_codegen::egraph`;
//! this module inlines an equivalent, smaller engine in the same shape:
//! a closed [`ENode`] tagged union, an [`EClassId`] newtype, `FxHashMap`-backed
//! hash-consing, and a rebuild-to-fixpoint loop, grounded on the teacher's
//! `egraph/node.rs` and `egraph/cost.rs`.
//!
//! Extraction picks the cheapest e-node per e-class (`opt::cost`), but this
//! crate's [`crate::ir::Layout`] only supports *inserting* instructions, not
//! removing them (splicing, not rewriting from scratch, is the teacher's own
//! `Cursor` API shape too). So rather than reconstructing a fresh DFG from
//! the extracted choice wholesale, `rewrite::peephole_rewrite` applies the
//! same ruleset directly to each instruction in place -- consulting the
//! saturated e-graph's `canon` ids so that two operands which are only
//! *provably* equal (not merely syntactically identical) still trigger a
//! rewrite, which is equality saturation's whole point.

mod cost;
mod rewrite;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::ir::{Function, Inst, InstructionData, Opcode, Type, Value};

pub use cost::Cost;

/// Union-find id for an e-class. Never reused once merged; `find` always
/// terminates because union-by-rank bounds the find-chain length.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct EClassId(u32);

impl EClassId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An attribute folds constants, condition codes, and immediate bit patterns
/// into the e-node's hash-cons key, so that two structurally identical
/// expressions with different constants never collide (§4.2).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum Attr {
    None,
    Imm(i64),
    FImm(u64),
    IntCC(crate::ir::IntCC),
    FloatCC(crate::ir::FloatCC),
    /// A block parameter leaf, keyed by `(block, index)` as §4.2 specifies.
    Param(crate::ir::Block, u32),
    /// A side-effecting or otherwise non-pure instruction: keyed by its own
    /// identity so it is never hash-consed with another of the same shape.
    Identity(Inst),
}

/// One e-node: an operator applied to child e-classes, plus a folded
/// attribute. Hash-consed in [`EGraph::table`] keyed by this exact tuple, so
/// two values that reduce to the same `(opcode, children, attr)` share an
/// e-class (CSE, §8 property 7).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
struct ENode {
    opcode: Opcode,
    children: SmallVec<[EClassId; 2]>,
    attr: Attr,
    ty: Type,
}

fn leaf(opcode: Opcode, attr: Attr, ty: Type) -> ENode {
    ENode { opcode, children: SmallVec::new(), attr, ty }
}

/// `ty`'s bit width, without needing a [`crate::ir::TypePool`]. Every rule in
/// [`rewrite`] only ever matches integer scalar/vector arithmetic, which
/// never involves a pointer or struct type, so this never needs to consult a
/// function's pool the way [`Type::bits`] generally does.
fn bits_of(ty: Type) -> u32 {
    match ty {
        Type::Int(b) | Type::Float(b) => b as u32,
        Type::Vector { lane, lanes } => lane.bits() as u32 * lanes as u32,
        Type::Pointer(_) => 64,
        Type::Struct(_) => 0,
    }
}

/// An e-class: the union-find representative slot plus every e-node known to
/// be equivalent to it.
#[derive(Clone, Default)]
struct EClass {
    parent: Option<EClassId>,
    rank: u32,
    nodes: Vec<ENode>,
}

/// Builds and saturates the e-graph for one function, then answers
/// equivalence queries the rewrite pass consults.
///
/// Lifecycle: one `EGraph` is built per optimizer invocation and dropped
/// after rewriting; it never outlives a single [`optimize`] call.
pub struct EGraph {
    classes: Vec<EClass>,
    table: FxHashMap<ENode, EClassId>,
    value_class: FxHashMap<Value, EClassId>,
}

impl EGraph {
    fn new() -> Self {
        Self { classes: Vec::new(), table: FxHashMap::default(), value_class: FxHashMap::default() }
    }

    fn fresh_class(&mut self, node: ENode) -> EClassId {
        let id = EClassId(self.classes.len() as u32);
        self.classes.push(EClass { parent: None, rank: 0, nodes: vec![node] });
        id
    }

    /// Hash-cons `node`, returning its canonical e-class. Re-inserting an
    /// equal node (mod canonical children) always yields the same id
    /// (§8 property 7).
    fn insert(&mut self, node: ENode) -> EClassId {
        let node = self.canonicalize_node(node);
        if let Some(&id) = self.table.get(&node) {
            return self.find(id);
        }
        let id = self.fresh_class(node.clone());
        self.table.insert(node, id);
        id
    }

    fn canonicalize_node(&mut self, mut node: ENode) -> ENode {
        for c in node.children.iter_mut() {
            *c = self.find(*c);
        }
        node
    }

    /// Find the canonical representative of `id`, compressing the path as
    /// it walks (§4.2's union-find with path compression).
    fn find(&mut self, id: EClassId) -> EClassId {
        let mut cur = id;
        while let Some(p) = self.classes[cur.index()].parent {
            cur = p;
        }
        let root = cur;
        let mut cur = id;
        while let Some(p) = self.classes[cur.index()].parent {
            self.classes[cur.index()].parent = Some(root);
            cur = p;
        }
        root
    }

    /// Union `a` and `b`'s e-classes by rank. Returns `true` iff this union
    /// actually merged two previously-distinct classes (used to detect the
    /// saturation fixpoint).
    fn union(&mut self, a: EClassId, b: EClassId) -> bool {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return false;
        }
        let (a, b) = if self.classes[a.index()].rank < self.classes[b.index()].rank { (b, a) } else { (a, b) };
        self.classes[a.index()].rank = self.classes[a.index()].rank.max(self.classes[b.index()].rank + 1);
        self.classes[b.index()].parent = Some(a);
        let moved = core::mem::take(&mut self.classes[b.index()].nodes);
        self.classes[a.index()].nodes.extend(moved);
        true
    }

    /// Re-canonicalize every e-node's children and re-insert into the
    /// hash-cons table, merging any duplicates this iteration's unions
    /// created (§4.2 step 1's "rebuild").
    fn rebuild(&mut self) -> bool {
        let mut changed = false;
        self.table.clear();
        let all_nodes: Vec<(EClassId, ENode)> = self
            .classes
            .iter()
            .enumerate()
            .flat_map(|(i, c)| c.nodes.iter().cloned().map(move |n| (EClassId(i as u32), n)))
            .collect();
        for (owner, node) in all_nodes {
            let owner = self.find(owner);
            let node = self.canonicalize_node(node);
            match self.table.get(&node).copied() {
                Some(existing) => {
                    if self.union(existing, owner) {
                        changed = true;
                    }
                }
                None => {
                    self.table.insert(node, owner);
                }
            }
        }
        changed
    }

    /// The canonical e-class id backing `v`, after saturation (exposed as
    /// `getValue` in §4.2; two values in the same class are provably
    /// equivalent under the ruleset). Never invalidated by a later union:
    /// once computed it remains a valid (if perhaps non-canonical-until-
    /// refound) id for `v`'s class for the lifetime of this `EGraph`.
    pub fn canon(&mut self, v: Value) -> EClassId {
        let id = self.value_class[&v];
        self.find(id)
    }
}

const MAX_ITERATIONS: u32 = 10;
const CLASS_LIMIT: usize = 50_000;

/// Run equality saturation over `func` and rewrite each instruction to its
/// cheapest provably-equivalent form in place (§4.2). Idempotent: running
/// this twice on the same function yields structurally equivalent output
/// (§8 property 3), since the second run's e-graph starts from an already
/// fully-simplified function and saturates to the same fixpoint.
pub fn optimize(func: &mut Function) {
    let mut egraph = EGraph::new();
    build(func, &mut egraph);
    saturate(&mut egraph);
    rewrite::peephole_rewrite(func, &mut egraph);
}

/// Builder contract (§4.2): insert every value's defining e-node in layout
/// order, remembering its e-class id. Block parameters and constants become
/// leaf e-nodes keyed by their identity/literal bit pattern.
fn build(func: &Function, egraph: &mut EGraph) {
    for block in func.layout.blocks() {
        for (index, &param) in func.dfg.block_params(block).iter().enumerate() {
            let node = leaf(Opcode::Iconst, Attr::Param(block, index as u32), func.dfg.value_type(param));
            let id = egraph.insert(node);
            egraph.value_class.insert(param, id);
        }
        for inst in func.layout.block_insts(block) {
            if func.dfg.inst_data(inst).is_terminator() {
                continue;
            }
            insert_inst(func, egraph, inst);
        }
    }
}

fn insert_inst(func: &Function, egraph: &mut EGraph, inst: Inst) {
    let data = func.dfg.inst_data(inst);
    let opcode = data.opcode();
    let results = func.dfg.inst_results(inst);
    if results.is_empty() {
        return;
    }
    let ty = func.dfg.value_type(results[0]);

    let (children, attr): (SmallVec<[EClassId; 2]>, Attr) = if opcode.has_side_effects() {
        (SmallVec::new(), Attr::Identity(inst))
    } else {
        match data {
            InstructionData::Nullary { imm, .. } => (SmallVec::new(), Attr::Imm(imm.bits())),
            InstructionData::NullaryFloat { imm, .. } => (SmallVec::new(), Attr::FImm(imm.bits())),
            InstructionData::UnaryImm { imm, .. } => (SmallVec::new(), Attr::Imm(imm.bits())),
            InstructionData::Unary { arg, .. } => (SmallVec::from_slice(&[egraph.value_class[arg]]), Attr::None),
            InstructionData::Binary { args, .. } => {
                let mut kids: SmallVec<[EClassId; 2]> = args.iter().map(|a| egraph.value_class[a]).collect();
                if opcode.is_commutative() {
                    kids.sort();
                }
                (kids, Attr::None)
            }
            InstructionData::IntCompare { cond, args } => {
                (args.iter().map(|a| egraph.value_class[a]).collect(), Attr::IntCC(*cond))
            }
            InstructionData::FloatCompare { cond, args } => {
                (args.iter().map(|a| egraph.value_class[a]).collect(), Attr::FloatCC(*cond))
            }
            InstructionData::Select { cond, if_true, if_false } => (
                SmallVec::from_slice(&[egraph.value_class[cond], egraph.value_class[if_true], egraph.value_class[if_false]]),
                Attr::None,
            ),
            InstructionData::Iconcat { lo, hi } => (SmallVec::from_slice(&[egraph.value_class[lo], egraph.value_class[hi]]), Attr::None),
            InstructionData::Isplit { arg } => (SmallVec::from_slice(&[egraph.value_class[arg]]), Attr::None),
            // Calls, loads/stores, stack_alloc, tls_value: side-effecting or
            // identity-sensitive; handled by the `has_side_effects` guard
            // above, except tls_value and stack_alloc which carry no
            // operands but are still never safe to CSE across an unrelated
            // one (distinct stack slots), so key them by instruction too.
            _ => (SmallVec::new(), Attr::Identity(inst)),
        }
    };

    let node = ENode { opcode, children, attr, ty };
    let id = egraph.insert(node);
    egraph.value_class.insert(results[0], id);
}

/// Equality saturation's inner loop (§4.2 algorithm, §4.9's state machine
/// `Ready -> Matching -> Unioning -> Rebuilding -> Ready`): apply every rule
/// once per iteration, then rebuild; stop at a fixpoint, the iteration cap,
/// or the e-class count limit.
fn saturate(egraph: &mut EGraph) {
    for _ in 0..MAX_ITERATIONS {
        if egraph.classes.len() > CLASS_LIMIT {
            break;
        }
        let matched_any = rewrite::apply_all(egraph);
        let rebuilt_any = egraph.rebuild();
        if !matched_any && !rebuilt_any {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::dfg::Signature;
    use crate::ir::{CallConv, Function, InstructionData, Opcode, I32};
    use smallvec::smallvec;

    fn build_redundant_adds() -> (Function, Value, Value) {
        let sig = Signature::new(CallConv::SystemV, vec![I32], vec![I32]);
        let mut f = Function::new("f", sig);
        let entry = f.create_block();
        f.layout.append_block(entry);
        let x = f.dfg.append_block_param(entry, I32);

        let zero = f.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: 0i64.into() }, &[I32]);
        f.layout.append_inst(zero, entry);
        let zero_v = f.dfg.first_result(zero);

        let add1 = f.dfg.make_inst(InstructionData::Binary { opcode: Opcode::Iadd, args: [x, zero_v] }, &[I32]);
        f.layout.append_inst(add1, entry);
        let r1 = f.dfg.first_result(add1);

        let add2 = f.dfg.make_inst(InstructionData::Binary { opcode: Opcode::Iadd, args: [r1, zero_v] }, &[I32]);
        f.layout.append_inst(add2, entry);
        let r = f.dfg.first_result(add2);

        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![r] }, &[]);
        f.layout.append_inst(ret, entry);
        (f, x, r)
    }

    #[test]
    fn x_plus_zero_plus_zero_canonicalizes_to_x() {
        let (f, x, r) = build_redundant_adds();
        let mut egraph = EGraph::new();
        build(&f, &mut egraph);
        saturate(&mut egraph);
        assert_eq!(egraph.canon(x), egraph.canon(r));
    }

    #[test]
    fn optimizer_rewrites_chain_to_bitcasts_of_x() {
        let (mut f, _x, r) = build_redundant_adds();
        optimize(&mut f);
        assert_eq!(crate::verifier::verify(&f), Ok(()));
        let entry = f.entry_block().unwrap();
        let def_inst = match f.dfg.value_def(r) {
            crate::ir::dfg::ValueDef::Result(i, _) => i,
            _ => panic!("expected an instruction result"),
        };
        assert_eq!(f.dfg.inst_data(def_inst).opcode(), Opcode::Bitcast);
        let _ = entry;
    }

    #[test]
    fn optimize_is_idempotent() {
        let (mut f, _, _) = build_redundant_adds();
        optimize(&mut f);
        let snapshot_once: Vec<_> =
            f.layout.blocks().flat_map(|b| f.layout.block_insts(b).map(|i| format!("{:?}", f.dfg.inst_data(i))).collect::<Vec<_>>()).collect();
        optimize(&mut f);
        let snapshot_twice: Vec<_> =
            f.layout.blocks().flat_map(|b| f.layout.block_insts(b).map(|i| format!("{:?}", f.dfg.inst_data(i))).collect::<Vec<_>>()).collect();
        assert_eq!(snapshot_once, snapshot_twice);
    }

    #[test]
    fn icmp_eq_self_is_always_true() {
        let sig = Signature::new(CallConv::SystemV, vec![I32], vec![crate::ir::I8]);
        let mut f = Function::new("same", sig);
        let entry = f.create_block();
        f.layout.append_block(entry);
        let x = f.dfg.append_block_param(entry, I32);
        let cmp = f.dfg.make_inst(
            InstructionData::IntCompare { cond: crate::ir::IntCC::Equal, args: [x, x] },
            &[crate::ir::I8],
        );
        f.layout.append_inst(cmp, entry);
        let cmp_v = f.dfg.first_result(cmp);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![cmp_v] }, &[]);
        f.layout.append_inst(ret, entry);

        optimize(&mut f);
        assert_eq!(crate::verifier::verify(&f), Ok(()));
        assert_eq!(f.dfg.inst_data(cmp).opcode(), Opcode::Iconst);
    }

    #[test]
    fn mul_by_pow2_becomes_shift() {
        let sig = Signature::new(CallConv::SystemV, vec![I32], vec![I32]);
        let mut f = Function::new("scale", sig);
        let entry = f.create_block();
        f.layout.append_block(entry);
        let x = f.dfg.append_block_param(entry, I32);
        let c = f.dfg.make_inst(InstructionData::Nullary { opcode: Opcode::Iconst, imm: 8i64.into() }, &[I32]);
        f.layout.append_inst(c, entry);
        let cv = f.dfg.first_result(c);
        let mul = f.dfg.make_inst(InstructionData::Binary { opcode: Opcode::Imul, args: [x, cv] }, &[I32]);
        f.layout.append_inst(mul, entry);
        let r = f.dfg.first_result(mul);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![r] }, &[]);
        f.layout.append_inst(ret, entry);

        optimize(&mut f);
        assert_eq!(crate::verifier::verify(&f), Ok(()));
        assert_eq!(f.dfg.inst_data(mul).opcode(), Opcode::Ishl);
    }
}
