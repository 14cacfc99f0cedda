//! A dominator tree over a [`Function`]'s blocks, computed with Cooper,
//! Harvey and Kennedy's iterative "A Simple, Fast Dominance Algorithm".
//!
//! The verifier (§4.1) needs real dominance, not just layout position, once a
//! function has more than one predecessor edge into a block (loops,
//! diamonds). This module builds a tiny CFG view from each block's
//! terminator and then computes immediate dominators over it.

use rustc_hash::FxHashMap;

use crate::ir::{Function, Block};

/// Successor/predecessor edges derived from terminators, computed once per
/// verify (or lowering pre-pass) and consulted read-only afterward.
#[derive(Default)]
struct ControlFlowGraph {
    preds: FxHashMap<Block, Vec<Block>>,
    succs: FxHashMap<Block, Vec<Block>>,
}

impl ControlFlowGraph {
    fn compute(func: &Function) -> Self {
        let mut cfg = ControlFlowGraph::default();
        for block in func.layout.blocks() {
            cfg.preds.entry(block).or_default();
            cfg.succs.entry(block).or_default();
        }
        for block in func.layout.blocks() {
            if let Some(inst) = func.layout.last_inst(block) {
                for call in func.dfg.inst_data(inst).outgoing_block_calls() {
                    cfg.succs.entry(block).or_default().push(call.block);
                    cfg.preds.entry(call.block).or_default().push(block);
                }
            }
        }
        cfg
    }
}

/// Dominator tree for a single function. Unreachable blocks have no entry.
pub struct DomTree {
    /// Reverse post-order position of each reachable block, 1-based; used
    /// only to order the fixpoint loop, not exposed.
    rpo: FxHashMap<Block, u32>,
    idom: FxHashMap<Block, Block>,
    postorder: Vec<Block>,
}

impl DomTree {
    /// Compute the dominator tree for `func`, rooted at its entry block.
    pub fn compute(func: &Function) -> Self {
        let cfg = ControlFlowGraph::compute(func);
        let mut tree = DomTree { rpo: FxHashMap::default(), idom: FxHashMap::default(), postorder: Vec::new() };
        let Some(entry) = func.entry_block() else {
            return tree;
        };

        // Iterative post-order DFS from the entry block.
        let mut visited = FxHashMap::default();
        let mut stack: Vec<(Block, usize)> = vec![(entry, 0)];
        visited.insert(entry, true);
        while let Some((block, idx)) = stack.pop() {
            let succs = cfg.succs.get(&block).map(Vec::as_slice).unwrap_or(&[]);
            if idx < succs.len() {
                let next = succs[idx];
                stack.push((block, idx + 1));
                if visited.insert(next, true).is_none() {
                    stack.push((next, 0));
                }
            } else {
                tree.postorder.push(block);
            }
        }
        for (i, &b) in tree.postorder.iter().enumerate() {
            tree.rpo.insert(b, (tree.postorder.len() - i) as u32);
        }

        tree.idom.insert(entry, entry);
        let rpo_blocks: Vec<Block> = {
            let mut v = tree.postorder.clone();
            v.reverse();
            v
        };

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &rpo_blocks {
                if block == entry {
                    continue;
                }
                let preds = cfg.preds.get(&block).map(Vec::as_slice).unwrap_or(&[]);
                let mut new_idom = None;
                for &p in preds {
                    if !tree.idom.contains_key(&p) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => tree.intersect(cur, p),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if tree.idom.get(&block) != Some(&new_idom) {
                        tree.idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        tree
    }

    fn intersect(&self, a: Block, b: Block) -> Block {
        let mut a = a;
        let mut b = b;
        while a != b {
            while self.rpo[&a] < self.rpo[&b] {
                a = self.idom[&a];
            }
            while self.rpo[&b] < self.rpo[&a] {
                b = self.idom[&b];
            }
        }
        a
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.idom.contains_key(&block)
    }

    pub fn idom(&self, block: Block) -> Option<Block> {
        self.idom.get(&block).copied()
    }

    /// True iff every control-flow path from the entry to `b` passes through
    /// `a`. A block dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            let next = self.idom[&cur];
            if next == cur {
                return false;
            }
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{dfg::Signature, CallConv, Function, InstructionData, Opcode, I32};
    use smallvec::smallvec;

    fn br(cond: crate::ir::Value, t: Block, f: Block) -> InstructionData {
        InstructionData::Branch {
            cond,
            then_dest: crate::ir::BlockCall::new(t, []),
            else_dest: crate::ir::BlockCall::new(f, []),
        }
    }

    #[test]
    fn diamond_join_dominated_by_entry() {
        let sig = Signature::new(CallConv::SystemV, vec![I32], vec![]);
        let mut f = Function::new("diamond", sig);
        let entry = f.create_block();
        let left = f.create_block();
        let right = f.create_block();
        let join = f.create_block();
        f.layout.append_block(entry);
        f.layout.append_block(left);
        f.layout.append_block(right);
        f.layout.append_block(join);

        let p = f.dfg.append_block_param(entry, I32);
        let i = f.dfg.make_inst(br(p, left, right), &[]);
        f.layout.append_inst(i, entry);
        let jl = f.dfg.make_inst(InstructionData::Jump { dest: crate::ir::BlockCall::new(join, []) }, &[]);
        f.layout.append_inst(jl, left);
        let jr = f.dfg.make_inst(InstructionData::Jump { dest: crate::ir::BlockCall::new(join, []) }, &[]);
        f.layout.append_inst(jr, right);
        let ret = f.dfg.make_inst(InstructionData::Return { args: smallvec![] }, &[]);
        f.layout.append_inst(ret, join);
        let _ = Opcode::Iadd;

        let dt = DomTree::compute(&f);
        assert!(dt.dominates(entry, join));
        assert!(!dt.dominates(left, join));
        assert!(!dt.dominates(right, join));
        assert!(dt.dominates(entry, left));
    }
}
