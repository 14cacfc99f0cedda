//! Per-opcode extraction costs (§4.2's extraction: "select one e-node per
//! reachable class by a cost function... with constants cheapest").
//!
//! Grounded on the teacher's `egraph/cost.rs`: a saturating `Cost` newtype
//! with an `infinity()` sentinel for classes with no yet-costed node.

use rustc_hash::FxHashMap;

use super::{EClassId, ENode};
use crate::ir::Opcode;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Cost(u32);

impl Cost {
    pub fn zero() -> Cost {
        Cost(0)
    }

    pub fn infinity() -> Cost {
        Cost(u32::MAX)
    }

    fn finite(self) -> Cost {
        Cost(self.0.min(u32::MAX - 1))
    }
}

impl core::ops::Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0.saturating_add(rhs.0)).finite()
    }
}

/// The base cost of computing this opcode once its operands are already in
/// registers. Constants are free to materialize as an immediate; everything
/// else costs at least one instruction, with a handful of known-expensive
/// ops (integer division, calls) weighted higher so the extractor prefers a
/// strength-reduced form when one is available in the same e-class.
fn opcode_cost(opcode: Opcode) -> Cost {
    Cost(match opcode {
        Opcode::Iconst | Opcode::Fconst => 0,
        Opcode::Udiv | Opcode::Sdiv | Opcode::Urem | Opcode::Srem => 12,
        Opcode::Call => 20,
        _ => 1,
    })
}

/// The cost of `node`, given the already-known best costs of its children.
/// `None` if any child's class has not been costed yet (the caller should
/// retry after another fixpoint pass, since a later iteration may discover
/// a usable node for that class).
pub fn node_cost(node: &ENode, best: &FxHashMap<EClassId, (Cost, ENode)>) -> Option<Cost> {
    let mut total = opcode_cost(node.opcode);
    for &child in &node.children {
        let (child_cost, _) = best.get(&child)?;
        total = total + *child_cost;
    }
    Some(total)
}
