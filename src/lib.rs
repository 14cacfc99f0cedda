//! A retargetable, SSA-based code generator: a typed IR and verifier, an
//! equality-saturating e-graph optimizer, target-agnostic and per-target
//! legalization, ISLE-style pattern-driven instruction lowering, linear-scan
//! register allocation, and bit-exact machine-code emission.
//!
//! The pipeline runs in one direction, one function at a time:
//!
//! ```text
//! build -> verify -> optimize -> legalize (ops, target) -> lower -> regalloc -> encode
//! ```
//!
//! [`Context`](context::Context) threads a [`Function`](ir::Function) through
//! every stage and returns a relocatable [`Code`](binemit::Code) image. No
//! stage re-enters an earlier one; a failure at any stage aborts the compile
//! with a single, precisely located [`CodegenError`](error::CodegenError).

pub mod binemit;
pub mod context;
pub mod domtree;
pub mod error;
pub mod ir;
pub mod isa;
pub mod legalize;
pub mod machinst;
pub mod opt;
pub mod regalloc;
pub mod verifier;

pub use context::{Context, OptLevel};
pub use error::{CodegenError, CodegenResult};
pub use ir::Function;
