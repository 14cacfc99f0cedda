//! The intermediate representation: types, entities, the data-flow graph,
//! and the layout that orders it into basic blocks.

pub mod condcodes;
pub mod dfg;
pub mod entities;
pub mod function;
pub mod immediates;
pub mod instructions;
pub mod layout;
pub mod memflags;
pub mod types;

pub use condcodes::{CondCode, FloatCC, IntCC};
pub use dfg::{DataFlowGraph, Signature, ValueDef};
pub use entities::{Block, Inst, SigRef, StackSlot, Value};
pub use function::{CallConv, Function, StackSlotData};
pub use immediates::{Ieee64, Imm64, Offset32};
pub use instructions::{BlockCall, InstructionData, Opcode};
pub use layout::Layout;
pub use memflags::MemFlags;
pub use types::{Lane, ScalarKind, StructField, Type, TypeId, TypePool};
pub use types::{F128, F16, F32, F64, I128, I16, I32, I64, I8};
