//! Core components shared across the Koi workspace.
//!
//! This crate defines the vocabulary the exploration engine and the
//! CPU-semantic collaborator exchange: address regions and their two
//! refinements (heap [`Buffer`]s and [`Stackframe`]s), the symbolic
//! expression AST, the decoded [`Instruction`] carrier, register
//! identifiers, the fixed address-space layout, and the diagnostic
//! [`Verbosity`] bitmask.

mod buffer;
mod region;
mod stackframe;

pub mod expr;
pub mod instruction;
pub mod layout;
pub mod registers;
pub mod verbosity;

// RE-EXPORTS
// ================================================================================================

pub use buffer::{Buffer, BufferState};
pub use expr::{Expr, ExprRef, Model, VarId};
pub use instruction::{Instruction, MemOperand, Opcode, Operand};
pub use region::Region;
pub use registers::Register;
pub use stackframe::Stackframe;
pub use verbosity::Verbosity;
