//! The Koi exploration engine.
//!
//! [`Swimmer`] interprets an x86-64 binary with mixed concrete/symbolic state: it steps
//! instructions through a CPU-semantic collaborator (the [`Cpu`] trait), forks at symbolic
//! conditional branches while accumulating path constraints, elides calls into hooked or
//! unknown functions, infers stackframes, tracks heap allocations across their whole
//! lifecycle, and lazily symbolizes memory the first time an undefined address is read.
//!
//! The engine owns all of its state; hooks receive the engine itself and may mutate anything
//! through its public surface. Exploration is single-threaded, synchronous and recursive —
//! a depth-first walk of the symbolic execution tree.

mod cpu;
mod errors;
mod swimmer;

// RE-EXPORTS
// ================================================================================================

pub use cpu::Cpu;
pub use errors::CpuError;
pub use koi_core::{
    Buffer, BufferState, Expr, ExprRef, Instruction, MemOperand, Model, Opcode, Operand,
    Region, Register, Stackframe, VarId, Verbosity, layout,
};
pub use koi_loader::{ElfImage, ElfSection, LoaderError};
pub use swimmer::{FuncHook, InsnHook, Swimmer};
