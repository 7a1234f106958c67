//! Test support for the Koi workspace.
//!
//! Provides [`MockCpu`], a scripted implementation of the engine's CPU-collaborator contract:
//! byte-granular concrete and symbolic memory, a register file, a lookup-table "decoder" fed
//! by [`ScriptedInsn`]s, and a bounded model-finder standing in for the SMT solver. Tests
//! script a handful of instructions, hand the mock to a `Swimmer` and drive real
//! explorations without a disassembler or solver backend.

mod mock;
mod solver;

pub use mock::{Cond, Effect, MockCpu, ScriptedInsn};
pub use solver::{find_model, find_models};
