//! Function-hook models ("bait") for common libc functions.
//!
//! Every model matches the engine's [`FuncHook`](koi_processor::FuncHook) signature: it
//! receives the engine and the call site, reads its arguments out of the System V argument
//! registers, and returns the value the engine places in `rax`. Models are deliberately
//! solver-aware — a symbolic argument is resolved to *some* satisfying concrete value rather
//! than rejected — so hooked programs keep making progress on symbolic inputs.
//!
//! Register the models at the PLT addresses of the functions they stand in for:
//!
//! ```text
//! swimmer.hook_function(0x1010c0, koi_bait::koi_malloc);
//! swimmer.hook_function(0x1010d0, koi_bait::koi_free);
//! ```

mod alloc;
mod common;
mod io;
mod string;

// RE-EXPORTS
// ================================================================================================

pub use alloc::{koi_calloc, koi_free, koi_malloc, koi_realloc};
pub use common::{copy_concretes_and_constraints, satisfiable_register_value};
pub use io::koi_fgets;
pub use string::{koi_strchr, koi_strcpy, koi_strlen, koi_strncpy};
