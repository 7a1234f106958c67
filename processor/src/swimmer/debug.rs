use itertools::Itertools;
use koi_core::{Model, Register};
use tracing::trace;

use super::Swimmer;
use crate::Cpu;

// DIAGNOSTIC DUMPS
// ================================================================================================

impl<C: Cpu> Swimmer<C> {
    /// Emits the post-instruction register dump: symbolic registers are flagged, concrete
    /// ones print their value followed by the chain of defined pointers they lead to.
    pub(super) fn dump_registers(&self) {
        for reg in Register::DUMPED {
            if self.cpu.is_register_symbolized(reg) {
                trace!(register = %reg, "symbolic");
                continue;
            }

            let value = self.cpu.read_register(reg);
            let mut chain = vec![value];
            let mut ptr = value;

            // Follow concrete pointers until the target is undefined, symbolic, or
            // self-referential.
            while !self.cpu.is_memory_symbolized(ptr, 8) && self.cpu.is_memory_defined(ptr, 8) {
                let next = u64::from_le_bytes(
                    self.cpu.read_memory_area(ptr, 8).try_into().unwrap_or([0; 8]),
                );
                if next == ptr {
                    break;
                }
                chain.push(next);
                ptr = next;
            }
            let symbolic_tail = self.cpu.is_memory_symbolized(ptr, 8);

            trace!(
                register = %reg,
                chain = %chain.iter().map(|v| format!("{v:#x}")).join(" -> "),
                symbolic_tail,
                "concrete"
            );
        }
    }

    /// Emits one line per assignment of a satisfying model.
    pub(super) fn dump_model(&self, model: &Model) {
        for (id, value) in model {
            trace!(var = %id, value = format_args!("{value:#x}"), "assignment");
        }
    }
}
