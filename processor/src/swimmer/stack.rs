use koi_core::{Instruction, Opcode, Operand, Register, Stackframe, Verbosity, layout};
use tracing::debug;

use super::Swimmer;
use crate::Cpu;

// STACKFRAME INFERENCE
// ================================================================================================

/// Frame sizes at or above this are treated as misdecoded immediates, not allocations.
const MAX_FRAME_SIZE: u64 = 1 << 56;

impl<C: Cpu> Swimmer<C> {
    /// Recognizes `SUB rsp, imm` as the allocation of the current stackframe.
    ///
    /// The top frame is re-based at the current `rbp` with `imm` bytes, and every byte of the
    /// frame is symbolized (named after the allocating instruction and the base) with its
    /// concrete value cleared: locals start as unknowns.
    ///
    /// Returns true iff a frame was allocated.
    pub(super) fn handle_stack_allocation(&mut self, insn: &Instruction) -> bool {
        if insn.opcode != Opcode::Sub
            || !insn.operands.first().is_some_and(|op| op.is_register(Register::Rsp))
        {
            return false;
        }
        let Some(size) = insn.operands.get(1).and_then(Operand::immediate) else {
            return false;
        };
        if size >= MAX_FRAME_SIZE {
            return false;
        }

        let base = self.cpu.read_register(Register::Rbp);
        if let Some(frame) = self.stackframes.last_mut() {
            frame.update(base, size);
        }

        for i in 0..size {
            let addr = base.wrapping_sub(i);
            let name = format!("stackframe@0x{:x}_0x{:x}[-0x{:x}]", insn.address(), base, i);
            self.cpu.symbolize_memory(addr, 1, &name);
            self.cpu.clear_memory(addr, 1);
        }

        if self.verbosity.contains(Verbosity::STACK) {
            debug!(base = format_args!("{base:#x}"), size = format_args!("{size:#x}"), "identified stackframe");
        }
        true
    }

    /// Records accesses displaced from `rbp` into the top frame's access set.
    ///
    /// Returns true iff the instruction referenced the frame.
    pub(super) fn handle_stack_reference(&mut self, insn: &Instruction) -> bool {
        if insn.operands.len() != 2 {
            return false;
        }
        let mut referenced = false;
        for op in &insn.operands {
            if let Operand::Mem(mem) = op
                && mem.base == Some(Register::Rbp)
            {
                let offs = (mem.displacement as u64).wrapping_neg();
                let new = self
                    .stackframes
                    .last_mut()
                    .is_some_and(|frame| frame.add_access(offs));
                referenced = true;
                if new && self.verbosity.contains(Verbosity::STACK) {
                    debug!(offs = format_args!("{offs:#x}"), "new stackframe access");
                }
            }
        }
        referenced
    }

    // STACK QUERIES
    // --------------------------------------------------------------------------------------------

    /// Returns the current (top) stackframe, if any.
    pub fn stackframe(&self) -> Option<&Stackframe> {
        self.stackframes.last()
    }

    /// Returns the first stackframe containing `ptr`, if any.
    pub fn stackframe_containing(&self, ptr: u64) -> Option<&Stackframe> {
        self.stackframes.iter().find(|frame| frame.contains(ptr))
    }

    /// Returns the deduced length of the stack buffer starting at `ptr`.
    ///
    /// A best guess: the distance from `ptr` to the next recorded access of its containing
    /// frame. Returns 0 when no frame contains `ptr` or the frame has no access past it.
    pub fn get_stack_buffer_length(&self, ptr: u64) -> u64 {
        for frame in &self.stackframes {
            if frame.contains(ptr) {
                return frame.access_gap(frame.addr() - ptr);
            }
        }
        0
    }

    /// Returns true if `ptr` falls within the stack window; always false when no stackframe
    /// exists.
    pub fn is_stack_address(&self, ptr: u64) -> bool {
        if self.stackframes.is_empty() {
            return false;
        }
        layout::is_stack_address(ptr)
    }
}
