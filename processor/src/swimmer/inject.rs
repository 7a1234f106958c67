use koi_core::{Expr, ExprRef, Instruction, Opcode, Operand, instruction::MAX_INSN_SIZE};

use super::Swimmer;
use crate::Cpu;

// INJECTION
// ================================================================================================

impl<C: Cpu> Swimmer<C> {
    /// Records `insn` to execute in lieu of the on-disk instruction at `addr`.
    pub fn inject_instruction(&mut self, addr: u64, insn: Instruction) {
        self.injected.insert(addr, insn);
    }

    /// Replaces the condition of the conditional jump at `addr` with `guard`.
    ///
    /// The on-disk instruction is disassembled and must be a conditional branch; its
    /// destinations are reused, the predicate is swapped: the injected instruction carries
    /// `guard ? jump-target : fallthrough` as its sole expression, so exploration forks on
    /// `guard` instead of the original flags. Returns false — leaving the engine unchanged —
    /// when the bytes at `addr` are undefined, do not decode, or decode to anything other
    /// than a conditional jump.
    pub fn inject_jump_condition(&mut self, addr: u64, guard: ExprRef) -> bool {
        if !self.cpu.is_memory_defined(addr, 1) {
            return false;
        }
        let bytes = self.cpu.read_memory_area(addr, MAX_INSN_SIZE);

        let mut jump = Instruction::new(addr, &bytes);
        if self.cpu.disassemble(&mut jump).is_err() {
            return false;
        }
        if !jump.is_branch() || jump.opcode == Opcode::Jmp {
            return false;
        }

        let fall_dst = jump.next_address();
        let Some(jump_dst) = jump.operands.first().and_then(Operand::immediate) else {
            return false;
        };

        let ite = Expr::ite(guard, Expr::bv(jump_dst, 64), Expr::bv(fall_dst, 64));
        jump.exprs = vec![ite];
        self.inject_instruction(addr, jump);
        true
    }
}
