use std::collections::BTreeMap;

use koi_core::{
    Expr, ExprRef, Instruction, MemOperand, Model, Opcode, Operand, Register, VarId,
};
use koi_processor::{Cpu, CpuError};

use crate::solver;

// SCRIPTED CONDITIONS
// ================================================================================================

/// How a scripted conditional branch obtains its predicate at execution time.
#[derive(Clone, Debug)]
pub enum Cond {
    /// A prebuilt expression.
    Expr(ExprRef),
    /// Equality between the byte at `addr` — symbolic if symbolized, else its concrete
    /// value — and `value`.
    MemEq { addr: u64, value: u8 },
}

// SCRIPTED EFFECTS
// ================================================================================================

/// One effect applied when a scripted instruction executes.
#[derive(Clone, Debug)]
pub enum Effect {
    /// `reg <- value`, concretizing the register.
    SetReg(Register, u64),
    /// `dst <- src`.
    CopyReg(Register, Register),
    /// `reg <- reg - value`.
    SubReg(Register, u64),
    /// `dst <- [addr .. addr+len]`, little-endian; a symbolic source taints the register.
    LoadMem { dst: Register, addr: u64, len: u16 },
    /// `[addr .. addr+len] <- src`, little-endian.
    StoreReg { addr: u64, src: Register, len: u16 },
    /// `[addr] <- value`.
    StoreByte { addr: u64, value: u8 },
    /// `rsp -= 8; [rsp] <- return address; rip <- target`.
    Call { target: u64 },
    /// `rip <- [rsp]` (undefined bytes read as 0); `rsp += 8`.
    Ret,
    /// Emits `cond ? jump : fall` as the instruction's expression and resolves `rip` by
    /// evaluating the condition with unresolved variables at 0.
    Branch { cond: Cond, jump: u64, fall: u64 },
    /// `rip <- target`.
    Jump { target: u64 },
}

// SCRIPTED INSTRUCTIONS
// ================================================================================================

/// Decode metadata plus execution effects for one address.
#[derive(Clone, Debug)]
pub struct ScriptedInsn {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub size: usize,
    pub branch: bool,
    pub reads_memory: bool,
    pub effects: Vec<Effect>,
}

impl ScriptedInsn {
    fn plain(opcode: Opcode, size: usize) -> Self {
        Self {
            opcode,
            operands: Vec::new(),
            size,
            branch: false,
            reads_memory: false,
            effects: Vec::new(),
        }
    }

    /// A no-op of the given encoded length.
    pub fn nop(size: usize) -> Self {
        Self::plain(Opcode::Nop, size)
    }

    /// `hlt`.
    pub fn hlt() -> Self {
        Self::plain(Opcode::Hlt, 1)
    }

    /// `ret`.
    pub fn ret() -> Self {
        let mut insn = Self::plain(Opcode::Ret, 1);
        insn.effects.push(Effect::Ret);
        insn
    }

    /// `call target` (5 bytes).
    pub fn call(target: u64) -> Self {
        let mut insn = Self::plain(Opcode::Call, 5);
        insn.operands = vec![Operand::Imm(target)];
        insn.effects.push(Effect::Call { target });
        insn
    }

    /// `jmp target` (2 bytes).
    pub fn jmp(target: u64) -> Self {
        let mut insn = Self::plain(Opcode::Jmp, 2);
        insn.operands = vec![Operand::Imm(target)];
        insn.branch = true;
        insn.effects.push(Effect::Jump { target });
        insn
    }

    /// A conditional jump to `jump`, falling through to `fall` (2 bytes).
    pub fn jcc(cond: Cond, jump: u64, fall: u64) -> Self {
        let mut insn = Self::plain(Opcode::Jcc, 2);
        insn.operands = vec![Operand::Imm(jump)];
        insn.branch = true;
        insn.effects.push(Effect::Branch { cond, jump, fall });
        insn
    }

    /// `sub rsp, imm` (4 bytes).
    pub fn sub_rsp(imm: u64) -> Self {
        let mut insn = Self::plain(Opcode::Sub, 4);
        insn.operands = vec![Operand::Reg(Register::Rsp), Operand::Imm(imm)];
        insn.effects.push(Effect::SubReg(Register::Rsp, imm));
        insn
    }

    /// `mov dst, imm` (5 bytes).
    pub fn mov_reg_imm(dst: Register, imm: u64) -> Self {
        let mut insn = Self::plain(Opcode::Mov, 5);
        insn.operands = vec![Operand::Reg(dst), Operand::Imm(imm)];
        insn.effects.push(Effect::SetReg(dst, imm));
        insn
    }

    /// `mov dst, src` (3 bytes).
    pub fn mov_reg_reg(dst: Register, src: Register) -> Self {
        let mut insn = Self::plain(Opcode::Mov, 3);
        insn.operands = vec![Operand::Reg(dst), Operand::Reg(src)];
        insn.effects.push(Effect::CopyReg(dst, src));
        insn
    }

    /// `mov dst, [mem]` (4 bytes).
    pub fn mov_reg_mem(dst: Register, mem: MemOperand) -> Self {
        let mut insn = Self::plain(Opcode::Mov, 4);
        insn.reads_memory = true;
        insn.effects.push(Effect::LoadMem { dst, addr: mem.address, len: mem.size });
        insn.operands = vec![Operand::Reg(dst), Operand::Mem(mem)];
        insn
    }

    /// `mov [mem], src` (4 bytes).
    pub fn mov_mem_reg(mem: MemOperand, src: Register) -> Self {
        let mut insn = Self::plain(Opcode::Mov, 4);
        insn.effects.push(Effect::StoreReg { addr: mem.address, src, len: mem.size });
        insn.operands = vec![Operand::Mem(mem), Operand::Reg(src)];
        insn
    }

    /// `lea dst, [mem]` (4 bytes).
    pub fn lea(dst: Register, mem: MemOperand) -> Self {
        let mut insn = Self::plain(Opcode::Lea, 4);
        insn.effects.push(Effect::SetReg(dst, mem.address));
        insn.operands = vec![Operand::Reg(dst), Operand::Mem(mem)];
        insn
    }
}

// MOCK CPU
// ================================================================================================

/// A scripted CPU-semantic collaborator.
///
/// Concrete memory is a byte map (absent keys are undefined and read as 0), symbolic state is
/// a parallel expression map, and "decoding" looks the fetch address up in the script table.
/// The solver is [`crate::find_model`].
#[derive(Default)]
pub struct MockCpu {
    regs: BTreeMap<Register, u64>,
    reg_exprs: BTreeMap<Register, ExprRef>,
    mem: BTreeMap<u64, u8>,
    mem_exprs: BTreeMap<u64, ExprRef>,
    vars: Vec<String>,
    program: BTreeMap<u64, ScriptedInsn>,
}

impl MockCpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `insn` at `addr` and backs it with placeholder bytes so the fetch succeeds.
    pub fn script(&mut self, addr: u64, insn: ScriptedInsn) {
        for i in 0..insn.size as u64 {
            self.mem.insert(addr + i, 0x90);
        }
        self.program.insert(addr, insn);
    }

    /// Returns the name a variable was created with.
    pub fn var_name(&self, id: VarId) -> &str {
        &self.vars[id.0]
    }

    /// Returns the number of variables created so far.
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Overrides the symbolic expression behind a register (for solver-aware hook tests).
    pub fn assign_register_expr(&mut self, reg: Register, expr: ExprRef) {
        self.reg_exprs.insert(reg, expr);
    }

    fn fresh_var(&mut self, name: &str, size_bits: u32) -> (VarId, ExprRef) {
        let id = VarId(self.vars.len());
        self.vars.push(name.to_string());
        (id, Expr::var(id, size_bits))
    }

    fn read_wide(&self, addr: u64, len: u16) -> u64 {
        let mut value = 0u64;
        for i in (0..len.min(8) as u64).rev() {
            value = (value << 8) | u64::from(self.read_memory(addr + i));
        }
        value
    }

    fn apply(&mut self, insn: &mut Instruction, effect: &Effect) -> bool {
        match effect {
            Effect::SetReg(reg, value) => {
                self.write_register(*reg, *value);
                false
            },
            Effect::CopyReg(dst, src) => {
                let value = self.read_register(*src);
                self.write_register(*dst, value);
                if let Some(expr) = self.reg_exprs.get(src).cloned() {
                    self.reg_exprs.insert(*dst, expr);
                }
                false
            },
            Effect::SubReg(reg, value) => {
                let current = self.read_register(*reg);
                self.write_register(*reg, current.wrapping_sub(*value));
                false
            },
            Effect::LoadMem { dst, addr, len } => {
                let value = self.read_wide(*addr, *len);
                self.write_register(*dst, value);
                if let Some(expr) = self.mem_exprs.get(addr).cloned() {
                    insn.exprs.push(expr.clone());
                    self.reg_exprs.insert(*dst, expr);
                }
                false
            },
            Effect::StoreReg { addr, src, len } => {
                let value = self.read_register(*src);
                for i in 0..*len as u64 {
                    self.write_memory(addr + i, (value >> (8 * i)) as u8);
                }
                false
            },
            Effect::StoreByte { addr, value } => {
                self.write_memory(*addr, *value);
                false
            },
            Effect::Call { target } => {
                let rsp = self.read_register(Register::Rsp).wrapping_sub(8);
                self.write_register(Register::Rsp, rsp);
                let ret = insn.next_address();
                for i in 0..8 {
                    self.write_memory(rsp + i, (ret >> (8 * i)) as u8);
                }
                self.write_register(Register::Rip, *target);
                true
            },
            Effect::Ret => {
                let rsp = self.read_register(Register::Rsp);
                let ret = self.read_wide(rsp, 8);
                self.write_register(Register::Rsp, rsp.wrapping_add(8));
                self.write_register(Register::Rip, ret);
                true
            },
            Effect::Branch { cond, jump, fall } => {
                let cond = match cond {
                    Cond::Expr(expr) => expr.clone(),
                    Cond::MemEq { addr, value } => {
                        let lhs = self
                            .mem_exprs
                            .get(addr)
                            .cloned()
                            .unwrap_or_else(|| Expr::bv(u64::from(self.read_memory(*addr)), 8));
                        Expr::eq(lhs, Expr::bv(u64::from(*value), 8))
                    },
                };
                insn.exprs.push(Expr::ite(
                    cond.clone(),
                    Expr::bv(*jump, 64),
                    Expr::bv(*fall, 64),
                ));
                // Default resolution: unresolved variables evaluate to 0.
                let taken = cond.evaluate() != 0;
                self.write_register(Register::Rip, if taken { *jump } else { *fall });
                true
            },
            Effect::Jump { target } => {
                self.write_register(Register::Rip, *target);
                true
            },
        }
    }

    fn decode_into(script: &ScriptedInsn, insn: &mut Instruction) {
        insn.opcode = script.opcode;
        insn.operands = script.operands.clone();
        insn.size = script.size;
        insn.branch = script.branch;
        insn.reads_memory = script.reads_memory;
    }
}

impl Cpu for MockCpu {
    fn read_register(&self, reg: Register) -> u64 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn write_register(&mut self, reg: Register, value: u64) {
        self.regs.insert(reg, value);
        self.reg_exprs.remove(&reg);
    }

    fn read_memory(&self, addr: u64) -> u8 {
        self.mem.get(&addr).copied().unwrap_or(0)
    }

    fn read_memory_area(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64).map(|i| self.read_memory(addr + i)).collect()
    }

    fn write_memory(&mut self, addr: u64, value: u8) {
        self.mem.insert(addr, value);
    }

    fn write_memory_area(&mut self, addr: u64, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            self.mem.insert(addr + i as u64, *byte);
        }
    }

    fn is_memory_defined(&self, addr: u64, len: usize) -> bool {
        (0..len as u64).all(|i| self.mem.contains_key(&(addr + i)))
    }

    fn clear_memory(&mut self, addr: u64, len: usize) {
        for i in 0..len as u64 {
            self.mem.remove(&(addr + i));
        }
    }

    fn symbolize_register(&mut self, reg: Register, name: &str) -> VarId {
        let (id, expr) = self.fresh_var(name, reg.bit_size());
        self.reg_exprs.insert(reg, expr);
        id
    }

    fn symbolize_memory(&mut self, addr: u64, size: u16, name: &str) -> VarId {
        let (id, expr) = self.fresh_var(name, u32::from(size) * 8);
        for i in 0..u64::from(size) {
            self.mem_exprs.insert(addr + i, expr.clone());
        }
        id
    }

    fn is_register_symbolized(&self, reg: Register) -> bool {
        self.reg_exprs.contains_key(&reg)
    }

    fn is_memory_symbolized(&self, addr: u64, len: usize) -> bool {
        (0..len as u64).any(|i| self.mem_exprs.contains_key(&(addr + i)))
    }

    fn register_expr(&self, reg: Register) -> Option<ExprRef> {
        self.reg_exprs.get(&reg).cloned()
    }

    fn memory_expr(&self, addr: u64) -> Option<ExprRef> {
        self.mem_exprs.get(&addr).cloned()
    }

    fn assign_memory_expr(&mut self, addr: u64, expr: ExprRef) {
        self.mem_exprs.insert(addr, expr);
    }

    fn process(&mut self, insn: &mut Instruction) -> Result<(), CpuError> {
        let script = self
            .program
            .get(&insn.address())
            .cloned()
            .ok_or(CpuError::InvalidInstruction { addr: insn.address() })?;
        Self::decode_into(&script, insn);
        insn.exprs.clear();

        let mut transferred = false;
        for effect in &script.effects {
            transferred |= self.apply(insn, effect);
        }
        if !transferred {
            let next = insn.next_address();
            self.write_register(Register::Rip, next);
        }
        Ok(())
    }

    fn disassemble(&self, insn: &mut Instruction) -> Result<(), CpuError> {
        let script = self
            .program
            .get(&insn.address())
            .ok_or(CpuError::InvalidInstruction { addr: insn.address() })?;
        Self::decode_into(script, insn);
        Ok(())
    }

    fn get_model(&self, constraint: &ExprRef) -> Model {
        solver::find_model(constraint)
    }

    fn get_models(&self, constraint: &ExprRef, limit: usize) -> Vec<Model> {
        solver::find_models(constraint, limit)
    }
}

// TESTS
// ================================================================================================
