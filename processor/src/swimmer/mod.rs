use std::{collections::BTreeMap, path::Path};

use koi_core::{
    Buffer, Expr, ExprRef, Instruction, Model, Opcode, Register, Stackframe, VarId, Verbosity,
    instruction::MAX_INSN_SIZE, layout,
};
use koi_loader::ElfImage;
use tracing::{debug, error};

use crate::Cpu;

mod debug;
mod heap;
mod inject;
mod stack;


// HOOK TYPES
// ================================================================================================

/// Hook invoked after the instruction at its address has been processed.
///
/// The loop keeps running afterwards; the hook may mutate any engine state through the
/// engine's public surface.
pub type InsnHook<C> = fn(&mut Swimmer<C>, &Instruction);

/// Hook invoked in place of a call target.
///
/// Receives the call-site address; the return value is placed in `rax`. When several hooks
/// are registered at the same target they run in registration order and the last return
/// value wins.
pub type FuncHook<C> = fn(&mut Swimmer<C>, u64) -> u64;

// SWIMMER
// ================================================================================================

/// The exploration and state engine.
///
/// A `Swimmer` wraps a CPU-semantic collaborator and explores the loaded binary from the
/// current instruction pointer, forking at satisfiable symbolic branches. It owns the path
/// constraints, the heap table, the inferred stackframe stack, the hook and injection tables
/// and the termination budgets. All errors of the engine's own operations are in-band
/// sentinels (`0`, `false`, `"UNDEFINED"`, empty model); no operation poisons the instance
/// and successive [`Self::explore`] calls resume from the current state.
///
/// Across a branch fork only the constraint stack and `rbp` are saved and restored; all other
/// register and memory state mutated while exploring the jump side is still visible on the
/// fallthrough side. This mirrors the reference behavior and is a known limitation.
pub struct Swimmer<C: Cpu> {
    cpu: C,
    /// Path constraints accumulated along the current path, in push order.
    pub constraints: Vec<ExprRef>,
    /// Diagnostic categories to emit while exploring.
    pub verbosity: Verbosity,
    pub(crate) heap: BTreeMap<u64, Buffer>,
    pub(crate) stackframes: Vec<Stackframe>,
    func_hooks: BTreeMap<u64, Vec<FuncHook<C>>>,
    insn_hooks: BTreeMap<u64, Vec<InsnHook<C>>>,
    pub(crate) injected: BTreeMap<u64, Instruction>,
    dead_ends: Vec<u64>,
    visits: BTreeMap<u64, u32>,
    depth: u32,
    fid: u32,
}

impl<C: Cpu> Swimmer<C> {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Returns an engine over `cpu` with the binary at `path` placed into concrete memory.
    ///
    /// A loader failure is reported to the log and leaves the engine with an empty memory
    /// image; the instance is still fully usable.
    pub fn new(cpu: C, path: impl AsRef<Path>) -> Self {
        let mut swimmer = Self::bare(cpu);
        match ElfImage::load(path.as_ref()) {
            Ok(image) => swimmer.place_image(&image),
            Err(err) => error!(path = %path.as_ref().display(), %err, "failed to load binary"),
        }
        swimmer
    }

    /// Returns an engine over `cpu` with an already-parsed image placed into concrete memory.
    pub fn with_image(cpu: C, image: &ElfImage) -> Self {
        let mut swimmer = Self::bare(cpu);
        swimmer.place_image(image);
        swimmer
    }

    fn bare(mut cpu: C) -> Self {
        // Assumed starting values: no return address, stack at its ceiling.
        cpu.write_register(Register::Rip, 0);
        cpu.write_register(Register::Rbp, layout::STACK_START);
        cpu.write_register(Register::Rsp, layout::STACK_START);

        // Anything value-sensitive computed from an unwritten register must see an unknown,
        // so every general-purpose register, common flag and XMM register starts symbolic.
        for reg in Register::GENERAL.into_iter().chain(Register::FLAGS).chain(Register::XMM) {
            cpu.symbolize_register(reg, &format!("symbolic_{reg}"));
        }

        Self {
            cpu,
            constraints: Vec::new(),
            verbosity: Verbosity::empty(),
            heap: BTreeMap::new(),
            stackframes: vec![Stackframe::new(layout::STACK_START, 0)],
            func_hooks: BTreeMap::new(),
            insn_hooks: BTreeMap::new(),
            injected: BTreeMap::new(),
            dead_ends: Vec::new(),
            visits: BTreeMap::new(),
            depth: 0,
            fid: 0,
        }
    }

    fn place_image(&mut self, image: &ElfImage) {
        for section in &image.sections {
            // .plt.sec stubs resolve lazily at runtime; loading them would send calls into
            // trampolines instead of unknown memory.
            if section.name != ".plt.sec" {
                self.cpu.write_memory_area(section.base + layout::IMAGE_OFFSET, &section.data);
            }
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns a reference to the CPU-semantic collaborator.
    pub fn cpu(&self) -> &C {
        &self.cpu
    }

    /// Returns a mutable reference to the CPU-semantic collaborator.
    pub fn cpu_mut(&mut self) -> &mut C {
        &mut self.cpu
    }

    /// Returns the current instruction pointer.
    pub fn pc(&self) -> u64 {
        self.cpu.read_register(Register::Rip)
    }

    /// Sets the instruction pointer.
    pub fn set_pc(&mut self, x: u64) {
        self.cpu.write_register(Register::Rip, x);
    }

    /// Returns the concrete value of `reg`.
    pub fn read_register(&self, reg: Register) -> u64 {
        self.cpu.read_register(reg)
    }

    /// Assigns a concrete value to `reg`.
    pub fn write_register(&mut self, reg: Register, value: u64) {
        self.cpu.write_register(reg, value);
    }

    /// Returns the concrete byte at `addr`; undefined bytes read as 0.
    pub fn read_memory(&self, addr: u64) -> u8 {
        self.cpu.read_memory(addr)
    }

    /// Writes one concrete byte at `addr`.
    pub fn write_memory(&mut self, addr: u64, value: u8) {
        self.cpu.write_memory(addr, value);
    }

    /// Returns true if every byte in `[addr, addr + len)` holds a defined concrete value.
    pub fn is_memory_defined(&self, addr: u64, len: usize) -> bool {
        self.cpu.is_memory_defined(addr, len)
    }

    /// Returns true if any byte in `[addr, addr + len)` is backed by a symbolic expression.
    pub fn is_memory_symbolized(&self, addr: u64, len: usize) -> bool {
        self.cpu.is_memory_symbolized(addr, len)
    }

    /// Returns true if `reg` currently holds a symbolic value.
    pub fn is_register_symbolized(&self, reg: Register) -> bool {
        self.cpu.is_register_symbolized(reg)
    }

    /// Returns the symbolic expression behind `reg`, if any.
    pub fn register_expr(&self, reg: Register) -> Option<ExprRef> {
        self.cpu.register_expr(reg)
    }

    /// Returns the symbolic expression behind the byte at `addr`, if any.
    pub fn memory_expr(&self, addr: u64) -> Option<ExprRef> {
        self.cpu.memory_expr(addr)
    }

    /// Overwrites the symbolic expression behind the byte at `addr`.
    pub fn assign_memory_expr(&mut self, addr: u64, expr: ExprRef) {
        self.cpu.assign_memory_expr(addr, expr);
    }

    /// Returns one satisfying assignment for `constraint` from the collaborator's solver.
    pub fn get_model(&self, constraint: &ExprRef) -> Model {
        self.cpu.get_model(constraint)
    }

    // HOOK REGISTRATION
    // --------------------------------------------------------------------------------------------

    /// Registers a hook to run after every processing of the instruction at `addr`.
    pub fn hook_instruction(&mut self, addr: u64, callback: InsnHook<C>) {
        self.insn_hooks.entry(addr).or_default().push(callback);
    }

    /// Registers a hook to run in place of calls into `addr`.
    pub fn hook_function(&mut self, addr: u64, callback: FuncHook<C>) {
        self.func_hooks.entry(addr).or_default().push(callback);
    }

    /// Marks `addr` as a dead end: reaching it stops the exploration with failure.
    pub fn kill_address(&mut self, addr: u64) {
        self.dead_ends.push(addr);
    }

    // EXPLORATION
    // --------------------------------------------------------------------------------------------

    /// Explores from the current instruction pointer until a stopping rule fires.
    ///
    /// `target` is the address whose execution counts as success (0 explores everything),
    /// `max_visits` caps per-address executions (0 is unlimited) and `max_depth` caps the
    /// fork recursion (0 is unlimited). Returns true iff some descent executed `target`.
    ///
    /// Per-iteration effect order is part of the contract: execute, instruction hooks,
    /// target/dead-end check, stack bookkeeping, terminate checks, call elision, memory-read
    /// symbolization, branch fork.
    pub fn explore(&mut self, target: u64, max_visits: u32, max_depth: u32) -> bool {
        let local_fid = self.fid;
        self.depth += 1;
        self.fid += 1;

        loop {
            let pc = self.cpu.read_register(Register::Rip);

            // Budget check before anything else so loops cannot starve the explorer.
            if max_visits > 0 {
                let count = self.visits.entry(pc).or_insert(0);
                *count += 1;
                if *count > max_visits {
                    if self.verbosity.contains(Verbosity::STOPS) {
                        debug!(fid = local_fid, pc = format_args!("{pc:#x}"), "exhausted");
                    }
                    break;
                }
            }

            // Fetch. Running off the loaded image is a stop, not an error.
            if !self.cpu.is_memory_defined(pc, 1) {
                if self.verbosity.contains(Verbosity::STOPS) {
                    debug!(fid = local_fid, pc = format_args!("{pc:#x}"), "undefined");
                }
                break;
            }
            let bytes = self.cpu.read_memory_area(pc, MAX_INSN_SIZE);

            // An injected instruction substitutes for the on-disk bytes at this address.
            let stored = self.injected.get(&pc).cloned();
            let mut insn = match &stored {
                Some(injected) => injected.clone(),
                None => Instruction::new(pc, &bytes),
            };

            if self.cpu.process(&mut insn).is_err() {
                if self.verbosity.contains(Verbosity::STOPS) {
                    debug!(fid = local_fid, pc = format_args!("{pc:#x}"), "undecodable");
                }
                break;
            }
            if self.verbosity.contains(Verbosity::INSN) {
                debug!(fid = local_fid, depth = self.depth, insn = %insn, "step");
            }
            if self.verbosity.contains(Verbosity::REGS) {
                self.dump_registers();
            }

            // Processing recomputed the expressions from the on-disk semantics; put the
            // injected ones back so downstream inspection sees the substituted meaning.
            if let Some(injected) = &stored {
                insn.exprs = injected.exprs.clone();
                self.cpu.disassemble(&mut insn).ok();
            }

            if let Some(hooks) = self.insn_hooks.get(&pc).cloned() {
                for hook in hooks {
                    hook(self, &insn);
                }
            }

            if target != 0 && pc == target {
                if self.verbosity.contains(Verbosity::STOPS) {
                    debug!(fid = local_fid, pc = format_args!("{pc:#x}"), "target reached");
                }
                return true;
            }
            if self.dead_ends.contains(&pc) {
                if self.verbosity.contains(Verbosity::STOPS) {
                    debug!(fid = local_fid, pc = format_args!("{pc:#x}"), "dead end reached");
                }
                return false;
            }

            // Stackframe bookkeeping never disqualifies the other handlers.
            self.handle_stack_allocation(&insn);
            self.handle_stack_reference(&insn);

            if insn.opcode == Opcode::Hlt {
                break;
            } else if insn.opcode == Opcode::Ret {
                if self.cpu.read_register(Register::Rip) == 0 {
                    if self.verbosity.contains(Verbosity::STOPS) {
                        debug!(fid = local_fid, "end of path reached");
                    }
                    break;
                } else if self.verbosity.contains(Verbosity::STACK) {
                    self.stackframes.pop();
                    debug!("end of stackframe");
                }
            } else if self.handle_call(local_fid, pc, &insn) {
                continue;
            } else if self.handle_memory_read(pc, &mut insn) {
                continue;
            } else if insn.is_branch()
                && insn.is_symbolized()
                && insn.opcode != Opcode::Jmp
                && self.fork_at_branch(pc, &insn, target, max_visits, max_depth)
            {
                return true;
            }
        }

        self.depth -= 1;
        false
    }

    /// Forks at a symbolic conditional branch.
    ///
    /// Returns true iff the recursive descent down the jump side executed the target; every
    /// other outcome lets the caller's loop continue (into the fallthrough when both sides
    /// were satisfiable, or wherever the collaborator's default resolution pointed `rip`
    /// otherwise).
    fn fork_at_branch(
        &mut self,
        pc: u64,
        insn: &Instruction,
        target: u64,
        max_visits: u32,
        max_depth: u32,
    ) -> bool {
        let Some((cond, then_value, else_value)) = branch_ite(insn) else {
            return false;
        };

        // Check each side in isolation before committing to a fork.
        self.constraints.push(cond.clone());
        let cnstr_if = conjoin(&self.constraints);
        let model_if = self.cpu.get_model(&cnstr_if);
        self.constraints.pop();

        self.constraints.push(Expr::lnot(cond));
        let cnstr_else = conjoin(&self.constraints);
        let model_else = self.cpu.get_model(&cnstr_else);
        self.constraints.pop();

        // One side unsatisfiable: the collaborator's default resolution already picked the
        // other, nothing to fork.
        if model_if.is_empty() || model_else.is_empty() {
            return false;
        }

        if max_depth > 0 && self.depth >= max_depth {
            if self.verbosity.contains(Verbosity::STOPS) {
                debug!(pc = format_args!("{pc:#x}"), "too deep to fork");
            }
            return false;
        }

        // Jump side first.
        self.cpu.write_register(Register::Rip, then_value.evaluate());
        self.constraints.push(cnstr_if);
        if self.verbosity.contains(Verbosity::BRANCH) {
            debug!(pc = format_args!("{pc:#x}"), "jump");
        }
        if self.verbosity.contains(Verbosity::MODEL) {
            self.dump_model(&model_if);
        }

        let rbp_before = self.cpu.read_register(Register::Rbp);
        if self.explore(target, max_visits, max_depth) {
            return true;
        }
        self.constraints.pop();
        self.cpu.write_register(Register::Rbp, rbp_before);

        // Then the fallthrough, continued by the caller's loop.
        if self.verbosity.contains(Verbosity::BRANCH) {
            debug!(pc = format_args!("{pc:#x}"), "fall");
        }
        if self.verbosity.contains(Verbosity::MODEL) {
            self.dump_model(&model_else);
        }
        self.cpu.write_register(Register::Rip, else_value.evaluate());
        self.constraints.push(cnstr_else);
        false
    }

    /// Handles a just-executed `CALL`: elides it when the destination is hooked or undefined,
    /// otherwise opens a stackframe for it.
    ///
    /// Returns true iff the call was elided (the caller's loop should refetch).
    fn handle_call(&mut self, local_fid: u32, pc: u64, insn: &Instruction) -> bool {
        if insn.opcode != Opcode::Call {
            return false;
        }
        let dst = self.cpu.read_register(Register::Rip);
        let hooked = self.func_hooks.contains_key(&dst);
        let undefined = !self.cpu.is_memory_defined(dst, 1);

        if hooked || undefined {
            if hooked {
                if self.verbosity.contains(Verbosity::INSN) {
                    debug!(fid = local_fid, depth = self.depth, dst = format_args!("{dst:#x}"), "func hook");
                }
                let hooks = self.func_hooks.get(&dst).cloned().unwrap_or_default();
                for hook in hooks {
                    let ret = hook(self, pc);
                    self.cpu.write_register(Register::Rax, ret);
                }
            } else if self.verbosity.contains(Verbosity::INSN) {
                debug!(fid = local_fid, depth = self.depth, dst = format_args!("{dst:#x}"), "step over");
            }
            // Undo the pushed return address and skip over the call.
            let rsp = self.cpu.read_register(Register::Rsp);
            self.cpu.write_register(Register::Rsp, rsp.wrapping_add(8));
            self.cpu.write_register(Register::Rip, insn.next_address());
        } else {
            self.stackframes.push(Stackframe::default());
        }
        hooked || undefined
    }

    /// Symbolizes memory on the first read of an address that is neither defined nor already
    /// symbolic, then re-processes the instruction so its effect sees the unknown.
    ///
    /// Returns true iff memory was freshly symbolized (the caller's loop should refetch).
    fn handle_memory_read(&mut self, pc: u64, insn: &mut Instruction) -> bool {
        if insn.is_memory_read()
            && insn.operands.len() == 2
            && let Some(mem) = insn.operands[1].memory()
        {
            let mem = mem.clone();
            let other_segment = mem.segment.is_some();
            let defined = self.cpu.is_memory_defined(mem.address, 1);
            let symbolized = self.cpu.is_memory_symbolized(mem.address, mem.size as usize);

            if !defined && !symbolized && !other_segment {
                self.cpu.symbolize_memory(mem.address, mem.size, &format!("stackMem<--0x{pc:x}"));
                self.cpu.process(insn).ok();
                return true;
            }
            false
        } else if insn.opcode == Opcode::Lea
            && insn.operands.len() == 2
            && let Some(mem) = insn.operands[1].memory()
        {
            // Loading an address displaced from the base pointer counts as touching the
            // location; displacements from the stack pointer are left alone.
            let mem = mem.clone();
            let from_rbp = mem.base == Some(Register::Rbp);
            let defined = self.cpu.is_memory_defined(mem.address, mem.size as usize);
            let symbolized = self.cpu.is_memory_symbolized(mem.address, mem.size as usize);

            if from_rbp && !defined && !symbolized {
                self.cpu.symbolize_memory(mem.address, mem.size, &format!("stackMem<--0x{pc:x}"));
                self.cpu.process(insn).ok();
            }
            from_rbp && !defined && !symbolized
        } else {
            false
        }
    }

    // MODEL EXTRACTION
    // --------------------------------------------------------------------------------------------

    /// Returns one satisfying assignment for the conjunction of the current path constraints,
    /// or an empty model when the path is unsatisfiable or unconstrained.
    pub fn get_sat_model(&self) -> Model {
        if self.constraints.len() > 1 {
            self.cpu.get_model(&Expr::land(self.constraints.clone()))
        } else if let Some(single) = self.constraints.first() {
            self.cpu.get_model(single)
        } else {
            Model::new()
        }
    }

    /// Returns up to `limit` satisfying assignments for the current path constraints.
    pub fn get_sat_models(&self, limit: usize) -> Vec<Model> {
        if self.constraints.len() > 1 {
            self.cpu.get_models(&Expr::land(self.constraints.clone()), limit)
        } else if let Some(single) = self.constraints.first() {
            self.cpu.get_models(single, limit)
        } else {
            Vec::new()
        }
    }

    /// Reads concrete bytes starting at `ptr` until a NUL or an undefined byte.
    pub fn read_string(&self, ptr: u64) -> String {
        let mut out = Vec::new();
        let mut ptr = ptr;
        let mut byte = self.cpu.read_memory(ptr);
        while byte != 0 {
            if !self.cpu.is_memory_defined(ptr, 1) {
                break;
            }
            out.push(byte);
            ptr += 1;
            byte = self.cpu.read_memory(ptr);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    // SYMBOLIZATION
    // --------------------------------------------------------------------------------------------

    /// Symbolizes `len` bytes at `ptr` with per-byte variables named after the identifier and
    /// the call site, clearing their concrete values.
    ///
    /// The returned [`Buffer`] is *not* registered in the heap table; heap registration is
    /// [`Self::allocate_heap_memory`]'s job.
    pub fn symbolize_named_memory(&mut self, id: &str, ptr: u64, sink: u64, len: u64) -> Buffer {
        let mut buffer = Buffer::new(id, sink, ptr, len);
        for i in 0..len {
            let name = format!("{}[0x{:x}]", buffer.alias, i);
            buffer.vars.push(self.cpu.symbolize_memory(ptr + i, 1, &name));
            self.cpu.clear_memory(ptr + i, 1);
        }
        buffer
    }

    /// Symbolizes `size` bytes at `ptr` with a single variable named after the identifier and
    /// the call site. Returns `None` for a zero-sized chunk.
    pub fn symbolize_named_memory_chunk(
        &mut self,
        id: &str,
        ptr: u64,
        sink: u64,
        size: u16,
    ) -> Option<VarId> {
        if size == 0 {
            return None;
        }
        Some(self.cpu.symbolize_memory(ptr, size, &format!("{id}<--0x{sink:x}")))
    }
}

// HELPERS
// ================================================================================================

/// Conjoins a non-empty constraint list into a single node.
fn conjoin(constraints: &[ExprRef]) -> ExprRef {
    if constraints.len() > 1 {
        Expr::land(constraints.to_vec())
    } else {
        constraints[0].clone()
    }
}

/// Extracts the branch predicate of a processed conditional: the first ITE expression whose
/// condition is symbolic and whose two outcomes are concrete addresses.
fn branch_ite(insn: &Instruction) -> Option<(ExprRef, ExprRef, ExprRef)> {
    for expr in &insn.exprs {
        if let Expr::Ite(cond, then_value, else_value) = expr.as_ref()
            && cond.is_symbolized()
            && !then_value.is_symbolized()
            && !else_value.is_symbolized()
        {
            return Some((cond.clone(), then_value.clone(), else_value.clone()));
        }
    }
    None
}
