//! The decoded-instruction carrier exchanged with the CPU-semantic collaborator.
//!
//! An [`Instruction`] starts as an address plus raw bytes. The collaborator's `process` fills
//! in the decode fields and the symbolic expressions produced by execution; `disassemble`
//! fills in the decode fields only. The engine never interprets bytes itself.

use std::fmt;

use smallvec::SmallVec;

use crate::{expr::ExprRef, registers::Register};

// CONSTANTS
// ================================================================================================

/// Maximum encoded length of an x86-64 instruction; also the fetch window size.
pub const MAX_INSN_SIZE: usize = 16;

// OPCODE
// ================================================================================================

/// Opcode classes.
///
/// The engine dispatches on `Hlt`, `Ret`, `Call`, `Jmp`, `Sub` and `Lea`; everything else is
/// carried through for hooks and diagnostics. `Jcc` covers every conditional jump — which
/// condition it is lives in the instruction's semantics, not its opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Opcode {
    Hlt,
    Ret,
    Call,
    Jmp,
    Jcc,
    Sub,
    Lea,
    Mov,
    Cmp,
    Push,
    Pop,
    Nop,
    Other(u32),
}

// OPERANDS
// ================================================================================================

/// A memory operand with its effective address resolved at decode time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemOperand {
    /// Effective address of the access.
    pub address: u64,
    /// Access width in bytes.
    pub size: u16,
    /// Base register of the addressing expression, if any.
    pub base: Option<Register>,
    /// Signed displacement of the addressing expression.
    pub displacement: i64,
    /// Segment register override, if any.
    pub segment: Option<Register>,
}

/// One instruction operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Register),
    Imm(u64),
    Mem(MemOperand),
}

impl Operand {
    /// Returns the immediate value, if this operand is one.
    pub fn immediate(&self) -> Option<u64> {
        match self {
            Self::Imm(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the memory operand, if this operand is one.
    pub fn memory(&self) -> Option<&MemOperand> {
        match self {
            Self::Mem(mem) => Some(mem),
            _ => None,
        }
    }

    /// Returns true if this operand is exactly register `reg`.
    pub fn is_register(&self, reg: Register) -> bool {
        matches!(self, Self::Reg(r) if *r == reg)
    }
}

// INSTRUCTION
// ================================================================================================

/// A single instruction: raw bytes plus the decode and execution products the collaborator
/// filled in.
#[derive(Clone, Debug)]
pub struct Instruction {
    address: u64,
    bytes: SmallVec<[u8; MAX_INSN_SIZE]>,
    /// Opcode class; meaningful after decode.
    pub opcode: Opcode,
    /// Operand list; meaningful after decode.
    pub operands: Vec<Operand>,
    /// Encoded length in bytes; meaningful after decode.
    pub size: usize,
    /// True if the instruction is a (conditional or unconditional) jump.
    pub branch: bool,
    /// True if execution reads memory.
    pub reads_memory: bool,
    /// Symbolic expressions produced by executing the instruction.
    pub exprs: Vec<ExprRef>,
}

impl Instruction {
    /// Returns an undecoded instruction from raw bytes fetched at `address`.
    pub fn new(address: u64, bytes: &[u8]) -> Self {
        Self {
            address,
            bytes: SmallVec::from_slice(&bytes[..bytes.len().min(MAX_INSN_SIZE)]),
            opcode: Opcode::Other(0),
            operands: Vec::new(),
            size: 0,
            branch: false,
            reads_memory: false,
            exprs: Vec::new(),
        }
    }

    /// Returns the address the instruction was fetched from.
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the raw bytes backing the instruction.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the address of the next sequential instruction.
    pub fn next_address(&self) -> u64 {
        self.address + self.size as u64
    }

    /// Returns true if the instruction is a jump of any kind.
    pub fn is_branch(&self) -> bool {
        self.branch
    }

    /// Returns true if execution reads memory.
    pub fn is_memory_read(&self) -> bool {
        self.reads_memory
    }

    /// Returns true if any expression produced by the instruction is symbolic.
    pub fn is_symbolized(&self) -> bool {
        self.exprs.iter().any(|e| e.is_symbolized())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}: {:?}", self.address, self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            match op {
                Operand::Reg(reg) => write!(f, "{sep}{reg}")?,
                Operand::Imm(value) => write!(f, "{sep}{value:#x}")?,
                Operand::Mem(mem) => write!(f, "{sep}[{:#x}]", mem.address)?,
            }
        }
        Ok(())
    }
}

// TESTS
// ================================================================================================
