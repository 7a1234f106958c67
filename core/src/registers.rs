//! x86-64 register identifiers.

use std::fmt;

// REGISTER
// ================================================================================================

/// An x86-64 register the engine or a hook can address.
///
/// Only the registers the engine actually reasons about are listed: the instruction pointer,
/// the general-purpose set, the common status flags and the XMM bank. Sub-registers (`eax`,
/// `al`, ...) are the collaborator's concern and never surface here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum Register {
    Rip,
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Cf,
    Of,
    Pf,
    Sf,
    Tf,
    Zf,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

impl Register {
    /// General-purpose registers symbolized at engine start, in symbolization order.
    pub const GENERAL: [Self; 14] = [
        Self::Rax,
        Self::Rbx,
        Self::Rcx,
        Self::Rdx,
        Self::Rsi,
        Self::Rdi,
        Self::R8,
        Self::R9,
        Self::R10,
        Self::R11,
        Self::R12,
        Self::R13,
        Self::R14,
        Self::R15,
    ];

    /// Status flags symbolized at engine start.
    pub const FLAGS: [Self; 6] = [Self::Cf, Self::Of, Self::Pf, Self::Sf, Self::Tf, Self::Zf];

    /// XMM registers symbolized at engine start.
    pub const XMM: [Self; 16] = [
        Self::Xmm0,
        Self::Xmm1,
        Self::Xmm2,
        Self::Xmm3,
        Self::Xmm4,
        Self::Xmm5,
        Self::Xmm6,
        Self::Xmm7,
        Self::Xmm8,
        Self::Xmm9,
        Self::Xmm10,
        Self::Xmm11,
        Self::Xmm12,
        Self::Xmm13,
        Self::Xmm14,
        Self::Xmm15,
    ];

    /// Registers shown by the post-instruction register dump.
    pub const DUMPED: [Self; 8] = [
        Self::Rax,
        Self::Rbx,
        Self::Rcx,
        Self::Rdx,
        Self::Rsi,
        Self::Rdi,
        Self::Rbp,
        Self::Rsp,
    ];

    /// Returns the register width in bits.
    pub const fn bit_size(&self) -> u32 {
        match self {
            Self::Cf | Self::Of | Self::Pf | Self::Sf | Self::Tf | Self::Zf => 1,
            Self::Xmm0 | Self::Xmm1 | Self::Xmm2 | Self::Xmm3 | Self::Xmm4 | Self::Xmm5
            | Self::Xmm6 | Self::Xmm7 | Self::Xmm8 | Self::Xmm9 | Self::Xmm10 | Self::Xmm11
            | Self::Xmm12 | Self::Xmm13 | Self::Xmm14 | Self::Xmm15 => 128,
            _ => 64,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Rip => "rip",
            Self::Rax => "rax",
            Self::Rbx => "rbx",
            Self::Rcx => "rcx",
            Self::Rdx => "rdx",
            Self::Rsi => "rsi",
            Self::Rdi => "rdi",
            Self::Rbp => "rbp",
            Self::Rsp => "rsp",
            Self::R8 => "r8",
            Self::R9 => "r9",
            Self::R10 => "r10",
            Self::R11 => "r11",
            Self::R12 => "r12",
            Self::R13 => "r13",
            Self::R14 => "r14",
            Self::R15 => "r15",
            Self::Cf => "cf",
            Self::Of => "of",
            Self::Pf => "pf",
            Self::Sf => "sf",
            Self::Tf => "tf",
            Self::Zf => "zf",
            Self::Xmm0 => "xmm0",
            Self::Xmm1 => "xmm1",
            Self::Xmm2 => "xmm2",
            Self::Xmm3 => "xmm3",
            Self::Xmm4 => "xmm4",
            Self::Xmm5 => "xmm5",
            Self::Xmm6 => "xmm6",
            Self::Xmm7 => "xmm7",
            Self::Xmm8 => "xmm8",
            Self::Xmm9 => "xmm9",
            Self::Xmm10 => "xmm10",
            Self::Xmm11 => "xmm11",
            Self::Xmm12 => "xmm12",
            Self::Xmm13 => "xmm13",
            Self::Xmm14 => "xmm14",
            Self::Xmm15 => "xmm15",
        };
        f.write_str(name)
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use super::Register;

    #[test]
    fn widths_match_the_hardware() {
        assert_eq!(Register::Rax.bit_size(), 64);
        assert_eq!(Register::Zf.bit_size(), 1);
        assert_eq!(Register::Xmm3.bit_size(), 128);
    }

    #[test]
    fn display_uses_lowercase_names() {
        assert_eq!(Register::R10.to_string(), "r10");
        assert_eq!(Register::Xmm15.to_string(), "xmm15");
    }
}
