use bitflags::bitflags;

bitflags! {
    /// Diagnostic categories emitted while exploring.
    ///
    /// Each bit gates one family of events; the bit positions are stable and part of the
    /// public contract. `CTRLFLOW` and `MEM` are convenience unions for the two most common
    /// debugging sessions.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Verbosity: u8 {
        /// Every processed instruction.
        const INSN = 0x01;
        /// Symbolization of registers and memory.
        const SYMS = 0x02;
        /// Register dump after every instruction.
        const REGS = 0x04;
        /// Branch forks: which side is being followed.
        const BRANCH = 0x08;
        /// Satisfying models at fork points.
        const MODEL = 0x10;
        /// Why an exploration stopped.
        const STOPS = 0x20;
        /// Heap allocation and free events.
        const ALLOC = 0x40;
        /// Stackframe inference events.
        const STACK = 0x80;

        /// Instructions, branches and stop reasons.
        const CTRLFLOW = Self::INSN.bits() | Self::BRANCH.bits() | Self::STOPS.bits();
        /// Heap and stackframe events.
        const MEM = Self::ALLOC.bits() | Self::STACK.bits();
    }
}

// TESTS
// ================================================================================================
