use koi_core::Register;
use koi_processor::{Cpu, Swimmer};

// I/O MODELS
// ================================================================================================

/// `fgets(buf, n, stream)` — fills the buffer with `n` fresh symbolic bytes and terminates
/// it, standing in for "the user typed something".
pub fn koi_fgets<C: Cpu>(s: &mut Swimmer<C>, addr: u64) -> u64 {
    let ptr = s.read_register(Register::Rdi);
    let n = s.read_register(Register::Rsi);
    s.symbolize_named_memory("fgets", ptr, addr, n);
    s.write_memory(ptr.wrapping_add(n).wrapping_sub(1), 0);
    n
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use koi_core::Register;
    use koi_processor::{ElfImage, Swimmer};
    use koi_test_utils::MockCpu;
    use pretty_assertions::assert_eq;

    use super::koi_fgets;

    #[test]
    fn fgets_symbolizes_the_buffer_and_terminates_it() {
        let mut s = Swimmer::with_image(MockCpu::new(), &ElfImage::default());
        s.write_register(Register::Rdi, 0x7000_1000);
        s.write_register(Register::Rsi, 9);

        assert_eq!(koi_fgets(&mut s, 0x10_1000), 9);

        assert!(s.is_memory_symbolized(0x7000_1000, 9));
        assert_eq!(s.read_string(0x7000_1000), "");
        // the final byte is a concrete NUL
        assert!(s.is_memory_defined(0x7000_1008, 1));
        assert_eq!(s.read_memory(0x7000_1008), 0);
    }
}
