use koi_core::Register;
use koi_processor::{Cpu, Swimmer};

// SOLVER-AWARE HELPERS
// ================================================================================================

/// Deduces a concrete value for `reg` that satisfies its constraints.
///
/// A concrete register reads directly. A symbolic register is only resolvable when its
/// backing expression is logical; the first assignment of a satisfying model is returned.
/// Anything else yields `err`.
pub fn satisfiable_register_value<C: Cpu>(s: &mut Swimmer<C>, reg: Register, err: u64) -> u64 {
    if !s.is_register_symbolized(reg) {
        return s.read_register(reg);
    }

    if let Some(ast) = s.register_expr(reg)
        && ast.is_logical()
    {
        let model = s.get_model(&ast);
        if let Some(value) = model.values().next() {
            return *value;
        }
    }
    err
}

/// Copies `len` bytes from `src` to `dst`, preserving symbolic structure.
///
/// Symbolic source bytes have their expression assigned onto the destination byte, concrete
/// bytes are copied, and undefined bytes are written as zero.
pub fn copy_concretes_and_constraints<C: Cpu>(s: &mut Swimmer<C>, dst: u64, src: u64, len: u64) {
    for i in 0..len {
        if s.is_memory_symbolized(src + i, 1) {
            if let Some(ast) = s.memory_expr(src + i) {
                s.assign_memory_expr(dst + i, ast);
            }
        } else if s.is_memory_defined(src + i, 1) {
            let byte = s.read_memory(src + i);
            s.write_memory(dst + i, byte);
        } else {
            s.write_memory(dst + i, 0);
        }
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use koi_core::{Expr, Register, VarId};
    use koi_processor::{Cpu, ElfImage, Swimmer};
    use koi_test_utils::MockCpu;
    use pretty_assertions::assert_eq;

    use super::{copy_concretes_and_constraints, satisfiable_register_value};

    fn swimmer() -> Swimmer<MockCpu> {
        Swimmer::with_image(MockCpu::new(), &ElfImage::default())
    }

    #[test]
    fn concrete_registers_read_directly() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 0x1234);
        assert_eq!(satisfiable_register_value(&mut s, Register::Rdi, 0), 0x1234);
    }

    #[test]
    fn plain_symbolic_registers_yield_the_error_value() {
        let mut s = swimmer();
        // rdi still carries its startup variable, which is not a logical node
        assert_eq!(satisfiable_register_value(&mut s, Register::Rdi, 0xdead), 0xdead);
    }

    #[test]
    fn logical_register_expressions_are_solved() {
        let mut s = swimmer();
        let constraint = Expr::eq(Expr::var(VarId(99), 64), Expr::bv(0x40, 64));
        s.cpu_mut().assign_register_expr(Register::Rdi, constraint);
        assert_eq!(satisfiable_register_value(&mut s, Register::Rdi, 0), 0x40);
    }

    #[test]
    fn copies_preserve_symbolic_and_concrete_structure() {
        let mut s = swimmer();
        s.write_memory(0x6000, 0x41);
        s.cpu_mut().symbolize_memory(0x6001, 1, "sym");
        // 0x6002 left undefined

        copy_concretes_and_constraints(&mut s, 0x7000, 0x6000, 3);

        assert_eq!(s.read_memory(0x7000), 0x41);
        assert!(s.is_memory_symbolized(0x7001, 1));
        assert_eq!(s.memory_expr(0x7001), s.memory_expr(0x6001));
        assert!(s.is_memory_defined(0x7002, 1));
        assert_eq!(s.read_memory(0x7002), 0);
    }
}
