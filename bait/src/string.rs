use koi_core::{Expr, Register};
use koi_processor::{Cpu, Swimmer};
use tracing::warn;

use crate::common::{copy_concretes_and_constraints, satisfiable_register_value};

// STRING MODELS
// ================================================================================================

/// `strlen(s)` — deduces the length of a concrete, heap-resident or stack-resident string.
///
/// A concrete string is measured directly. Otherwise the candidate extent is the heap
/// allocation length, or failing that the inferred stack-buffer length; within that extent
/// the earliest concrete NUL wins, falling back to the latest position where a symbolic byte
/// can still be NUL. Returns 0 when no string can be found.
pub fn koi_strlen<C: Cpu>(s: &mut Swimmer<C>, _addr: u64) -> u64 {
    let ptr = satisfiable_register_value(s, Register::Rdi, 0);
    if ptr == 0 {
        return 0;
    }

    // Trivial case: a concrete string is already defined.
    let len = s.read_string(ptr).len() as u64;
    if len > 0 {
        return len;
    }

    let mut full_len = s.get_allocated_length(ptr);
    if full_len == 0 {
        full_len = s.get_stack_buffer_length(ptr);
    }
    if full_len == 0 {
        return 0;
    }

    // Search backward for the earliest defined NUL and the latest satisfiable symbolic NUL.
    let mut len = full_len;
    let mut symbolic_null = 0;
    let mut i = full_len - 1;
    loop {
        if symbolic_null == 0 && s.is_memory_symbolized(ptr + i, 1) {
            if let Some(ast) = s.memory_expr(ptr + i) {
                let is_null = Expr::eq(ast, Expr::bv(0, 8));
                if !s.get_model(&is_null).is_empty() {
                    symbolic_null = i;
                }
            }
        } else if s.is_memory_defined(ptr + i, 1) && s.read_memory(ptr + i) == 0 {
            len = i;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }

    if len == full_len {
        len = symbolic_null;
    }
    len
}

/// `strcpy(dst, src)` — copies the source string, truncated to the destination's capacity.
///
/// Capacity is the heap allocation length, or failing that the inferred stack-buffer length;
/// an unknown destination is trusted to fit. When the copy would run past the containing
/// stackframe's base the overflow is reported before the (truncated) copy happens.
pub fn koi_strcpy<C: Cpu>(s: &mut Swimmer<C>, _addr: u64) -> u64 {
    let dptr = satisfiable_register_value(s, Register::Rdi, 0);
    let sptr = satisfiable_register_value(s, Register::Rsi, 0);

    // strlen takes its argument from rdi.
    s.write_register(Register::Rdi, sptr);
    let slen = koi_strlen(s, 0);
    s.write_register(Register::Rdi, dptr);

    let mut capacity = s.get_allocated_length(dptr);
    if capacity == 0 {
        capacity = s.get_stack_buffer_length(dptr);
    }
    if capacity == 0 {
        capacity = slen;
    }

    if let Some(frame) = s.stackframe_containing(dptr)
        && dptr + slen > frame.addr()
    {
        warn!(
            dst = format_args!("{dptr:#x}"),
            len = slen,
            capacity,
            "stack smashing imminent"
        );
    }

    copy_concretes_and_constraints(s, dptr, sptr, slen.min(capacity));
    dptr
}

/// `strncpy(dst, src, n)` — copies `min(n, strlen(src))` bytes.
pub fn koi_strncpy<C: Cpu>(s: &mut Swimmer<C>, _addr: u64) -> u64 {
    let dptr = satisfiable_register_value(s, Register::Rdi, 0);
    let sptr = satisfiable_register_value(s, Register::Rsi, 0);
    let n = satisfiable_register_value(s, Register::Rdx, 0);

    s.write_register(Register::Rdi, sptr);
    let slen = koi_strlen(s, 0);
    s.write_register(Register::Rdi, dptr);

    copy_concretes_and_constraints(s, dptr, sptr, n.min(slen));
    dptr
}

/// `strchr(s, c)` — finds the first position where the character can occur.
///
/// Handles every combination of concrete/symbolic string and needle; a symbolic side matches
/// wherever equality is satisfiable. Returns the address of the match, or 0 when none is
/// possible.
pub fn koi_strchr<C: Cpu>(s: &mut Swimmer<C>, _addr: u64) -> u64 {
    let ptr_in = satisfiable_register_value(s, Register::Rdi, 0);

    if !s.is_memory_symbolized(ptr_in, 1) {
        // Concrete string, concrete needle: a plain scan including the terminator.
        if !s.is_register_symbolized(Register::Rsi) {
            let chr = s.read_register(Register::Rsi);
            let mut ptr = ptr_in;
            loop {
                let byte = s.read_memory(ptr);
                if u64::from(byte) == chr {
                    return ptr;
                }
                ptr += 1;
                if byte == 0 {
                    break;
                }
            }
        }
        // Concrete string, symbolic needle: the first byte the needle can equal.
        else if let Some(chr_ast) = s.register_expr(Register::Rsi) {
            let mut ptr = ptr_in;
            loop {
                let byte = s.read_memory(ptr);
                let matches = Expr::eq(chr_ast.clone(), Expr::bv(u64::from(byte), 8));
                if !s.get_model(&matches).is_empty() {
                    return ptr;
                }
                ptr += 1;
                if byte == 0 {
                    break;
                }
            }
        }
    } else {
        // Symbolic string: scan the deduced extent for a satisfiable match.
        let full_len = koi_strlen(s, 0);

        if !s.is_register_symbolized(Register::Rsi) {
            let chr = s.read_register(Register::Rsi);
            for i in 0..full_len {
                if let Some(ast) = s.memory_expr(ptr_in + i) {
                    let matches = Expr::eq(ast, Expr::bv(chr, 8));
                    if !s.get_model(&matches).is_empty() {
                        return ptr_in + i;
                    }
                }
            }
        } else if let Some(chr_ast) = s.register_expr(Register::Rsi) {
            for i in 0..full_len {
                if let Some(ast) = s.memory_expr(ptr_in + i) {
                    let matches = Expr::eq(chr_ast.clone(), ast);
                    if !s.get_model(&matches).is_empty() {
                        return ptr_in + i;
                    }
                }
            }
        }
    }

    0
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use koi_core::Register;
    use koi_processor::{ElfImage, Swimmer};
    use koi_test_utils::MockCpu;
    use pretty_assertions::assert_eq;

    use super::{koi_strchr, koi_strcpy, koi_strlen, koi_strncpy};

    fn swimmer() -> Swimmer<MockCpu> {
        Swimmer::with_image(MockCpu::new(), &ElfImage::default())
    }

    fn write_str(s: &mut Swimmer<MockCpu>, addr: u64, text: &[u8]) {
        for (i, byte) in text.iter().enumerate() {
            s.write_memory(addr + i as u64, *byte);
        }
    }

    #[test]
    fn strlen_measures_concrete_strings() {
        let mut s = swimmer();
        write_str(&mut s, 0x6000, b"koi\0");
        s.write_register(Register::Rdi, 0x6000);
        assert_eq!(koi_strlen(&mut s, 0), 3);
    }

    #[test]
    fn strlen_of_null_is_zero() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 0);
        assert_eq!(koi_strlen(&mut s, 0), 0);
    }

    #[test]
    fn strlen_of_an_unknown_pointer_is_zero() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 0x6000);
        assert_eq!(koi_strlen(&mut s, 0), 0);
    }

    #[test]
    fn strlen_of_a_symbolic_heap_string_uses_the_latest_possible_null() {
        let mut s = swimmer();
        let ptr = s.allocate_heap_memory("fgets", 0x10_1000, 8);
        s.write_register(Register::Rdi, ptr);
        assert_eq!(koi_strlen(&mut s, 0), 7);
    }

    #[test]
    fn strlen_prefers_the_earliest_concrete_null() {
        let mut s = swimmer();
        let ptr = s.allocate_heap_memory("fgets", 0x10_1000, 8);
        s.write_memory(ptr + 3, 0);
        s.write_register(Register::Rdi, ptr);
        assert_eq!(koi_strlen(&mut s, 0), 3);
    }

    #[test]
    fn strcpy_truncates_at_the_destination_capacity() {
        let mut s = swimmer();
        let src = s.allocate_heap_memory("fgets", 0x10_1000, 8);
        let dst = s.allocate_heap_memory("malloc", 0x10_2000, 4);

        s.write_register(Register::Rdi, dst);
        s.write_register(Register::Rsi, src);
        assert_eq!(koi_strcpy(&mut s, 0x10_3000), dst);

        // four bytes of symbolic structure moved, the rest of dst is untouched
        assert_eq!(s.memory_expr(dst), s.memory_expr(src));
        assert_eq!(s.memory_expr(dst + 3), s.memory_expr(src + 3));
        assert_ne!(s.memory_expr(dst + 3), s.memory_expr(src + 4));
    }

    #[test]
    fn strncpy_truncates_at_n() {
        let mut s = swimmer();
        let src = s.allocate_heap_memory("fgets", 0x10_1000, 8);
        let dst = s.allocate_heap_memory("malloc", 0x10_2000, 8);

        s.write_register(Register::Rdi, dst);
        s.write_register(Register::Rsi, src);
        s.write_register(Register::Rdx, 2);
        assert_eq!(koi_strncpy(&mut s, 0x10_3000), dst);

        assert_eq!(s.memory_expr(dst + 1), s.memory_expr(src + 1));
        assert_ne!(s.memory_expr(dst + 2), s.memory_expr(src + 2));
    }

    #[test]
    fn strchr_scans_concrete_strings() {
        let mut s = swimmer();
        write_str(&mut s, 0x6000, b"koi\0");
        s.write_register(Register::Rdi, 0x6000);

        s.write_register(Register::Rsi, u64::from(b'i'));
        assert_eq!(koi_strchr(&mut s, 0), 0x6002);

        // the terminator is findable
        s.write_register(Register::Rsi, 0);
        assert_eq!(koi_strchr(&mut s, 0), 0x6003);

        s.write_register(Register::Rsi, u64::from(b'x'));
        assert_eq!(koi_strchr(&mut s, 0), 0);
    }

    #[test]
    fn strchr_matches_symbolic_strings_at_the_first_position() {
        let mut s = swimmer();
        let ptr = s.allocate_heap_memory("fgets", 0x10_1000, 8);
        s.write_register(Register::Rdi, ptr);
        s.write_register(Register::Rsi, u64::from(b'a'));
        assert_eq!(koi_strchr(&mut s, 0), ptr);
    }
}
