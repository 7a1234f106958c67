use koi_core::Register;
use koi_processor::{Cpu, Swimmer};

use crate::common::{copy_concretes_and_constraints, satisfiable_register_value};

// ALLOCATION MODELS
// ================================================================================================

/// `malloc(size)` — allocates a symbolized heap chunk; NULL on a zero or unresolvable size.
pub fn koi_malloc<C: Cpu>(s: &mut Swimmer<C>, addr: u64) -> u64 {
    let len = satisfiable_register_value(s, Register::Rdi, 0);
    if len == 0 {
        return 0;
    }
    s.allocate_heap_memory("malloc", addr, len)
}

/// `calloc(count, size)` — like `malloc(count * size)`.
///
/// No explicit zeroing is needed: the allocator only hands out bytes that carry no concrete
/// value.
pub fn koi_calloc<C: Cpu>(s: &mut Swimmer<C>, addr: u64) -> u64 {
    let count = satisfiable_register_value(s, Register::Rdi, 0);
    if count == 0 {
        return 0;
    }
    let size = satisfiable_register_value(s, Register::Rsi, 0);
    if size == 0 {
        return 0;
    }
    s.allocate_heap_memory("calloc", addr, count.wrapping_mul(size))
}

/// `free(ptr)` — kills the pointed-to buffer, recording the call site as its sink.
pub fn koi_free<C: Cpu>(s: &mut Swimmer<C>, addr: u64) -> u64 {
    let ptr = satisfiable_register_value(s, Register::Rdi, 0);
    s.free_heap_memory(ptr, addr);
    0
}

/// `realloc(ptr, size)` — malloc on NULL, NULL on a dead or unknown pointer, otherwise a new
/// chunk carrying the overlap of the old contents.
pub fn koi_realloc<C: Cpu>(s: &mut Swimmer<C>, addr: u64) -> u64 {
    let new_len = satisfiable_register_value(s, Register::Rsi, 0);
    if new_len == 0 {
        return 0;
    }

    let old_ptr = satisfiable_register_value(s, Register::Rdi, 0);
    if old_ptr == 0 {
        return s.allocate_heap_memory("realloc", addr, new_len);
    }

    // A non-null argument must be a live allocation base.
    if !s.stat_heap_memory(old_ptr, true) {
        return 0;
    }
    let old_len = s.get_allocated_length(old_ptr);

    let new_ptr = s.allocate_heap_memory("realloc", addr, new_len);
    copy_concretes_and_constraints(s, new_ptr, old_ptr, old_len.min(new_len));
    s.free_heap_memory(old_ptr, addr);
    new_ptr
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use koi_core::{Register, layout};
    use koi_processor::{ElfImage, Swimmer};
    use koi_test_utils::MockCpu;
    use pretty_assertions::assert_eq;

    use super::{koi_calloc, koi_free, koi_malloc, koi_realloc};

    fn swimmer() -> Swimmer<MockCpu> {
        Swimmer::with_image(MockCpu::new(), &ElfImage::default())
    }

    #[test]
    fn malloc_allocates_and_tags_the_buffer() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 16);

        let ptr = koi_malloc(&mut s, 0x10_1000);
        assert_eq!(ptr, layout::HEAP_START);
        assert_eq!(s.get_allocated_length(ptr), 16);
        assert_eq!(s.get_buffer_alias(ptr), "malloc<--0x101000");
    }

    #[test]
    fn malloc_of_zero_is_null() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 0);
        assert_eq!(koi_malloc(&mut s, 0x10_1000), 0);
    }

    #[test]
    fn calloc_multiplies_its_arguments() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 4);
        s.write_register(Register::Rsi, 8);

        let ptr = koi_calloc(&mut s, 0x10_1000);
        assert_eq!(s.get_allocated_length(ptr), 32);

        // either argument at zero is a failed allocation
        s.write_register(Register::Rdi, 0);
        assert_eq!(koi_calloc(&mut s, 0x10_1000), 0);
    }

    #[test]
    fn free_records_its_call_site() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 16);
        let ptr = koi_malloc(&mut s, 0x10_1000);

        s.write_register(Register::Rdi, ptr);
        assert_eq!(koi_free(&mut s, 0x10_2000), 0);
        assert!(!s.stat_heap_memory(ptr, true));
        assert_eq!(s.get_heap_sink(ptr, true), 0x10_2000);
    }

    #[test]
    fn realloc_of_null_behaves_like_malloc() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 0);
        s.write_register(Register::Rsi, 8);

        let ptr = koi_realloc(&mut s, 0x10_1000);
        assert_eq!(s.get_allocated_length(ptr), 8);
        assert_eq!(s.get_buffer_alias(ptr), "realloc<--0x101000");
    }

    #[test]
    fn realloc_moves_contents_and_frees_the_old_chunk() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 4);
        let old = koi_malloc(&mut s, 0x10_1000);

        s.write_register(Register::Rdi, old);
        s.write_register(Register::Rsi, 8);
        let new = koi_realloc(&mut s, 0x10_2000);

        // the overlapping bytes carry the old symbolic structure into the new chunk
        assert_ne!(new, old);
        assert_eq!(s.memory_expr(new), s.memory_expr(old));
        assert_eq!(s.memory_expr(new + 3), s.memory_expr(old + 3));
        assert!(!s.stat_heap_memory(old, true));
        assert!(s.stat_heap_memory(new, true));
        assert_eq!(s.get_allocated_length(new), 8);
    }

    #[test]
    fn realloc_of_a_dead_pointer_is_null() {
        let mut s = swimmer();
        s.write_register(Register::Rdi, 4);
        let old = koi_malloc(&mut s, 0x10_1000);

        s.write_register(Register::Rdi, old);
        koi_free(&mut s, 0x10_2000);

        s.write_register(Register::Rdi, old);
        s.write_register(Register::Rsi, 8);
        assert_eq!(koi_realloc(&mut s, 0x10_3000), 0);
    }
}
