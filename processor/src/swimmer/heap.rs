use koi_core::{Buffer, Verbosity, layout};
use tracing::debug;

use super::Swimmer;
use crate::Cpu;

// HEAP MANAGEMENT
// ================================================================================================

/// Alias reported for pointers that no buffer accounts for.
const UNDEFINED_ALIAS: &str = "UNDEFINED";

impl<C: Cpu> Swimmer<C> {
    /// Allocates `len` bytes of heap memory by first-fit scan, symbolizing every byte.
    ///
    /// A byte is free iff it has no concrete value, is not symbolized, and lies outside every
    /// buffer in the heap table — dead ones included, so freed spans are never recycled and
    /// stale pointers keep diagnosing. Returns the chunk base, or 0 when the request is empty
    /// or the heap window is exhausted.
    pub fn allocate_heap_memory(&mut self, id: &str, sink: u64, len: u64) -> u64 {
        if len == 0 {
            return 0;
        }

        let mut ptr = layout::HEAP_START;
        while ptr < layout::HEAP_END {
            if !self.cpu.is_memory_defined(ptr, 1)
                && !self.cpu.is_memory_symbolized(ptr, 1)
                && !self.is_heap_allocated(ptr, len)
            {
                // Look ahead for a fully free span; on collision resume past it.
                let mut i = 1;
                while i < len {
                    if self.cpu.is_memory_defined(ptr + i, 1)
                        || self.cpu.is_memory_symbolized(ptr + i, 1)
                    {
                        break;
                    }
                    i += 1;
                }
                if i == len {
                    break;
                }
                ptr += i;
            } else {
                ptr += 1;
            }
        }

        if ptr + len > layout::HEAP_END {
            return 0;
        }

        let buffer = self.symbolize_named_memory(id, ptr, sink, len);
        self.heap.insert(ptr, buffer);
        if self.verbosity.contains(Verbosity::ALLOC) {
            debug!(len, ptr = format_args!("{ptr:#x}"), "allocated");
        }
        ptr
    }

    /// Frees the buffer whose base is exactly `ptr`, recording `sink` as the free site.
    ///
    /// Returns true only when the buffer transitioned from live to dead; unknown pointers,
    /// interior pointers and double frees all return false.
    pub fn free_heap_memory(&mut self, ptr: u64, sink: u64) -> bool {
        let verbose = self.verbosity.contains(Verbosity::ALLOC);
        if let Some(buffer) = self.heap.get_mut(&ptr) {
            if verbose {
                debug!(ptr = format_args!("{ptr:#x}"), "freeing pointer");
            }
            return buffer.kill(sink);
        }
        false
    }

    /// Returns the liveness of the buffer accounting for `ptr`; `strict` requires `ptr` to be
    /// the buffer base. No buffer means false.
    pub fn stat_heap_memory(&self, ptr: u64, strict: bool) -> bool {
        self.find_heap_buffer(ptr, strict).map(Buffer::stat).unwrap_or(false)
    }

    /// Returns the call site that created the buffer accounting for `ptr`, or 0.
    pub fn get_heap_origin(&self, ptr: u64, strict: bool) -> u64 {
        self.find_heap_buffer(ptr, strict).map(Buffer::origin).unwrap_or(0)
    }

    /// Returns the call site that last changed the state of the buffer accounting for `ptr`,
    /// or 0.
    pub fn get_heap_sink(&self, ptr: u64, strict: bool) -> u64 {
        self.find_heap_buffer(ptr, strict).map(Buffer::sink).unwrap_or(0)
    }

    /// Returns true if any byte of `[ptr, ptr + len)` falls inside a buffer, live or dead.
    pub fn is_heap_allocated(&self, ptr: u64, len: u64) -> bool {
        if len == 0 {
            return false;
        }
        self.heap.values().any(|buffer| {
            let lo = buffer.addr();
            let hi = lo + buffer.size() - 1;
            ptr <= hi && ptr + len - 1 >= lo
        })
    }

    /// Returns the size of the allocation based exactly at `ptr`, or 0.
    pub fn get_allocated_length(&self, ptr: u64) -> u64 {
        self.heap.get(&ptr).map(Buffer::size).unwrap_or(0)
    }

    /// Returns the alias of the buffer based exactly at `ptr`, or `"UNDEFINED"`.
    pub fn get_buffer_alias(&self, ptr: u64) -> String {
        self.heap
            .get(&ptr)
            .map(|buffer| buffer.alias.clone())
            .unwrap_or_else(|| UNDEFINED_ALIAS.to_string())
    }

    /// Returns true if `ptr` falls within the heap address window.
    pub fn is_heap_address(&self, ptr: u64) -> bool {
        layout::is_heap_address(ptr)
    }

    // HELPERS
    // --------------------------------------------------------------------------------------------

    /// Finds the buffer based at `ptr`, or containing it when `strict` is false.
    fn find_heap_buffer(&self, ptr: u64, strict: bool) -> Option<&Buffer> {
        if let Some(buffer) = self.heap.get(&ptr) {
            return Some(buffer);
        }
        if strict {
            return None;
        }
        self.heap.values().find(|buffer| buffer.contains(ptr))
    }
}
