use crate::region::Region;

// STACKFRAME
// ================================================================================================

/// One activation record on the inferred call stack.
///
/// A stackframe grows downward from its base address, so `addr` is the highest address of the
/// frame and the frame spans `[addr - size, addr]`. The frame remembers every offset from the
/// base at which it has been accessed; the access set is kept sorted and deduplicated and
/// always contains `0` and `size`, which lets [`Self::access_gap`] derive a conservative
/// underestimate of the length of a buffer living at a given offset.
#[derive(Clone, Debug)]
pub struct Stackframe {
    region: Region,
    accesses: Vec<u64>,
}

impl Default for Stackframe {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl Stackframe {
    /// Returns a new stackframe based at `addr` spanning `size` bytes.
    pub fn new(addr: u64, size: u64) -> Self {
        Self { region: Region::new(addr, size), accesses: Self::seed(size) }
    }

    fn seed(size: u64) -> Vec<u64> {
        if size == 0 { vec![0] } else { vec![0, size] }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the frame base address.
    pub const fn addr(&self) -> u64 {
        self.region.addr()
    }

    /// Returns the frame size in bytes.
    pub const fn size(&self) -> u64 {
        self.region.size()
    }

    /// Returns the recorded access offsets, sorted ascending.
    pub fn accesses(&self) -> &[u64] {
        &self.accesses
    }

    /// Returns true if `ptr` falls within `[addr - size, addr]`.
    pub const fn contains(&self, ptr: u64) -> bool {
        ptr <= self.addr() && ptr >= self.addr() - self.size()
    }

    // ACCESS TRACKING
    // --------------------------------------------------------------------------------------------

    /// Records an access at `offs` bytes below the frame base.
    ///
    /// Returns true iff the offset had not been seen before.
    pub fn add_access(&mut self, offs: u64) -> bool {
        match self.accesses.binary_search(&offs) {
            Ok(_) => false,
            Err(at) => {
                self.accesses.insert(at, offs);
                true
            },
        }
    }

    /// Returns the distance from `offs` back to the access preceding the first recorded access
    /// it reaches, or 0 when every non-zero access lies above `offs`.
    ///
    /// This is a conservative underestimate of the length of the buffer containing `offs`: two
    /// neighboring accesses bound a chunk of the frame that the program addresses as one
    /// object.
    pub fn access_gap(&self, offs: u64) -> u64 {
        for i in 1..self.accesses.len() {
            if offs >= self.accesses[i] {
                return offs - self.accesses[i - 1];
            }
        }
        0
    }

    // RESIZING
    // --------------------------------------------------------------------------------------------

    /// Re-bases the frame at `addr` with `size` bytes, reseeding the access set.
    pub fn update(&mut self, addr: u64, size: u64) {
        self.region = Region::new(addr, size);
        self.accesses = Self::seed(size);
    }

    /// Grows the frame by `bytes`, recording the new end offset as an access.
    pub fn extend(&mut self, bytes: u64) {
        self.region = Region::new(self.addr(), self.size() + bytes);
        let size = self.size();
        self.add_access(size);
    }

    /// Shrinks the frame by `bytes`.
    ///
    /// The access set is left untouched; keeping it consistent is the caller's responsibility.
    /// Shrinking by more than the current size is undefined.
    pub fn shrink(&mut self, bytes: u64) {
        debug_assert!(bytes <= self.size());
        self.region = Region::new(self.addr(), self.size().wrapping_sub(bytes));
    }
}

// TESTS
// ================================================================================================

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::Stackframe;

    #[test]
    fn new_frame_is_seeded_with_bounds() {
        let frame = Stackframe::new(0x7000_2000, 0x20);
        assert_eq!(frame.accesses(), &[0, 0x20]);

        // a zero-sized frame holds a single seed entry
        let empty = Stackframe::new(0x7000_2000, 0);
        assert_eq!(empty.accesses(), &[0]);
    }

    #[test]
    fn add_access_keeps_the_set_sorted_and_unique() {
        let mut frame = Stackframe::new(0x7000_2000, 0x20);
        assert!(frame.add_access(0x10));
        assert!(frame.add_access(0x8));
        assert!(!frame.add_access(0x10));
        assert_eq!(frame.accesses(), &[0, 0x8, 0x10, 0x20]);
    }

    #[test]
    fn access_gap_measures_back_to_the_previous_access() {
        let mut frame = Stackframe::new(0x7000_2000, 0x20);
        frame.add_access(0x10);

        // 0x10 reaches the 0x10 entry, whose predecessor is 0
        assert_eq!(frame.access_gap(0x10), 0x10);
        // 0x20 reaches the 0x10 entry first, measuring back to 0
        assert_eq!(frame.access_gap(0x20), 0x20);
        // nothing at or below 0x8 besides the seed zero
        assert_eq!(frame.access_gap(0x8), 0);
    }

    #[test]
    fn access_gap_is_zero_when_no_entry_is_reached() {
        let frame = Stackframe::new(0x7000_2000, 0x40);
        assert_eq!(frame.access_gap(0x10), 0);
    }

    #[test]
    fn update_reseeds_accesses() {
        let mut frame = Stackframe::new(0x7000_2000, 0x20);
        frame.add_access(0x10);
        frame.update(0x7000_3000, 0x40);
        assert_eq!(frame.addr(), 0x7000_3000);
        assert_eq!(frame.accesses(), &[0, 0x40]);
    }

    #[test]
    fn extend_records_the_new_end() {
        let mut frame = Stackframe::new(0x7000_2000, 0x20);
        frame.extend(0x10);
        assert_eq!(frame.size(), 0x30);
        assert_eq!(frame.accesses(), &[0, 0x20, 0x30]);
    }

    #[test]
    fn shrink_leaves_accesses_alone() {
        let mut frame = Stackframe::new(0x7000_2000, 0x20);
        frame.shrink(0x8);
        assert_eq!(frame.size(), 0x18);
        assert_eq!(frame.accesses(), &[0, 0x20]);
    }

    proptest! {
        #[test]
        fn accesses_stay_strictly_sorted(offsets in prop::collection::vec(0u64..0x100, 0..32)) {
            let mut frame = Stackframe::new(0x7000_2000, 0x100);
            for offs in offsets {
                frame.add_access(offs);
            }
            let accesses = frame.accesses();
            prop_assert!(accesses.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(accesses.contains(&0));
            prop_assert!(accesses.contains(&0x100));
        }
    }
}
