//! Swap file slot allocator (spec §4.2). The bookkeeping is an in-memory
//! free list sized to fit in one `PAGE_SIZE` page, same as the original's
//! single bookkeeping page; a slot is a fixed `PAGE_SIZE` offset into the
//! backing file, `slot N` at file bytes `[N*PAGE_SIZE, (N+1)*PAGE_SIZE)`.

use crate::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotNo(pub u32);

/// One bookkeeping page holds a head index (one word) plus one `next`
/// word per slot (spec §9: "design not committed" beyond one page).
const BOOKKEEPING_HEADER_WORDS: usize = 1;
const WORD_SIZE: usize = 8;

pub fn max_slots_per_bookkeeping_page() -> u32 {
    ((PAGE_SIZE / WORD_SIZE) - BOOKKEEPING_HEADER_WORDS) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigError {
    pub requested: u32,
    pub max: u32,
}

pub struct SwapFile {
    next: Vec<Option<SlotNo>>,
    free_head: Option<SlotNo>,
    free_count: usize,
}

impl SwapFile {
    /// Construct a swap file with `num_slots` slots. Multi-page
    /// bookkeeping is explicitly not implemented (spec §4.2, §9 open
    /// question resolved in SPEC_FULL.md): exceeding one page's capacity
    /// is a configuration error, not silent corruption.
    pub fn new(num_slots: u32) -> Result<Self, ConfigError> {
        let max = max_slots_per_bookkeeping_page();
        if num_slots > max {
            return Err(ConfigError {
                requested: num_slots,
                max,
            });
        }
        let mut next = Vec::with_capacity(num_slots as usize);
        for i in 0..num_slots {
            next.push(if i + 1 < num_slots {
                Some(SlotNo(i + 1))
            } else {
                None
            });
        }
        Ok(SwapFile {
            next,
            free_head: if num_slots > 0 { Some(SlotNo(0)) } else { None },
            free_count: num_slots as usize,
        })
    }

    pub fn capacity(&self) -> usize {
        self.next.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn alloc(&mut self) -> Option<SlotNo> {
        let head = self.free_head?;
        self.free_head = self.next[head.0 as usize];
        self.free_count -= 1;
        self.next[head.0 as usize] = None;
        Some(head)
    }

    pub fn free(&mut self, slot: SlotNo) {
        self.next[slot.0 as usize] = self.free_head;
        self.free_head = Some(slot);
        self.free_count += 1;
    }

    pub fn file_offset(slot: SlotNo) -> u64 {
        slot.0 as u64 * PAGE_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_returns_none() {
        let mut sf = SwapFile::new(2).unwrap();
        assert!(sf.alloc().is_some());
        assert!(sf.alloc().is_some());
        assert!(sf.alloc().is_none());
    }

    #[test]
    fn slot_is_reusable_after_free() {
        let mut sf = SwapFile::new(4).unwrap();
        let a = sf.alloc().unwrap();
        sf.free(a);
        let b = sf.alloc().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_more_than_one_bookkeeping_page() {
        let max = max_slots_per_bookkeeping_page();
        assert!(SwapFile::new(max + 1).is_err());
        assert!(SwapFile::new(max).is_ok());
    }

    #[test]
    fn file_offsets_are_page_aligned_and_disjoint() {
        assert_eq!(SwapFile::file_offset(SlotNo(0)), 0);
        assert_eq!(SwapFile::file_offset(SlotNo(3)), 3 * PAGE_SIZE as u64);
    }
}
