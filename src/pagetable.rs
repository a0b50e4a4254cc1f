//! Two-level software page table (spec §3, §4.3). Lazily allocated:
//! second-level pages are created on first touch of any entry in them.

use crate::frame::FrameNo;
use crate::kernel_if::VAddr;
use crate::swap::SlotNo;
use crate::PAGE_SIZE;

/// Second level covers this many pages per entry.
const LEVEL2_BITS: u32 = 10;
const LEVEL2_SIZE: usize = 1 << LEVEL2_BITS; // 1024 entries
/// First level also has 1024 entries, giving a 4GiB-addressable table
/// (1024 * 1024 * PAGE_SIZE), matching the non-goal "virtual memory above
/// 4 GiB" ceiling in spec §1.
const LEVEL1_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pte {
    Unmapped,
    Frame(FrameNo, crate::kernel_if::Rights),
    Swapped(SlotNo),
}

impl Default for Pte {
    fn default() -> Self {
        Pte::Unmapped
    }
}

pub struct PageTable {
    levels: Vec<Option<Box<[Pte; LEVEL2_SIZE]>>>,
}

fn split(vaddr: VAddr) -> (usize, usize) {
    let page = (vaddr / PAGE_SIZE as u64) as usize;
    let l1 = page / LEVEL2_SIZE;
    let l2 = page % LEVEL2_SIZE;
    (l1, l2)
}

impl PageTable {
    pub fn new() -> Self {
        let mut levels = Vec::with_capacity(LEVEL1_SIZE);
        for _ in 0..LEVEL1_SIZE {
            levels.push(None);
        }
        PageTable { levels }
    }

    /// Read-only lookup; does not allocate the second level.
    pub fn peek(&self, vaddr: VAddr) -> Pte {
        let (l1, l2) = split(vaddr);
        match self.levels.get(l1).and_then(|l| l.as_ref()) {
            Some(level2) => level2[l2],
            None => Pte::Unmapped,
        }
    }

    /// Lazily allocates the second-level table on first touch, then
    /// returns a mutable reference to the entry for `vaddr`.
    pub fn entry_mut(&mut self, vaddr: VAddr) -> &mut Pte {
        let (l1, l2) = split(vaddr);
        let level2 = self.levels[l1].get_or_insert_with(|| Box::new([Pte::Unmapped; LEVEL2_SIZE]));
        &mut level2[l2]
    }

    /// Walks both levels, yielding every non-`Unmapped` entry with its
    /// virtual address — used by `addrspace_destroy` to release every
    /// frame and swap slot the table references (spec §4.3).
    pub fn iter_mapped(&self) -> impl Iterator<Item = (VAddr, Pte)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter_map(|(l1, lvl)| lvl.as_ref().map(move |l| (l1, l)))
            .flat_map(move |(l1, level2)| {
                level2.iter().enumerate().filter_map(move |(l2, pte)| {
                    if matches!(pte, Pte::Unmapped) {
                        None
                    } else {
                        let page = l1 * LEVEL2_SIZE + l2;
                        Some((page as u64 * PAGE_SIZE as u64, *pte))
                    }
                })
            })
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_if::Rights;

    #[test]
    fn unmapped_is_default() {
        let pt = PageTable::new();
        assert_eq!(pt.peek(0), Pte::Unmapped);
        assert_eq!(pt.peek(0xFFFF_F000), Pte::Unmapped);
    }

    #[test]
    fn entry_mut_lazily_allocates_and_persists() {
        let mut pt = PageTable::new();
        *pt.entry_mut(0x2000) = Pte::Frame(FrameNo(7), Rights::READ);
        assert_eq!(pt.peek(0x2000), Pte::Frame(FrameNo(7), Rights::READ));
        assert_eq!(pt.peek(0x3000), Pte::Unmapped);
    }

    #[test]
    fn iter_mapped_only_yields_resident_or_swapped() {
        let mut pt = PageTable::new();
        *pt.entry_mut(0x1000) = Pte::Frame(FrameNo(1), Rights::READ);
        *pt.entry_mut(0x5000) = Pte::Swapped(SlotNo(2));
        *pt.entry_mut(0x6000) = Pte::Unmapped;
        let mapped: Vec<_> = pt.iter_mapped().collect();
        assert_eq!(mapped.len(), 2);
    }
}
