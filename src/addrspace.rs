//! Per-process address space: page table + region list, and the teardown
//! that releases every frame and swap slot it references (spec §3, §4.3).

use crate::frame::FrameTable;
use crate::kernel_if::{KernelOps, SpaceId};
use crate::pagetable::{PageTable, Pte};
use crate::region::{Region, RegionList};
use crate::swap::SwapFile;

pub struct AddressSpace {
    pub space_id: SpaceId,
    pub pagetable: PageTable,
    pub regions: RegionList,
}

impl AddressSpace {
    pub fn new(space_id: SpaceId) -> Self {
        AddressSpace {
            space_id,
            pagetable: PageTable::new(),
            regions: RegionList::new(),
        }
    }

    /// Adds a 1MiB stack region above a 1MiB heap region above the
    /// highest already-registered region, mirroring the original's
    /// `add_stackheap` (`examples/original_source/sos/pager.c`). Returns
    /// the initial stack pointer for the new thread.
    pub fn add_stack_and_heap(&mut self) -> u64 {
        use crate::kernel_if::Rights;
        const ONE_MEG: u64 = 1 << 20;
        const PAGE_SIZE: u64 = crate::PAGE_SIZE as u64;

        let mut top = page_align_up(self.regions.highest_end());
        let heap_base = top;
        self.regions
            .insert(Region {
                base: heap_base,
                size: ONE_MEG,
                rights: Rights::READ | Rights::WRITE,
                kind: crate::region::RegionKind::Heap,
                map_directly: false,
                file_backing: None,
            })
            .expect("heap region must not overlap");

        top = page_align_up(heap_base + ONE_MEG);
        let stack_base = top;
        self.regions
            .insert(Region {
                base: stack_base,
                size: ONE_MEG,
                rights: Rights::READ | Rights::WRITE,
                kind: crate::region::RegionKind::Stack,
                map_directly: false,
                file_backing: None,
            })
            .expect("stack region must not overlap");

        stack_base + ONE_MEG - PAGE_SIZE
    }

    /// Releases every frame and swap slot this address space's page table
    /// references, then unmaps at the microkernel level. Called by
    /// `process_kill` (spec §4.6).
    pub fn destroy(&mut self, frames: &mut FrameTable, swap: &mut SwapFile, kernel: &mut dyn KernelOps) {
        let mapped: Vec<_> = self.pagetable.iter_mapped().collect();
        for (vaddr, pte) in mapped {
            match pte {
                Pte::Frame(frame, _) => {
                    kernel.unmap_page(self.space_id, vaddr);
                    frames.free(frame);
                }
                Pte::Swapped(slot) => {
                    swap.free(slot);
                }
                Pte::Unmapped => {}
            }
        }
    }
}

fn page_align_up(addr: u64) -> u64 {
    const PAGE_SIZE: u64 = crate::PAGE_SIZE as u64;
    let rem = addr % PAGE_SIZE;
    if rem == 0 {
        addr
    } else {
        addr + (PAGE_SIZE - rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::AllocReason;
    use crate::kernel_if::Rights;
    use crate::sim::SimKernel;

    #[test]
    fn destroy_releases_every_frame_and_slot() {
        let mut as_ = AddressSpace::new(SpaceId(1));
        let mut frames = FrameTable::new(4);
        let mut swap = crate::swap::SwapFile::new(4).unwrap();
        let mut kernel = SimKernel::new();

        let f = frames.alloc(AllocReason::ZeroFill).unwrap();
        *as_.pagetable.entry_mut(0x1000) = Pte::Frame(f, Rights::READ);
        let s = swap.alloc().unwrap();
        *as_.pagetable.entry_mut(0x2000) = Pte::Swapped(s);

        as_.destroy(&mut frames, &mut swap, &mut kernel);

        assert_eq!(frames.free_count(), 4);
        assert_eq!(swap.free_count(), 4);
    }

    #[test]
    fn stack_and_heap_do_not_overlap_existing_regions() {
        let mut as_ = AddressSpace::new(SpaceId(1));
        as_.regions
            .insert(Region {
                base: 0x400000,
                size: 0x1000,
                rights: Rights::READ | Rights::EXEC,
                kind: crate::region::RegionKind::Other,
                map_directly: false,
                file_backing: None,
            })
            .unwrap();
        let sp = as_.add_stack_and_heap();
        assert!(sp > 0x400000);
        assert_eq!(as_.regions.iter().count(), 3);
    }
}
