//! The demand-pager fault handler (spec §4.4) and replacement policy
//! (§4.5). A fault either resolves synchronously (already mapped,
//! zero-fill with a free frame to hand) or hands back a `DiskToken` the
//! caller must wait on while a swap-in or swap-out round-trips.

use crate::addrspace::AddressSpace;
use crate::error::SosError;
use crate::frame::{AllocReason, FrameNo, FrameTable};
use crate::kernel_if::{DiskCompletion, DiskOps, DiskToken, KernelOps, PhysDesc, Rights, SpaceId, VAddr};
use crate::pagetable::Pte;
use crate::swap::{SlotNo, SwapFile};
use crate::PAGE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Read,
    Write,
    Exec,
}

impl FaultKind {
    fn required(self) -> Rights {
        match self {
            FaultKind::Read => Rights::READ,
            FaultKind::Write => Rights::WRITE,
            FaultKind::Exec => Rights::EXEC,
        }
    }
}

pub enum FaultOutcome {
    /// The fault was resolved with no I/O needed.
    Resolved,
    /// A disk I/O round-trip is in flight; the token will show up later
    /// out of `Pager::drain_completions`.
    Pending(DiskToken),
    /// Access outside any region, or a rights mismatch: segfault (spec
    /// §4.4 steps 1-2, §4.6: the process manager kills the faulting
    /// process on this result).
    SegFault,
}

/// Two-phase continuation for a fault that needed the replacement
/// policy: first the victim is written to swap (if dirty/never-backed),
/// then the faulting page is brought in (or zero-filled).
enum Stage {
    /// Waiting on the victim's swap-out write to complete before the new
    /// page can take its frame.
    AwaitingEvict {
        victim_frame: FrameNo,
        slot: SlotNo,
        space: SpaceId,
        vaddr: VAddr,
        rights: Rights,
        bring_in: BringIn,
    },
    /// Waiting on the swap-in read of the faulting page's own slot.
    AwaitingSwapIn {
        frame: FrameNo,
        space: SpaceId,
        vaddr: VAddr,
        rights: Rights,
    },
}

enum BringIn {
    ZeroFill,
    Swapped(SlotNo),
}

pub struct Pager {
    pub frames: FrameTable,
    pub swap: SwapFile,
    pending: std::collections::HashMap<DiskToken, Stage>,
}

impl Pager {
    pub fn new(frames: FrameTable, swap: SwapFile) -> Self {
        Pager {
            frames,
            swap,
            pending: std::collections::HashMap::new(),
        }
    }

    /// Entry point for a page fault IPC (spec §4.4). `kernel`/`disk` are
    /// the port-boundary collaborators; `addrspace` is the faulting
    /// process's own address space.
    pub fn handle_fault(
        &mut self,
        addrspace: &mut AddressSpace,
        kernel: &mut dyn KernelOps,
        disk: &mut dyn DiskOps,
        vaddr: VAddr,
        kind: FaultKind,
    ) -> FaultOutcome {
        let page_vaddr = vaddr - (vaddr % PAGE_SIZE as u64);
        let region = match addrspace.regions.find(vaddr) {
            Some(r) => r,
            None => return FaultOutcome::SegFault,
        };
        if !region.rights.contains(kind.required()) {
            return FaultOutcome::SegFault;
        }
        let rights = region.rights;

        match addrspace.pagetable.peek(page_vaddr) {
            Pte::Frame(_, _) => FaultOutcome::Resolved,
            Pte::Swapped(slot) => self.fault_swapped(addrspace.space_id, page_vaddr, rights, slot, kernel, disk),
            Pte::Unmapped => self.fault_unmapped(addrspace, page_vaddr, rights, kernel, disk),
        }
    }

    fn fault_unmapped(
        &mut self,
        addrspace: &mut AddressSpace,
        page_vaddr: VAddr,
        rights: Rights,
        kernel: &mut dyn KernelOps,
        disk: &mut dyn DiskOps,
    ) -> FaultOutcome {
        match self.frames.alloc(AllocReason::ZeroFill) {
            Some(frame) => {
                self.frames.set_owner(frame, (addrspace.space_id, page_vaddr));
                *addrspace.pagetable.entry_mut(page_vaddr) = Pte::Frame(frame, rights);
                kernel.map_page(addrspace.space_id, page_vaddr, PhysDesc(frame.0 as u64), rights);
                FaultOutcome::Resolved
            }
            None => self.evict_then(addrspace.space_id, page_vaddr, rights, BringIn::ZeroFill, kernel, disk),
        }
    }

    fn fault_swapped(
        &mut self,
        space: SpaceId,
        page_vaddr: VAddr,
        rights: Rights,
        slot: SlotNo,
        kernel: &mut dyn KernelOps,
        disk: &mut dyn DiskOps,
    ) -> FaultOutcome {
        match self.frames.alloc(AllocReason::SwapIn) {
            Some(frame) => {
                let token = disk.submit_read(slot.0);
                self.pending.insert(
                    token,
                    Stage::AwaitingSwapIn {
                        frame,
                        space,
                        vaddr: page_vaddr,
                        rights,
                    },
                );
                let _ = kernel.tick();
                FaultOutcome::Pending(token)
            }
            None => self.evict_then(space, page_vaddr, rights, BringIn::Swapped(slot), kernel, disk),
        }
    }

    /// Replacement policy (§4.5): pick a victim via the clock hand, write
    /// it out to a fresh swap slot (allocating one if the victim had
    /// none yet), and stash what the faulting page needs once that
    /// write completes.
    fn evict_then(
        &mut self,
        space: SpaceId,
        page_vaddr: VAddr,
        rights: Rights,
        bring_in: BringIn,
        kernel: &mut dyn KernelOps,
        disk: &mut dyn DiskOps,
    ) -> FaultOutcome {
        let victim = match self.frames.next_victim(kernel) {
            Some(f) => f,
            None => return FaultOutcome::SegFault, // no evictable frame: treated as resource exhaustion upstream
        };
        let slot = match self.swap.alloc() {
            Some(s) => s,
            None => return FaultOutcome::SegFault,
        };
        self.frames.pin(victim);
        let data = [0u8; PAGE_SIZE]; // the real build reads the victim's physical contents here
        let token = disk.submit_write(slot.0, data);
        self.pending.insert(
            token,
            Stage::AwaitingEvict {
                victim_frame: victim,
                slot,
                space,
                vaddr: page_vaddr,
                rights,
                bring_in,
            },
        );
        FaultOutcome::Pending(token)
    }

    /// Call once per event-loop iteration to advance any in-flight
    /// fault. Returns the faults that finished resolving this round,
    /// paired with the address space that should install the mapping.
    pub fn drain_completions(
        &mut self,
        disk: &mut dyn DiskOps,
        kernel: &mut dyn KernelOps,
    ) -> Vec<(SpaceId, VAddr, Result<(), SosError>)> {
        let mut done = Vec::new();
        for (token, completion) in disk.poll_completions() {
            let Some(stage) = self.pending.remove(&token) else {
                continue;
            };
            match stage {
                Stage::AwaitingEvict {
                    victim_frame,
                    slot,
                    space,
                    vaddr,
                    rights,
                    bring_in,
                } => {
                    self.frames.unpin(victim_frame);
                    if matches!(completion, DiskCompletion::Err) {
                        self.swap.free(slot);
                        done.push((space, vaddr, Err(SosError::NoMem)));
                        continue;
                    }
                    self.frames.free(victim_frame);
                    match bring_in {
                        BringIn::ZeroFill => match self.frames.alloc(AllocReason::ZeroFill) {
                            Some(frame) => {
                                self.frames.set_owner(frame, (space, vaddr));
                                kernel.map_page(space, vaddr, PhysDesc(frame.0 as u64), rights);
                                done.push((space, vaddr, Ok(())));
                            }
                            None => done.push((space, vaddr, Err(SosError::NoMem))),
                        },
                        BringIn::Swapped(swap_slot) => match self.frames.alloc(AllocReason::SwapIn) {
                            Some(frame) => {
                                let read_token = disk.submit_read(swap_slot.0);
                                self.pending.insert(
                                    read_token,
                                    Stage::AwaitingSwapIn {
                                        frame,
                                        space,
                                        vaddr,
                                        rights,
                                    },
                                );
                            }
                            None => done.push((space, vaddr, Err(SosError::NoMem))),
                        },
                    }
                }
                Stage::AwaitingSwapIn { frame, space, vaddr, rights } => {
                    self.frames.set_owner(frame, (space, vaddr));
                    kernel.map_page(space, vaddr, PhysDesc(frame.0 as u64), rights);
                    done.push((space, vaddr, Ok(())));
                }
            }
        }
        done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::{Region, RegionKind};
    use crate::sim::{SimDisk, SimKernel};

    fn pager(frames: u32, slots: u32) -> Pager {
        Pager::new(FrameTable::new(frames), SwapFile::new(slots).unwrap())
    }

    #[test]
    fn fault_outside_every_region_is_segfault() {
        let mut p = pager(4, 4);
        let mut asp = AddressSpace::new(SpaceId(1));
        let mut kernel = SimKernel::new();
        let mut disk = SimDisk::new();
        match p.handle_fault(&mut asp, &mut kernel, &mut disk, 0x9000, FaultKind::Read) {
            FaultOutcome::SegFault => {}
            _ => panic!("expected segfault"),
        }
    }

    #[test]
    fn write_fault_on_read_only_region_is_segfault() {
        let mut p = pager(4, 4);
        let mut asp = AddressSpace::new(SpaceId(1));
        asp.regions
            .insert(Region {
                base: 0x1000,
                size: 0x1000,
                rights: Rights::READ,
                kind: RegionKind::Other,
                map_directly: false,
                file_backing: None,
            })
            .unwrap();
        let mut kernel = SimKernel::new();
        let mut disk = SimDisk::new();
        match p.handle_fault(&mut asp, &mut kernel, &mut disk, 0x1000, FaultKind::Write) {
            FaultOutcome::SegFault => {}
            _ => panic!("expected segfault"),
        }
    }

    #[test]
    fn zero_fill_fault_resolves_immediately_with_a_free_frame() {
        let mut p = pager(4, 4);
        let mut asp = AddressSpace::new(SpaceId(1));
        asp.regions
            .insert(Region {
                base: 0x1000,
                size: 0x1000,
                rights: Rights::READ | Rights::WRITE,
                kind: RegionKind::Heap,
                map_directly: false,
                file_backing: None,
            })
            .unwrap();
        let mut kernel = SimKernel::new();
        let mut disk = SimDisk::new();
        match p.handle_fault(&mut asp, &mut kernel, &mut disk, 0x1000, FaultKind::Write) {
            FaultOutcome::Resolved => {}
            _ => panic!("expected immediate resolution"),
        }
        assert!(kernel.is_mapped(SpaceId(1), 0x1000));
    }

    #[test]
    fn fault_under_frame_pressure_evicts_and_completes_async() {
        let mut p = pager(1, 4);
        let mut asp = AddressSpace::new(SpaceId(1));
        asp.regions
            .insert(Region {
                base: 0,
                size: 0x4000,
                rights: Rights::READ | Rights::WRITE,
                kind: RegionKind::Heap,
                map_directly: false,
                file_backing: None,
            })
            .unwrap();
        let mut kernel = SimKernel::new();
        let mut disk = SimDisk::new();

        // First fault consumes the single frame.
        p.handle_fault(&mut asp, &mut kernel, &mut disk, 0x0, FaultKind::Write);
        assert_eq!(p.frames.free_count(), 0);

        // Second fault must evict; the eviction write completes
        // synchronously in SimDisk, so draining resolves it in one pass.
        let outcome = p.handle_fault(&mut asp, &mut kernel, &mut disk, 0x1000, FaultKind::Write);
        assert!(matches!(outcome, FaultOutcome::Pending(_)));
        let done = p.drain_completions(&mut disk, &mut kernel);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].0, SpaceId(1));
        assert!(done[0].2.is_ok());
    }
}
