//! Process lifecycle (spec §4.6): PCB table, creation, the
//! `process_delete` teardown sequence, and the wait queues `process_wait`
//! blocks on.

use std::collections::HashMap;

use crate::addrspace::AddressSpace;
use crate::error::{SosError, SosResult};
use crate::frame::FrameTable;
use crate::kernel_if::{KernelOps, SpaceId, ThreadId};
use crate::pcb::{Pcb, Pid, ProcessState};
use crate::swap::SwapFile;
use crate::vfs::Vfs;

pub struct ProcessManager {
    procs: HashMap<Pid, Pcb>,
    next_pid: u32,
    fd_table_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub pid: Pid,
    pub state_is_alive: bool,
}

impl ProcessManager {
    pub fn new(fd_table_size: usize) -> Self {
        ProcessManager {
            procs: HashMap::new(),
            next_pid: 1,
            fd_table_size,
        }
    }

    /// `process_create` (spec §4.6): reserves a PCB in `Start` state
    /// around a thread/address space the microkernel has already built.
    pub fn create(&mut self, tid: ThreadId, space_id: SpaceId, name: String) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        let mut pcb = Pcb::new(pid, tid, space_id, name, AddressSpace::new(space_id), self.fd_table_size);
        pcb.state = ProcessState::Alive;
        self.procs.insert(pid, pcb);
        pid
    }

    pub fn get(&self, pid: Pid) -> SosResult<&Pcb> {
        self.procs.get(&pid).ok_or(SosError::NoVNode)
    }

    pub fn get_mut(&mut self, pid: Pid) -> SosResult<&mut Pcb> {
        self.procs.get_mut(&pid).ok_or(SosError::NoVNode)
    }

    pub fn find_by_tid(&self, tid: ThreadId) -> Option<Pid> {
        self.procs.iter().find(|(_, p)| p.tid == tid).map(|(pid, _)| *pid)
    }

    pub fn status(&self) -> Vec<ProcessStatus> {
        self.procs
            .values()
            .map(|p| ProcessStatus {
                pid: p.pid,
                state_is_alive: matches!(p.state, ProcessState::Alive | ProcessState::Start),
            })
            .collect()
    }

    /// `process_wait`: if the target is already a zombie, returns
    /// immediately; otherwise registers the caller on its wait list
    /// (spec §4.6's "wake waiters" step of teardown resolves these).
    pub fn wait(&mut self, waiter: Pid, target: Pid) -> SosResult<WaitOutcome> {
        let proc = self.procs.get_mut(&target).ok_or(SosError::NoVNode)?;
        if proc.is_zombie() {
            Ok(WaitOutcome::Ready)
        } else {
            proc.wait_list.push(waiter);
            Ok(WaitOutcome::Blocked)
        }
    }

    /// `process_delete` teardown (spec §4.6, open question resolved in
    /// SPEC_FULL.md): mark zombie, close every fd through the VFS, tear
    /// down the address space (releasing frames/slots), wake every
    /// waiter, remove the thread at the microkernel level, then drop
    /// the PCB. Returns the pids that were waiting and should now be
    /// woken by the event loop.
    pub fn delete(
        &mut self,
        pid: Pid,
        vfs: &mut Vfs,
        net: &mut dyn crate::kernel_if::NetOps,
        frames: &mut FrameTable,
        swap: &mut SwapFile,
        kernel: &mut dyn KernelOps,
    ) -> SosResult<Vec<Pid>> {
        let mut pcb = self.procs.remove(&pid).ok_or(SosError::NoVNode)?;
        pcb.state = ProcessState::Zombie;

        for fd in 0..pcb.fd_table.capacity() as u32 {
            if let Ok(file) = pcb.fd_table.take(fd) {
                let _ = vfs.close(file);
            }
        }
        let _ = net;

        pcb.address_space.destroy(frames, swap, kernel);

        let waiters = std::mem::take(&mut pcb.wait_list);

        kernel.thread_destroy(pcb.tid, pcb.space_id);

        pcb.state = ProcessState::Dead;
        Ok(waiters)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Blocked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::ConsoleDriver;
    use crate::nfs::NfsDriver;
    use crate::sim::SimKernel;

    #[test]
    fn wait_on_non_zombie_blocks_and_zombie_is_ready() {
        let mut pm = ProcessManager::new(32);
        let target = pm.create(ThreadId(1), SpaceId(1), "a".into());
        let waiter = pm.create(ThreadId(2), SpaceId(2), "b".into());
        assert_eq!(pm.wait(waiter, target).unwrap(), WaitOutcome::Blocked);

        let mut vfs = Vfs::new(ConsoleDriver::new(vec!["console".into()], 1, 1), NfsDriver::new(2, 2, 5000));
        let mut frames = FrameTable::new(4);
        let mut swap = SwapFile::new(4).unwrap();
        let mut kernel = SimKernel::new();
        struct NoNet;
        impl crate::kernel_if::NetOps for NoNet {
            fn submit_rpc(&mut self, _: crate::kernel_if::NfsOpKind, _: Vec<u8>) -> crate::kernel_if::NetToken {
                crate::kernel_if::NetToken(0)
            }
            fn poll_completions(&mut self) -> Vec<(crate::kernel_if::NetToken, crate::kernel_if::NetCompletion)> {
                Vec::new()
            }
            fn overdue(&mut self, _: u64, _: u64) -> Vec<crate::kernel_if::NetToken> {
                Vec::new()
            }
            fn resend(&mut self, _: crate::kernel_if::NetToken) {}
        }
        let mut net = NoNet;
        let woken = pm.delete(target, &mut vfs, &mut net, &mut frames, &mut swap, &mut kernel).unwrap();
        assert_eq!(woken, vec![waiter]);
        assert!(pm.get(target).is_err());
    }

    #[test]
    fn delete_of_unknown_pid_is_novnode() {
        let mut pm = ProcessManager::new(32);
        let mut vfs = Vfs::new(ConsoleDriver::new(vec!["console".into()], 1, 1), NfsDriver::new(2, 2, 5000));
        let mut frames = FrameTable::new(4);
        let mut swap = SwapFile::new(4).unwrap();
        let mut kernel = SimKernel::new();
        struct NoNet;
        impl crate::kernel_if::NetOps for NoNet {
            fn submit_rpc(&mut self, _: crate::kernel_if::NfsOpKind, _: Vec<u8>) -> crate::kernel_if::NetToken {
                crate::kernel_if::NetToken(0)
            }
            fn poll_completions(&mut self) -> Vec<(crate::kernel_if::NetToken, crate::kernel_if::NetCompletion)> {
                Vec::new()
            }
            fn overdue(&mut self, _: u64, _: u64) -> Vec<crate::kernel_if::NetToken> {
                Vec::new()
            }
            fn resend(&mut self, _: crate::kernel_if::NetToken) {}
        }
        let mut net = NoNet;
        assert_eq!(
            pm.delete(Pid(999), &mut vfs, &mut net, &mut frames, &mut swap, &mut kernel).unwrap_err(),
            SosError::NoVNode
        );
    }
}
