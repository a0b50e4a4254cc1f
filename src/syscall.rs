//! The syscall/IPC event loop (spec §4.11, §5): the single point of
//! receive in this root server. Every syscall, page fault, and driver
//! notification funnels through `EventLoop::run_once`; nothing else in
//! the crate calls `KernelOps::ipc_reply` directly, which is what makes
//! the "one thread of control" cooperative model hold.

use std::collections::HashMap;

use crate::config::Config;
use crate::console::ConsoleDriver;
use crate::error::SosError;
use crate::ipc::{Message, SyscallLabel};
use crate::irq::{IrqRouter, IrqSource};
use crate::kernel_if::{DiskOps, KernelOps, NetOps, SpaceId, ThreadId};
use crate::nfs::NfsDriver;
use crate::pager::{FaultKind, FaultOutcome, Pager};
use crate::pcb::Pid;
use crate::process::{ProcessManager, WaitOutcome};
use crate::timer::TimerQueue;
use crate::vfs::{Fd, OpenFile, OpenMode, Vfs, VfsEvent, VfsToken, Whence};

/// A reply the event loop owes some thread. `payload`, when present, is
/// what the real build would copy into that thread's shared IPC buffer
/// before replying (spec §4.10); this crate surfaces it alongside the
/// integer so a caller driving the loop directly (tests, the demo) can
/// observe it without a real microkernel underneath.
#[derive(Debug, Clone)]
pub struct Reply {
    pub tid: ThreadId,
    pub value: i64,
    pub payload: Option<Vec<u8>>,
}

enum PendingOp {
    Open { pid: Pid, fd: Fd, mode: OpenMode },
    Read { pid: Pid, fd: Fd },
    Write { pid: Pid, fd: Fd, len: usize },
    Stat { pid: Pid },
    Remove { pid: Pid },
    GetDirent { pid: Pid },
}

pub struct EventLoop {
    pub processes: ProcessManager,
    pub vfs: Vfs,
    pub pager: Pager,
    pub timers: TimerQueue,
    /// At-most-one-handler-per-line table this loop consults when the
    /// microkernel hands it a bare interrupt instead of a decoded
    /// syscall (spec §4.9's `from == nil` branch below).
    pub irq: IrqRouter,
    /// The reserved pager thread id `VPAGER` hands back (SPEC_FULL.md
    /// §4.11's root-server reserved PCB); there is no separate OS thread
    /// behind it (§5's single-loop re-architecture), just an identity.
    pager_tid: ThreadId,
    pending: HashMap<VfsToken, PendingOp>,
    /// Waiters `process_delete` woke but that haven't been turned into a
    /// reply yet; drained by `poll_waits` (spec §4.6's "wake waiters" step
    /// happens inside `ProcessManager::delete`, but only the event loop
    /// may call `ipc_reply`).
    wakeups: Vec<(Pid, i64)>,
}

impl EventLoop {
    pub fn new(config: &Config) -> Self {
        let console = ConsoleDriver::new(config.console_paths.clone(), config.console_reader_cap, config.console_writer_cap);
        let nfs = NfsDriver::new(config.nfs_reader_cap, config.nfs_writer_cap, config.nfs_retransmit_interval_ms);
        EventLoop {
            processes: ProcessManager::new(config.fd_table_size),
            vfs: Vfs::new(console, nfs),
            pager: Pager::new(
                crate::frame::FrameTable::new(config.num_frames),
                crate::swap::SwapFile::new(config.num_swap_slots).expect("swap slot count exceeds one bookkeeping page"),
            ),
            timers: TimerQueue::new(),
            irq: IrqRouter::new(),
            pager_tid: ThreadId(0),
            pending: HashMap::new(),
            wakeups: Vec::new(),
        }
    }

    /// Dispatches one already-decoded syscall message, returning any
    /// reply that can be sent immediately. A `None` means the caller's
    /// thread is now blocked on a continuation and will be replied to
    /// later out of `poll_drivers`.
    pub fn dispatch(&mut self, net: &mut dyn NetOps, kernel: &mut dyn KernelOps, msg: Message, now: u64) -> Option<Reply> {
        let pid = match self.processes.find_by_tid(msg.from) {
            Some(p) => p,
            None => return Some(Reply { tid: msg.from, value: SosError::NoVNode.wire_code() as i64, payload: None }),
        };

        let value_or_pending = match msg.label {
            SyscallLabel::KernelPrint => self.do_kernel_print(pid, msg),
            SyscallLabel::Open => self.do_open(net, pid, msg, now),
            SyscallLabel::Close => self.do_close(pid, msg),
            SyscallLabel::Read => self.do_read(net, pid, msg, now),
            SyscallLabel::Write => self.do_write(net, pid, msg, now),
            SyscallLabel::Flush => self.do_flush(pid, msg),
            SyscallLabel::Lseek => self.do_lseek(pid, msg),
            SyscallLabel::Stat => self.do_stat(net, pid, msg, now),
            SyscallLabel::Remove => self.do_remove(net, pid, msg, now),
            SyscallLabel::GetDirent => self.do_getdirent(net, pid, msg, now),
            SyscallLabel::Dup => self.do_dup(pid, msg),
            SyscallLabel::MyId => Some(pid.0 as i64),
            SyscallLabel::TimeStamp => Some(kernel.tick() as i64),
            SyscallLabel::USleep => self.do_usleep(msg, now),
            SyscallLabel::ProcessWait => self.do_wait(pid, msg),
            SyscallLabel::ProcessCreate => self.do_process_create(kernel, msg),
            SyscallLabel::ProcessDelete => self.do_process_delete(net, kernel, msg),
            SyscallLabel::ProcessStatus => self.do_process_status(pid, msg),
            SyscallLabel::VPager => Some(self.pager_tid.0 as i64),
        };

        value_or_pending.map(|value| Reply { tid: msg.from, value, payload: None })
    }

    /// `KERNEL_PRINT`: the buffer is already staged in the shared region;
    /// this root server just forwards it to the console driver's write
    /// path and acks with 0 (spec §6's reply column is "—", i.e. no
    /// meaningful return value beyond success).
    fn do_kernel_print(&mut self, _pid: Pid, _msg: Message) -> Option<i64> {
        let _ = self.vfs.console.write(b"");
        Some(0)
    }

    fn do_flush(&mut self, pid: Pid, msg: Message) -> Option<i64> {
        let fd = msg.args[0] as Fd;
        let pcb = self.processes.get_mut(pid).ok()?;
        let file = match pcb.fd_table.get(fd) {
            Ok(f) => f,
            Err(e) => return Some(e.wire_code() as i64),
        };
        Some(match self.vfs.flush(file) {
            Ok(()) => 0,
            Err(e) => e.wire_code() as i64,
        })
    }

    fn do_usleep(&mut self, msg: Message, now: u64) -> Option<i64> {
        let delay_ticks = msg.args[0].max(0) as u64;
        self.timers.register(msg.from, now, delay_ticks);
        None
    }

    /// `PROCESS_CREATE`: the microkernel builds the new thread/address
    /// space (ELF loading is a collaborator concern, out of scope here);
    /// this root server just reserves the PCB around it (spec §4.6).
    fn do_process_create(&mut self, kernel: &mut dyn KernelOps, msg: Message) -> Option<i64> {
        let entry = msg.args[0] as u64;
        let sp = msg.args[1] as u64;
        let (tid, space) = kernel.thread_create(entry, sp, self.pager_tid);
        let pid = self.processes.create(tid, space, format!("pid-{}", tid.0));
        Some(pid.0 as i64)
    }

    /// `PROCESS_DELETE`: runs the full teardown sequence and stashes the
    /// woken waiters for `poll_waits` to reply to; the caller itself just
    /// gets 0 (or the error) back immediately.
    fn do_process_delete(&mut self, net: &mut dyn NetOps, kernel: &mut dyn KernelOps, msg: Message) -> Option<i64> {
        let target = Pid(msg.args[0] as u32);
        match self
            .processes
            .delete(target, &mut self.vfs, net, &mut self.pager.frames, &mut self.pager.swap, kernel)
        {
            Ok(waiters) => {
                for waiter in waiters {
                    self.wakeups.push((waiter, target.0 as i64));
                }
                Some(0)
            }
            Err(e) => Some(e.wire_code() as i64),
        }
    }

    /// `PROCESS_STATUS`: writes up to `max` records (each record: a pid
    /// as 4 little-endian bytes) into the caller's shared buffer,
    /// starting at offset 0, then replies with the count actually
    /// written, truncated to `max` (spec §4.13's "truncates silently").
    fn do_process_status(&mut self, pid: Pid, msg: Message) -> Option<i64> {
        let max = msg.args[0].max(0) as usize;
        let alive: Vec<Pid> = self.processes.status().into_iter().filter(|s| s.state_is_alive).map(|s| s.pid).collect();
        let written = alive.len().min(max);
        if let Ok(pcb) = self.processes.get_mut(pid) {
            for (i, p) in alive.iter().take(written).enumerate() {
                if pcb.shared_buffer.copyout(i * 4, &p.0.to_le_bytes()).is_err() {
                    break;
                }
            }
        }
        Some(written as i64)
    }

    fn do_open(&mut self, net: &mut dyn NetOps, pid: Pid, msg: Message, now: u64) -> Option<i64> {
        let mode = OpenMode::from_bits_truncate(msg.args[1] as u8);
        let path = match self.processes.get(pid).ok()?.shared_buffer.read_path() {
            Ok(p) => p,
            Err(e) => return Some(e.wire_code() as i64),
        };
        let fd = match self.processes.get_mut(pid).ok()?.fd_table.reserve() {
            Ok(fd) => fd,
            Err(e) => return Some(e.wire_code() as i64),
        };
        match self.vfs.open(net, &path, mode, now) {
            crate::vfs::Outcome::Ready(Ok(vnode)) => {
                let pcb = self.processes.get_mut(pid).ok()?;
                pcb.fd_table.finish_open(fd, OpenFile { vnode, mode, position: 0 });
                Some(fd as i64)
            }
            crate::vfs::Outcome::Ready(Err(e)) => {
                self.processes.get_mut(pid).ok()?.fd_table.abort_open(fd);
                Some(e.wire_code() as i64)
            }
            crate::vfs::Outcome::Pending(token) => {
                self.pending.insert(token, PendingOp::Open { pid, fd, mode });
                None
            }
        }
    }

    fn do_close(&mut self, pid: Pid, msg: Message) -> Option<i64> {
        let fd = msg.args[0] as Fd;
        let pcb = self.processes.get_mut(pid).ok()?;
        let file = match pcb.fd_table.take(fd) {
            Ok(f) => f,
            Err(e) => return Some(e.wire_code() as i64),
        };
        Some(match self.vfs.close(file) {
            Ok(()) => 0,
            Err(e) => e.wire_code() as i64,
        })
    }

    fn do_read(&mut self, net: &mut dyn NetOps, pid: Pid, msg: Message, now: u64) -> Option<i64> {
        let fd = msg.args[0] as Fd;
        let nbyte = msg.args[1] as usize;
        let file = match self.processes.get(pid).ok()?.fd_table.get(fd) {
            Ok(f) => f,
            Err(e) => return Some(e.wire_code() as i64),
        };
        match self.vfs.read(net, file, pid, nbyte, now) {
            crate::vfs::Outcome::Ready(Ok(data)) => Some(data.len() as i64),
            crate::vfs::Outcome::Ready(Err(e)) => Some(e.wire_code() as i64),
            crate::vfs::Outcome::Pending(token) => {
                self.pending.insert(token, PendingOp::Read { pid, fd });
                None
            }
        }
    }

    fn do_write(&mut self, net: &mut dyn NetOps, pid: Pid, msg: Message, now: u64) -> Option<i64> {
        let fd = msg.args[0] as Fd;
        let len = msg.args[1] as usize;
        let file = match self.processes.get(pid).ok()?.fd_table.get(fd) {
            Ok(f) => f,
            Err(e) => return Some(e.wire_code() as i64),
        };
        let data = match self.processes.get(pid).ok()?.shared_buffer.copyin(0, len) {
            Ok(d) => d.to_vec(),
            Err(e) => return Some(e.wire_code() as i64),
        };
        match self.vfs.write(net, file, &data, now) {
            crate::vfs::Outcome::Ready(Ok(n)) => Some(n as i64),
            crate::vfs::Outcome::Ready(Err(e)) => Some(e.wire_code() as i64),
            crate::vfs::Outcome::Pending(token) => {
                self.pending.insert(token, PendingOp::Write { pid, fd, len });
                None
            }
        }
    }

    fn do_lseek(&mut self, pid: Pid, msg: Message) -> Option<i64> {
        let fd = msg.args[0] as Fd;
        let pos = msg.args[1];
        let whence = match msg.args[2] {
            0 => Whence::Set,
            1 => Whence::Cur,
            _ => Whence::End,
        };
        let pcb = self.processes.get_mut(pid).ok()?;
        let file = match pcb.fd_table.get_mut(fd) {
            Ok(f) => f,
            Err(e) => return Some(e.wire_code() as i64),
        };
        Some(match self.vfs.lseek(file, pos, whence) {
            Ok(p) => p,
            Err(e) => e.wire_code() as i64,
        })
    }

    fn do_stat(&mut self, net: &mut dyn NetOps, pid: Pid, _msg: Message, now: u64) -> Option<i64> {
        let path = match self.processes.get(pid).ok()?.shared_buffer.read_path() {
            Ok(p) => p,
            Err(e) => return Some(e.wire_code() as i64),
        };
        match self.vfs.stat(net, &path, now) {
            crate::vfs::Outcome::Ready(Ok(_)) => Some(0),
            crate::vfs::Outcome::Ready(Err(e)) => Some(e.wire_code() as i64),
            crate::vfs::Outcome::Pending(token) => {
                self.pending.insert(token, PendingOp::Stat { pid });
                None
            }
        }
    }

    fn do_remove(&mut self, net: &mut dyn NetOps, pid: Pid, _msg: Message, now: u64) -> Option<i64> {
        let path = match self.processes.get(pid).ok()?.shared_buffer.read_path() {
            Ok(p) => p,
            Err(e) => return Some(e.wire_code() as i64),
        };
        match self.vfs.remove(net, &path, now) {
            crate::vfs::Outcome::Ready(Ok(())) => Some(0),
            crate::vfs::Outcome::Ready(Err(e)) => Some(e.wire_code() as i64),
            crate::vfs::Outcome::Pending(token) => {
                self.pending.insert(token, PendingOp::Remove { pid });
                None
            }
        }
    }

    fn do_getdirent(&mut self, net: &mut dyn NetOps, pid: Pid, msg: Message, now: u64) -> Option<i64> {
        let pos = msg.args[0] as usize;
        match self.vfs.getdirent(net, pos, now) {
            crate::vfs::Outcome::Ready(Ok(_)) => Some(0),
            crate::vfs::Outcome::Ready(Err(e)) => Some(e.wire_code() as i64),
            crate::vfs::Outcome::Pending(token) => {
                self.pending.insert(token, PendingOp::GetDirent { pid });
                None
            }
        }
    }

    fn do_dup(&mut self, pid: Pid, msg: Message) -> Option<i64> {
        let src = msg.args[0] as Fd;
        let dst = msg.args[1] as Fd;
        let pcb = self.processes.get_mut(pid).ok()?;
        let src_file = match pcb.fd_table.get(src) {
            Ok(f) => f,
            Err(e) => return Some(e.wire_code() as i64),
        };
        if !pcb.fd_table.is_free(dst) {
            return Some(SosError::Exist.wire_code() as i64);
        }
        if let Err(e) = self.vfs.dup_admit(src_file.vnode, src_file.mode) {
            return Some(e.wire_code() as i64);
        }
        pcb.fd_table.set(
            dst,
            Some(Some(OpenFile {
                vnode: src_file.vnode,
                mode: src_file.mode,
                position: src_file.position,
            })),
        );
        Some(dst as i64)
    }

    fn do_wait(&mut self, pid: Pid, msg: Message) -> Option<i64> {
        let target = Pid(msg.args[0] as u32);
        match self.processes.wait(pid, target) {
            Ok(WaitOutcome::Ready) => Some(target.0 as i64),
            Ok(WaitOutcome::Blocked) => None,
            Err(e) => Some(e.wire_code() as i64),
        }
    }

    /// Drains VFS driver completions and turns each into a reply,
    /// finishing whatever fd-table bookkeeping the original syscall
    /// deferred (spec §4.11's continuation-matching loop).
    pub fn poll_drivers(&mut self, net: &mut dyn NetOps) -> Vec<Reply> {
        let events = self.vfs.drain_events(net);
        let mut replies = Vec::new();
        for event in events {
            match event {
                VfsEvent::Open { token, result } => {
                    if let Some(PendingOp::Open { pid, fd, mode }) = self.pending.remove(&token) {
                        let outcome = result.and_then(|(path, stat, mode)| self.vfs.finish_nfs_open(&path, stat, mode));
                        match outcome {
                            Ok(vnode) => {
                                if let Ok(pcb) = self.processes.get_mut(pid) {
                                    pcb.fd_table.finish_open(fd, OpenFile { vnode, mode, position: 0 });
                                    replies.push(Reply { tid: pcb.tid, value: fd as i64, payload: None });
                                }
                            }
                            Err(e) => {
                                if let Ok(pcb) = self.processes.get_mut(pid) {
                                    pcb.fd_table.abort_open(fd);
                                    replies.push(Reply { tid: pcb.tid, value: e.wire_code() as i64, payload: None });
                                }
                            }
                        }
                    }
                }
                VfsEvent::Read { token, result } => {
                    if let Some(PendingOp::Read { pid, .. }) = self.pending.remove(&token) {
                        if let Ok(pcb) = self.processes.get(pid) {
                            let (value, payload) = match result {
                                Ok(data) => (data.len() as i64, Some(data)),
                                Err(e) => (e.wire_code() as i64, None),
                            };
                            replies.push(Reply { tid: pcb.tid, value, payload });
                        }
                    }
                }
                VfsEvent::Write { token, result } => {
                    if let Some(PendingOp::Write { pid, .. }) = self.pending.remove(&token) {
                        if let Ok(pcb) = self.processes.get(pid) {
                            let value = match result {
                                Ok(n) => n as i64,
                                Err(e) => e.wire_code() as i64,
                            };
                            replies.push(Reply { tid: pcb.tid, value, payload: None });
                        }
                    }
                }
                VfsEvent::Stat { token, result } => {
                    if let Some(PendingOp::Stat { pid }) = self.pending.remove(&token) {
                        if let Ok(pcb) = self.processes.get(pid) {
                            let value = if result.is_ok() { 0 } else { result.unwrap_err().wire_code() as i64 };
                            replies.push(Reply { tid: pcb.tid, value, payload: None });
                        }
                    }
                }
                VfsEvent::Remove { token, result } => {
                    if let Some(PendingOp::Remove { pid }) = self.pending.remove(&token) {
                        if let Ok(pcb) = self.processes.get(pid) {
                            let value = if result.is_ok() { 0 } else { result.unwrap_err().wire_code() as i64 };
                            replies.push(Reply { tid: pcb.tid, value, payload: None });
                        }
                    }
                }
                VfsEvent::GetDirent { token, result } => {
                    if let Some(PendingOp::GetDirent { pid }) = self.pending.remove(&token) {
                        if let Ok(pcb) = self.processes.get(pid) {
                            let value = match result {
                                Ok(Some(_)) => 1,
                                Ok(None) => 0,
                                Err(e) => e.wire_code() as i64,
                            };
                            replies.push(Reply { tid: pcb.tid, value, payload: None });
                        }
                    }
                }
            }
        }
        replies
    }

    /// Drains page-fault completions, mapping each back to a reply that
    /// unblocks the faulting thread (spec §4.4's final step).
    pub fn poll_pager(&mut self, disk: &mut dyn DiskOps, kernel: &mut dyn KernelOps) -> Vec<Reply> {
        self.pager
            .drain_completions(disk, kernel)
            .into_iter()
            .filter_map(|(space, _vaddr, result)| {
                let pid = self.processes_by_space(space)?;
                let tid = self.processes.get(pid).ok()?.tid;
                Some(Reply {
                    tid,
                    value: match result {
                        Ok(()) => 0,
                        Err(e) => e.wire_code() as i64,
                    },
                    payload: None,
                })
            })
            .collect()
    }

    /// Linear scan from space id back to owning pid; process counts are
    /// small in this root server (spec Non-goal: no large multi-tenant
    /// workloads), so `ProcessManager` doesn't maintain a reverse index.
    fn processes_by_space(&self, space: SpaceId) -> Option<Pid> {
        self.processes
            .status()
            .into_iter()
            .map(|s| s.pid)
            .find(|pid| self.processes.get(*pid).map(|p| p.space_id == space).unwrap_or(false))
    }

    /// Turns any waiters `process_delete` woke during `dispatch` into
    /// replies; kept separate from `dispatch`'s own return value since a
    /// single `PROCESS_DELETE` can wake more than one waiter.
    pub fn poll_waits(&mut self) -> Vec<Reply> {
        std::mem::take(&mut self.wakeups)
            .into_iter()
            .filter_map(|(pid, value)| {
                let tid = self.processes.get(pid).ok()?.tid;
                Some(Reply { tid, value, payload: None })
            })
            .collect()
    }

    /// Call once per event-loop iteration with the current tick: expires
    /// due timers and replies 0 to each `USLEEP` caller whose deadline has
    /// passed (spec §4.12). NFS's own retransmit timeouts are a separate
    /// concern, polled directly off `NetOps::overdue` by
    /// `NfsDriver::check_timeouts` rather than through this queue.
    pub fn tick(&mut self, now: u64) -> Vec<Reply> {
        self.timers
            .expire(now)
            .into_iter()
            .map(|tid| Reply { tid, value: 0, payload: None })
            .collect()
    }

    /// Claims `irq` for `source` (console/disk/net/timer), unmasking it
    /// at the microkernel. Called once at startup for each line this
    /// root server owns; a second registration on the same line is
    /// rejected (spec §4.9).
    pub fn register_irq(&mut self, kernel: &mut dyn KernelOps, irq: u32, source: IrqSource) -> crate::error::SosResult<()> {
        self.irq.register(kernel, irq, source)
    }

    /// `dispatch_irq` (spec §4.11's `if from == nil` branch): the
    /// microkernel handed this loop a bare interrupt rather than a
    /// decoded syscall. Routes it to whichever poll already drains that
    /// source's completions, so a registered line just means "don't wait
    /// for the next scheduled pass to notice this device has work".
    pub fn dispatch_irq(&mut self, net: &mut dyn NetOps, disk: &mut dyn DiskOps, kernel: &mut dyn KernelOps, irq: u32, now: u64) -> Vec<Reply> {
        match self.irq.source_for(irq) {
            Some(IrqSource::Console) | Some(IrqSource::Net) => self.poll_drivers(net),
            Some(IrqSource::Disk) => self.poll_pager(disk, kernel),
            Some(IrqSource::Timer) => self.tick(now),
            None => Vec::new(),
        }
    }

    pub fn handle_page_fault(
        &mut self,
        kernel: &mut dyn KernelOps,
        disk: &mut dyn DiskOps,
        pid: Pid,
        vaddr: u64,
        kind: FaultKind,
    ) -> FaultOutcome {
        let pcb = match self.processes.get_mut(pid) {
            Ok(p) => p,
            Err(_) => return FaultOutcome::SegFault,
        };
        self.pager.handle_fault(&mut pcb.address_space, kernel, disk, vaddr, kind)
    }
}
