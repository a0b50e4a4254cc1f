//! The VFS layer (spec §4.7): v-node table, per-process fd tables, and the
//! open/close/read/write/flush/lseek/stat/getdirent/remove dispatcher.
//! V-nodes are interned by path and ref-counted by `readers + writers`
//! (spec §3, §9's "longest holder" ownership model).

use std::collections::HashMap;

use crate::console::ConsoleDriver;
use crate::error::{SosError, SosResult};
use crate::nfs::NfsDriver;
use crate::pcb::Pid;
use crate::stat::Stat;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        const READ = 0b01;
        const WRITE = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VNodeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    Console,
    Nfs,
}

/// The outstanding-request token a driver hands back when an operation
/// cannot complete synchronously (Design Notes: continuation record
/// stored in an outstanding-request table, matched by tag on reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VfsToken(pub u64);

/// A VFS operation either completes synchronously or hands back a token
/// the caller must wait on; the matching `VfsEvent` arrives later out of
/// `Vfs::drain_events`.
pub enum Outcome<T> {
    Ready(SosResult<T>),
    Pending(VfsToken),
}

pub struct VNode {
    pub path: String,
    pub driver: DriverKind,
    pub stat: Stat,
    pub readers: u32,
    pub writers: u32,
    pub reader_cap: u32,
    pub writer_cap: u32,
}

impl VNode {
    /// Invariant (spec §3, §8): readers <= reader_cap, writers <= writer_cap.
    fn admit(&mut self, mode: OpenMode) -> SosResult<()> {
        if mode.contains(OpenMode::READ) && self.readers >= self.reader_cap {
            return Err(SosError::ReadFull);
        }
        if mode.contains(OpenMode::WRITE) && self.writers >= self.writer_cap {
            return Err(SosError::WriteFull);
        }
        if mode.contains(OpenMode::READ) {
            self.readers += 1;
        }
        if mode.contains(OpenMode::WRITE) {
            self.writers += 1;
        }
        Ok(())
    }

    fn release(&mut self, mode: OpenMode) {
        if mode.contains(OpenMode::READ) {
            self.readers = self.readers.saturating_sub(1);
        }
        if mode.contains(OpenMode::WRITE) {
            self.writers = self.writers.saturating_sub(1);
        }
    }

    fn refcount(&self) -> u32 {
        self.readers + self.writers
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OpenFile {
    pub vnode: VNodeId,
    pub mode: OpenMode,
    pub position: i64,
}

pub type Fd = u32;

/// Per-process open-file table (spec §3). A reserved-but-not-yet-ready
/// slot (an NFS open still in flight) is `Some(None)`; `Some(Some(..))`
/// once ready; `None` if free.
pub struct FdTable {
    slots: Vec<Option<Option<OpenFile>>>,
}

impl FdTable {
    pub fn new(capacity: usize) -> Self {
        FdTable {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reserves the lowest free slot, returning it still "opening".
    /// Boundary case (spec §8): the 33rd fd in a 32-slot table -> NOMORE.
    pub fn reserve(&mut self) -> SosResult<Fd> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(None);
                return Ok(i as Fd);
            }
        }
        Err(SosError::NoMore)
    }

    pub fn finish_open(&mut self, fd: Fd, file: OpenFile) {
        self.slots[fd as usize] = Some(Some(file));
    }

    pub fn abort_open(&mut self, fd: Fd) {
        self.slots[fd as usize] = None;
    }

    pub fn get(&self, fd: Fd) -> SosResult<OpenFile> {
        match self.slots.get(fd as usize) {
            Some(Some(Some(f))) => Ok(*f),
            _ => Err(SosError::NoFile),
        }
    }

    pub fn get_mut(&mut self, fd: Fd) -> SosResult<&mut OpenFile> {
        match self.slots.get_mut(fd as usize) {
            Some(Some(Some(f))) => Ok(f),
            _ => Err(SosError::NoFile),
        }
    }

    /// Double-close is an error, not a no-op (spec §8).
    pub fn take(&mut self, fd: Fd) -> SosResult<OpenFile> {
        match self.slots.get_mut(fd as usize) {
            Some(slot @ Some(Some(_))) => {
                let file = slot.take().unwrap().unwrap();
                *self.slots.get_mut(fd as usize).unwrap() = None;
                Ok(file)
            }
            _ => Err(SosError::NoFile),
        }
    }

    pub fn set(&mut self, fd: Fd, file: Option<Option<OpenFile>>) {
        if (fd as usize) < self.slots.len() {
            self.slots[fd as usize] = file;
        }
    }

    pub fn is_free(&self, fd: Fd) -> bool {
        matches!(self.slots.get(fd as usize), Some(None) | None)
    }
}

/// A completed asynchronous VFS operation, matched by the token the
/// original call returned (Design Notes continuation pattern).
pub enum VfsEvent {
    Open {
        token: VfsToken,
        result: SosResult<(String, Stat, OpenMode)>,
    },
    Read { token: VfsToken, result: SosResult<Vec<u8>> },
    Write { token: VfsToken, result: SosResult<usize> },
    Stat { token: VfsToken, result: SosResult<Stat> },
    Remove { token: VfsToken, result: SosResult<()> },
    GetDirent { token: VfsToken, result: SosResult<Option<crate::nfs::DirEntry>> },
}

pub struct Vfs {
    nodes: HashMap<VNodeId, VNode>,
    path_index: HashMap<String, VNodeId, ahash::RandomState>,
    next_id: u32,
    pub console: ConsoleDriver,
    pub nfs: NfsDriver,
    next_token: u64,
}

impl Vfs {
    pub fn new(console: ConsoleDriver, nfs: NfsDriver) -> Self {
        Vfs {
            nodes: HashMap::new(),
            path_index: HashMap::default(),
            next_id: 0,
            console,
            nfs,
            next_token: 0,
        }
    }

    fn mint_token(&mut self) -> VfsToken {
        let t = self.next_token;
        self.next_token += 1;
        VfsToken(t)
    }

    fn driver_kind_for(&self, path: &str) -> DriverKind {
        if self.console.owns(path) {
            DriverKind::Console
        } else {
            DriverKind::Nfs
        }
    }

    fn intern(&mut self, path: &str, driver: DriverKind, stat: Stat, reader_cap: u32, writer_cap: u32) -> VNodeId {
        if let Some(id) = self.path_index.get(path) {
            return *id;
        }
        let id = VNodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            VNode {
                path: path.to_string(),
                driver,
                stat,
                readers: 0,
                writers: 0,
                reader_cap,
                writer_cap,
            },
        );
        self.path_index.insert(path.to_string(), id);
        id
    }

    fn maybe_destroy(&mut self, id: VNodeId) {
        if let Some(node) = self.nodes.get(&id) {
            if node.refcount() == 0 {
                self.path_index.remove(&node.path);
                self.nodes.remove(&id);
            }
        }
    }

    /// `open`: finds or creates the v-node, admits the caller against the
    /// reader/writer caps, and either completes immediately (console) or
    /// returns a token (NFS lookup/create in flight).
    pub fn open(&mut self, net: &mut dyn crate::kernel_if::NetOps, path: &str, mode: OpenMode, now_ms: u64) -> Outcome<VNodeId> {
        if path.is_empty() || path.len() > crate::buffer::MAX_PATH {
            return Outcome::Ready(Err(SosError::PathInv));
        }
        match self.driver_kind_for(path) {
            DriverKind::Console => {
                let stat = self.console.stat(path, now_ms);
                let cap = self.console.caps();
                let id = self.intern(path, DriverKind::Console, stat, cap.0, cap.1);
                let node = self.nodes.get_mut(&id).unwrap();
                match node.admit(mode) {
                    Ok(()) => Outcome::Ready(Ok(id)),
                    Err(e) => Outcome::Ready(Err(e)),
                }
            }
            DriverKind::Nfs => {
                let token = self.mint_token();
                self.nfs.begin_open(net, token, path.to_string(), mode, now_ms);
                Outcome::Pending(token)
            }
        }
    }

    /// Called by the event loop once an NFS open RPC round-trips,
    /// performing the same admission check `open` does for console paths.
    pub fn finish_nfs_open(&mut self, path: &str, stat: Stat, mode: OpenMode) -> SosResult<VNodeId> {
        let id = self.intern(path, DriverKind::Nfs, stat, self.nfs.reader_cap(), self.nfs.writer_cap());
        let node = self.nodes.get_mut(&id).unwrap();
        node.admit(mode)
    }

    pub fn close(&mut self, file: OpenFile) -> SosResult<()> {
        let node = self.nodes.get_mut(&file.vnode).ok_or(SosError::CorVNode)?;
        node.release(file.mode);
        let destroy = node.refcount() == 0;
        if destroy {
            match self.nodes.get(&file.vnode).unwrap().driver {
                DriverKind::Console => self.console.close(&self.nodes.get(&file.vnode).unwrap().path),
                DriverKind::Nfs => {}
            }
            self.maybe_destroy(file.vnode);
        }
        Ok(())
    }

    pub fn read(&mut self, net: &mut dyn crate::kernel_if::NetOps, file: OpenFile, pid: Pid, nbyte: usize, now: u64) -> Outcome<Vec<u8>> {
        let node = match self.nodes.get(&file.vnode) {
            Some(n) => n,
            None => return Outcome::Ready(Err(SosError::CorVNode)),
        };
        if !file.mode.contains(OpenMode::READ) {
            return Outcome::Ready(Err(SosError::Perm));
        }
        match node.driver {
            DriverKind::Console => {
                let token = self.mint_token();
                match self.console.begin_read(pid, token, nbyte) {
                    Ok(()) => Outcome::Pending(token),
                    Err(e) => Outcome::Ready(Err(e)),
                }
            }
            DriverKind::Nfs => {
                let token = self.mint_token();
                self.nfs.begin_read(net, token, node.path.clone(), file.position as u64, nbyte, now);
                Outcome::Pending(token)
            }
        }
    }

    pub fn write(&mut self, net: &mut dyn crate::kernel_if::NetOps, file: OpenFile, data: &[u8], now: u64) -> Outcome<usize> {
        let node = match self.nodes.get(&file.vnode) {
            Some(n) => n,
            None => return Outcome::Ready(Err(SosError::CorVNode)),
        };
        if !file.mode.contains(OpenMode::WRITE) {
            return Outcome::Ready(Err(SosError::Perm));
        }
        match node.driver {
            DriverKind::Console => Outcome::Ready(Ok(self.console.write(data))),
            DriverKind::Nfs => {
                let token = self.mint_token();
                self.nfs
                    .begin_write(net, token, node.path.clone(), file.position as u64, data.to_vec(), now);
                Outcome::Pending(token)
            }
        }
    }

    pub fn flush(&mut self, file: OpenFile) -> SosResult<()> {
        match self.nodes.get(&file.vnode).map(|n| n.driver) {
            Some(DriverKind::Console) => {
                self.console.flush();
                Ok(())
            }
            Some(DriverKind::Nfs) => Ok(()),
            None => Err(SosError::CorVNode),
        }
    }

    /// `lseek`: `whence = END` computes `size - pos`, deliberately the
    /// inverse of the usual Unix convention (spec §4.7, §9: preserved
    /// exactly rather than "fixed").
    pub fn lseek(&self, file: &mut OpenFile, pos: i64, whence: Whence) -> SosResult<i64> {
        let size = self
            .nodes
            .get(&file.vnode)
            .ok_or(SosError::CorVNode)?
            .stat
            .st_size as i64;
        let new_pos = match whence {
            Whence::Set => pos,
            Whence::Cur => file.position + pos,
            Whence::End => size - pos,
        };
        if new_pos < 0 {
            return Err(SosError::Error);
        }
        file.position = new_pos;
        Ok(new_pos)
    }

    pub fn stat(&mut self, net: &mut dyn crate::kernel_if::NetOps, path: &str, now: u64) -> Outcome<Stat> {
        if self.console.owns(path) {
            return Outcome::Ready(Ok(self.console.stat(path, 0)));
        }
        let token = self.mint_token();
        self.nfs.begin_stat(net, token, path.to_string(), now);
        Outcome::Pending(token)
    }

    pub fn remove(&mut self, net: &mut dyn crate::kernel_if::NetOps, path: &str, now: u64) -> Outcome<()> {
        if let Some(id) = self.path_index.get(path) {
            if self.nodes.get(id).map(|n| n.refcount() > 0).unwrap_or(false) {
                return Outcome::Ready(Err(SosError::Open));
            }
        }
        if self.console.owns(path) {
            return Outcome::Ready(Err(SosError::NotImp));
        }
        let token = self.mint_token();
        self.nfs.begin_remove(net, token, path.to_string(), now);
        Outcome::Pending(token)
    }

    pub fn getdirent(&mut self, net: &mut dyn crate::kernel_if::NetOps, pos: usize, now: u64) -> Outcome<Option<crate::nfs::DirEntry>> {
        let token = self.mint_token();
        self.nfs.begin_readdir(net, token, pos, now);
        Outcome::Pending(token)
    }

    /// `dup` increments the v-node's reader/writer counts for the
    /// existing mode of `fd_src` (spec §4.7, §9 open question resolved:
    /// "the natural choice is that dup increments the per-mode count").
    pub fn dup_admit(&mut self, vnode: VNodeId, mode: OpenMode) -> SosResult<()> {
        self.nodes.get_mut(&vnode).ok_or(SosError::CorVNode)?.admit(mode)
    }

    pub fn node_path(&self, vnode: VNodeId) -> Option<&str> {
        self.nodes.get(&vnode).map(|n| n.path.as_str())
    }

    pub fn node_stat_mut(&mut self, vnode: VNodeId) -> Option<&mut Stat> {
        self.nodes.get_mut(&vnode).map(|n| &mut n.stat)
    }

    /// Drains completions from both drivers; called once per event-loop
    /// iteration.
    pub fn drain_events(&mut self, net: &mut dyn crate::kernel_if::NetOps) -> Vec<VfsEvent> {
        let mut events = self.console.drain_events();
        events.extend(self.nfs.drain_events(net));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel_if::{NetCompletion, NetOps, NetToken, NfsOpKind};
    use crate::nfs::NfsDriver;

    struct NullNet;
    impl NetOps for NullNet {
        fn submit_rpc(&mut self, _op: NfsOpKind, _payload: Vec<u8>) -> NetToken {
            NetToken(0)
        }
        fn poll_completions(&mut self) -> Vec<(NetToken, NetCompletion)> {
            Vec::new()
        }
        fn overdue(&mut self, _threshold_ticks: u64, _now: u64) -> Vec<NetToken> {
            Vec::new()
        }
        fn resend(&mut self, _token: NetToken) {}
    }

    fn fresh_vfs() -> Vfs {
        Vfs::new(ConsoleDriver::new(vec!["console".into()], 1, 1), NfsDriver::new(2, 2, 5000))
    }

    #[test]
    fn console_open_is_immediate_and_respects_reader_cap() {
        let mut vfs = fresh_vfs();
        let mut net = NullNet;
        let a = match vfs.open(&mut net, "console", OpenMode::READ, 0) {
            Outcome::Ready(Ok(id)) => id,
            _ => panic!("expected immediate open"),
        };
        // Admit consumed the one reader slot already via `open`; a second
        // concurrent reader is READFULL.
        match vfs.open(&mut net, "console", OpenMode::READ, 0) {
            Outcome::Ready(Err(SosError::ReadFull)) => {}
            other => panic!("expected READFULL, got different outcome, id={:?}", a),
        }
    }

    #[test]
    fn double_close_is_nofile_not_noop() {
        let mut fdt = FdTable::new(4);
        let fd = fdt.reserve().unwrap();
        fdt.finish_open(
            fd,
            OpenFile {
                vnode: VNodeId(0),
                mode: OpenMode::READ,
                position: 0,
            },
        );
        assert!(fdt.take(fd).is_ok());
        assert_eq!(fdt.take(fd), Err(SosError::NoFile));
    }

    #[test]
    fn thirty_third_fd_is_nomore() {
        let mut fdt = FdTable::new(32);
        for _ in 0..32 {
            fdt.reserve().unwrap();
        }
        assert_eq!(fdt.reserve(), Err(SosError::NoMore));
    }

    #[test]
    fn lseek_end_is_size_minus_pos() {
        let mut vfs = fresh_vfs();
        let id = vfs.intern("/foo", DriverKind::Nfs, Stat::new_file(100, crate::stat::FileMode::R, 0), 2, 2);
        let mut file = OpenFile {
            vnode: id,
            mode: OpenMode::READ,
            position: 0,
        };
        let pos = vfs.lseek(&mut file, 40, Whence::End).unwrap();
        assert_eq!(pos, 60);
    }

    #[test]
    fn lseek_negative_absolute_is_error() {
        let mut vfs = fresh_vfs();
        let id = vfs.intern("/foo", DriverKind::Nfs, Stat::new_file(10, crate::stat::FileMode::R, 0), 2, 2);
        let mut file = OpenFile {
            vnode: id,
            mode: OpenMode::READ,
            position: 0,
        };
        assert_eq!(vfs.lseek(&mut file, -1, Whence::Set), Err(SosError::Error));
    }

    #[test]
    fn remove_on_open_file_is_open_error() {
        let mut vfs = fresh_vfs();
        let mut net = NullNet;
        let id = vfs.intern("/foo", DriverKind::Nfs, Stat::new_file(10, crate::stat::FileMode::R, 0), 2, 2);
        vfs.nodes.get_mut(&id).unwrap().admit(OpenMode::READ).unwrap();
        match vfs.remove(&mut net, "/foo", 0) {
            Outcome::Ready(Err(SosError::Open)) => {}
            _ => panic!("expected OPEN"),
        }
    }
}
