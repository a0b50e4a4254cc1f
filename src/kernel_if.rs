//! The port boundary (spec §6): every external collaborator the core talks
//! to — the microkernel, the network stack, the backing swap disk — is
//! expressed as a trait here. Nothing else in this crate touches hardware,
//! an L4-family syscall ABI, or a real NFS wire format; that lets the whole
//! core be driven from plain unit tests against the `sim` backend.

use crate::PAGE_SIZE;

/// Microkernel thread id. Opaque beyond equality/ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Microkernel address-space id, used by the pager to find the owning PCB
/// of a page-fault IPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(pub u32);

bitflags::bitflags! {
    /// Access rights recorded on a region and installed on a mapping.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rights: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXEC = 0b100;
    }
}

/// A virtual page-aligned address.
pub type VAddr = u64;

/// Physical frame descriptor handed to the microkernel when installing a
/// mapping. Opaque to everything except `KernelOps` impls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysDesc(pub u64);

/// Outcome of asking the microkernel to map or unmap a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapResult {
    Ok,
    Err,
}

/// `kernel_*` port boundary: thread/address-space control, IPC mapping
/// primitives, notification plumbing, the monotonic tick counter.
pub trait KernelOps {
    /// Map `vaddr` in `space` to `phys` with `rights`. Microkernel op; does
    /// not yield (spec §4.4 step 9, §5 suspension point rule).
    fn map_page(&mut self, space: SpaceId, vaddr: VAddr, phys: PhysDesc, rights: Rights) -> MapResult;

    /// Unmap a single page (used by the replacement policy's swap-out path).
    fn unmap_page(&mut self, space: SpaceId, vaddr: VAddr) -> MapResult;

    /// Has this page been accessed since the last clock sweep? Used by
    /// frame-table victim selection (§4.1).
    fn was_accessed(&mut self, space: SpaceId, vaddr: VAddr) -> bool;

    /// Clear the accessed bit (clock sweep).
    fn clear_accessed(&mut self, space: SpaceId, vaddr: VAddr);

    /// Create a new thread in a fresh address space, returning its tid and
    /// space id. `entry`/`sp` are the saved IP/SP the process manager
    /// prepared (§3 PCB: "saved SP/IP for startup").
    fn thread_create(&mut self, entry: VAddr, sp: VAddr, pager: ThreadId) -> (ThreadId, SpaceId);

    /// Tear down a thread and its address space at the microkernel level.
    fn thread_destroy(&mut self, tid: ThreadId, space: SpaceId);

    /// Monotonic tick counter, backing `TIME_STAMP`.
    fn tick(&self) -> u64;

    /// Register to receive interrupt notifications for `irq`.
    fn irq_unmask(&mut self, irq: u32);

    /// Stop receiving interrupt notifications for `irq`.
    fn irq_mask(&mut self, irq: u32);

    /// `syscall_reply`'s underlying IPC primitive: reply to `tid` with a
    /// single integer (spec §7: every syscall returns one integer). The
    /// event loop is responsible for refusing to call this for zombie
    /// PCBs or root-server threads (spec §4.11); this trait method always
    /// sends.
    fn ipc_reply(&mut self, tid: ThreadId, value: i64);
}

/// A disk I/O request has completed with this outcome.
#[derive(Debug, Clone)]
pub enum DiskCompletion {
    Read([u8; PAGE_SIZE]),
    Write,
    Err,
}

/// `disk_*` port boundary for swap I/O (§4.2, §4.4 step 6b, §4.5). Requests
/// are asynchronous: `submit_*` returns a token immediately, and the
/// result shows up later via `poll_completions`. The backend is
/// responsible for completing same-slot requests in submission order,
/// matching the FIFO-per-device guarantee of §4.5.
pub trait DiskOps {
    fn submit_read(&mut self, slot: u32) -> DiskToken;
    fn submit_write(&mut self, slot: u32, data: [u8; PAGE_SIZE]) -> DiskToken;
    /// Drain completed requests since the last call. Order within the
    /// returned vector need not match submission order across different
    /// slots, but must for the same slot.
    fn poll_completions(&mut self) -> Vec<(DiskToken, DiskCompletion)>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DiskToken(pub u64);

/// Outcome of an NFS-style RPC.
#[derive(Debug, Clone)]
pub enum NetCompletion {
    Ok(Vec<u8>),
    NotFound,
    Err,
}

/// `net_*` port boundary: UDP-ish request/reply with a token and a
/// periodic timeout poke (§6, §4.9).
pub trait NetOps {
    fn submit_rpc(&mut self, op: NfsOpKind, payload: Vec<u8>) -> NetToken;
    fn poll_completions(&mut self) -> Vec<(NetToken, NetCompletion)>;
    /// Called every ~100ms by the event loop; returns tokens whose
    /// requests are old enough to deserve a resend (§4.9, §5).
    fn overdue(&mut self, threshold_ticks: u64, now: u64) -> Vec<NetToken>;
    fn resend(&mut self, token: NetToken);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetToken(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfsOpKind {
    Lookup,
    Create,
    Read,
    Write,
    Stat,
    Readdir,
    Remove,
}
