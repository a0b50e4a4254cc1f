//! The process control block (spec §3): identity, lifecycle state, the
//! owned address space and fd table, and the wait list other processes
//! block on.

use crate::addrspace::AddressSpace;
use crate::buffer::SharedBuffer;
use crate::kernel_if::{SpaceId, ThreadId};
use crate::vfs::FdTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

/// Lifecycle state (spec §3, §4.6). `Start` covers the window between
/// `process_create` reserving a PCB and the new thread's first fault;
/// `Zombie` is set once `process_delete` begins and persists until every
/// waiter has been woken and the PCB is reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Start,
    Alive,
    Zombie,
    Dead,
}

/// Which IPC a suspended thread is blocked waiting to receive, so the
/// event loop can route a later `ipc_reply`/notification to the right
/// continuation (spec §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcFilter {
    Any,
    PagerOnly,
    FromPid(Pid),
}

pub struct Pcb {
    pub pid: Pid,
    pub tid: ThreadId,
    pub space_id: SpaceId,
    pub name: String,
    pub state: ProcessState,
    pub ipc_filter: IpcFilter,
    pub address_space: AddressSpace,
    pub fd_table: FdTable,
    /// The page the microkernel maps for this process's bulk syscall
    /// arguments/results (spec §4.10): paths for `OPEN`/`STAT`/`REMOVE`,
    /// bytes for `WRITE`, records for `PROCESS_STATUS`.
    pub shared_buffer: SharedBuffer,
    /// Saved SP/IP, installed at `thread_create` and re-read only for
    /// debugging (spec §3); the microkernel owns the live register file.
    pub saved_sp: u64,
    pub saved_ip: u64,
    pub stdin_name: String,
    pub stdout_name: String,
    pub stderr_name: String,
    /// Other pids blocked in `process_wait` on this pid's exit.
    pub wait_list: Vec<Pid>,
    /// Set by `process_wait(pid=-1)` callers; not tied to a single waiter.
    pub wait_any: bool,
}

impl Pcb {
    pub fn new(
        pid: Pid,
        tid: ThreadId,
        space_id: SpaceId,
        name: String,
        address_space: AddressSpace,
        fd_capacity: usize,
    ) -> Self {
        Pcb {
            pid,
            tid,
            space_id,
            name,
            state: ProcessState::Start,
            ipc_filter: IpcFilter::Any,
            address_space,
            fd_table: FdTable::new(fd_capacity),
            shared_buffer: SharedBuffer::zeroed(),
            saved_sp: 0,
            saved_ip: 0,
            stdin_name: "console".to_string(),
            stdout_name: "console".to_string(),
            stderr_name: "console".to_string(),
            wait_list: Vec::new(),
            wait_any: false,
        }
    }

    pub fn is_zombie(&self) -> bool {
        matches!(self.state, ProcessState::Zombie | ProcessState::Dead)
    }
}
