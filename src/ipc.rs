//! Syscall IPC message shape (spec §6/§7): every syscall arrives as a
//! label plus up to four integer arguments, with any bulk data (paths,
//! read/write buffers) staged through the shared buffer (`buffer.rs`)
//! instead.

use crate::kernel_if::ThreadId;

/// The closed set of syscalls this root server answers (spec §6's
/// 19-entry table). Discriminants are the wire values carried in the
/// label word of the IPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SyscallLabel {
    KernelPrint = 1,
    Open = 2,
    Close = 3,
    Read = 4,
    Write = 5,
    Flush = 6,
    Lseek = 7,
    GetDirent = 8,
    Stat = 9,
    Remove = 10,
    Dup = 11,
    TimeStamp = 12,
    USleep = 13,
    MyId = 14,
    ProcessCreate = 15,
    ProcessDelete = 16,
    ProcessStatus = 17,
    ProcessWait = 18,
    VPager = 19,
}

impl SyscallLabel {
    pub fn from_wire(value: u16) -> Option<Self> {
        use SyscallLabel::*;
        Some(match value {
            1 => KernelPrint,
            2 => Open,
            3 => Close,
            4 => Read,
            5 => Write,
            6 => Flush,
            7 => Lseek,
            8 => GetDirent,
            9 => Stat,
            10 => Remove,
            11 => Dup,
            12 => TimeStamp,
            13 => USleep,
            14 => MyId,
            15 => ProcessCreate,
            16 => ProcessDelete,
            17 => ProcessStatus,
            18 => ProcessWait,
            19 => VPager,
            _ => return None,
        })
    }
}

/// A decoded syscall IPC, arriving from the thread named by `from`.
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub from: ThreadId,
    pub label: SyscallLabel,
    pub args: [i64; 4],
}
