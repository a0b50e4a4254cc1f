//! `sos_root`: the user-level root-server personality sitting on top of
//! a minimal microkernel (spec §1). It owns demand-paged virtual memory,
//! process lifecycle, the VFS and its two drivers, and the single-
//! threaded cooperative syscall/IPC event loop. Everything outside that
//! boundary — the microkernel, the network stack, the backing disk,
//! ELF loading, userland — is reached only through the `kernel_if`
//! traits (spec §6).

pub mod addrspace;
pub mod buffer;
pub mod config;
pub mod console;
pub mod error;
pub mod frame;
pub mod ipc;
pub mod irq;
pub mod kernel_if;
pub mod nfs;
pub mod pager;
pub mod pagetable;
pub mod pcb;
pub mod process;
pub mod region;
pub mod sim;
pub mod stat;
pub mod swap;
pub mod syscall;
pub mod timer;
pub mod vfs;

/// Hardware page size this root server is built for. Every frame, swap
/// slot, and shared IPC buffer is exactly this large (spec §3, Non-goal:
/// "no support for huge pages or multiple page sizes").
pub const PAGE_SIZE: usize = 4096;

pub use config::Config;
pub use error::{SosError, SosResult};
