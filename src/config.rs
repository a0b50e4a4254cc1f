//! Root-server configuration (spec's ambient-stack addition): the sizes
//! and caps that would otherwise be scattered magic numbers across the
//! pager, VFS, and process manager.

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of physical frames the pager manages.
    pub num_frames: u32,
    /// Number of swap slots backing the swap file.
    pub num_swap_slots: u32,
    /// Fd-table size per process (spec §8: 32 in the worked examples).
    pub fd_table_size: usize,
    /// Reader/writer caps for the console v-node.
    pub console_reader_cap: u32,
    pub console_writer_cap: u32,
    /// Reader/writer caps for NFS-backed v-nodes.
    pub nfs_reader_cap: u32,
    pub nfs_writer_cap: u32,
    /// Milliseconds an NFS RPC may sit unanswered before a resend
    /// (spec §4.9).
    pub nfs_retransmit_interval_ms: u64,
    /// Paths routed to the console driver; everything else is NFS.
    pub console_paths: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            num_frames: 256,
            num_swap_slots: 1024,
            fd_table_size: 32,
            console_reader_cap: 1,
            console_writer_cap: 1,
            nfs_reader_cap: 2,
            nfs_writer_cap: 2,
            nfs_retransmit_interval_ms: 2000,
            console_paths: vec!["console".to_string()],
        }
    }
}
