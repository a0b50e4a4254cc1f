//! In-memory stand-ins for the three port-boundary traits (spec §6),
//! used by unit tests and the demo binary. None of this ships in the
//! real root server; a genuine build plugs in implementations that
//! actually talk to the microkernel, the disk, and the network.

use std::collections::{HashMap, HashSet};

use crate::kernel_if::{
    DiskCompletion, DiskOps, DiskToken, KernelOps, MapResult, NetCompletion, NetOps, NetToken, NfsOpKind, PhysDesc, Rights, SpaceId,
    ThreadId, VAddr,
};

/// A microkernel double: tracks mappings and accessed bits in plain
/// hash maps, hands out monotonically increasing thread/space ids.
pub struct SimKernel {
    mappings: HashMap<(SpaceId, VAddr), (PhysDesc, Rights)>,
    accessed: HashSet<(SpaceId, VAddr)>,
    tick: u64,
    next_tid: u64,
    next_space: u32,
    masked: HashSet<u32>,
    pub replies: Vec<(ThreadId, i64)>,
}

impl SimKernel {
    pub fn new() -> Self {
        SimKernel {
            mappings: HashMap::new(),
            accessed: HashSet::new(),
            tick: 0,
            next_tid: 1,
            next_space: 1,
            masked: HashSet::new(),
            replies: Vec::new(),
        }
    }

    pub fn advance(&mut self, ticks: u64) {
        self.tick += ticks;
    }

    /// Test hook: mark a mapped page as having been touched since the
    /// last clock sweep.
    pub fn touch(&mut self, space: SpaceId, vaddr: VAddr) {
        self.accessed.insert((space, vaddr));
    }

    pub fn is_mapped(&self, space: SpaceId, vaddr: VAddr) -> bool {
        self.mappings.contains_key(&(space, vaddr))
    }
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelOps for SimKernel {
    fn map_page(&mut self, space: SpaceId, vaddr: VAddr, phys: PhysDesc, rights: Rights) -> MapResult {
        self.mappings.insert((space, vaddr), (phys, rights));
        MapResult::Ok
    }

    fn unmap_page(&mut self, space: SpaceId, vaddr: VAddr) -> MapResult {
        self.mappings.remove(&(space, vaddr));
        self.accessed.remove(&(space, vaddr));
        MapResult::Ok
    }

    fn was_accessed(&mut self, space: SpaceId, vaddr: VAddr) -> bool {
        self.accessed.contains(&(space, vaddr))
    }

    fn clear_accessed(&mut self, space: SpaceId, vaddr: VAddr) {
        self.accessed.remove(&(space, vaddr));
    }

    fn thread_create(&mut self, _entry: VAddr, _sp: VAddr, _pager: ThreadId) -> (ThreadId, SpaceId) {
        let tid = ThreadId(self.next_tid);
        let space = SpaceId(self.next_space);
        self.next_tid += 1;
        self.next_space += 1;
        (tid, space)
    }

    fn thread_destroy(&mut self, _tid: ThreadId, space: SpaceId) {
        self.mappings.retain(|(s, _), _| *s != space);
        self.accessed.retain(|(s, _)| *s != space);
    }

    fn tick(&self) -> u64 {
        self.tick
    }

    fn irq_unmask(&mut self, irq: u32) {
        self.masked.remove(&irq);
    }

    fn irq_mask(&mut self, irq: u32) {
        self.masked.insert(irq);
    }

    fn ipc_reply(&mut self, tid: ThreadId, value: i64) {
        self.replies.push((tid, value));
    }
}

/// A disk double backed by an in-memory slot array; completions are
/// delivered on the very next `poll_completions` call (no simulated
/// latency) unless `delay_one` has queued a slot for one extra round.
pub struct SimDisk {
    slots: HashMap<u32, [u8; crate::PAGE_SIZE]>,
    next_token: u64,
    ready: Vec<(DiskToken, DiskCompletion)>,
}

impl SimDisk {
    pub fn new() -> Self {
        SimDisk {
            slots: HashMap::new(),
            next_token: 0,
            ready: Vec::new(),
        }
    }
}

impl Default for SimDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskOps for SimDisk {
    fn submit_read(&mut self, slot: u32) -> DiskToken {
        let token = DiskToken(self.next_token);
        self.next_token += 1;
        let data = self.slots.get(&slot).copied().unwrap_or([0u8; crate::PAGE_SIZE]);
        self.ready.push((token, DiskCompletion::Read(data)));
        token
    }

    fn submit_write(&mut self, slot: u32, data: [u8; crate::PAGE_SIZE]) -> DiskToken {
        let token = DiskToken(self.next_token);
        self.next_token += 1;
        self.slots.insert(slot, data);
        self.ready.push((token, DiskCompletion::Write));
        token
    }

    fn poll_completions(&mut self) -> Vec<(DiskToken, DiskCompletion)> {
        std::mem::take(&mut self.ready)
    }
}

/// A network double modeling an in-memory NFS server: lookups/stats
/// resolve against a `files: HashMap<path, (stat_payload, contents)>`
/// the test or demo populates up front.
pub struct SimNet {
    files: HashMap<String, Vec<u8>>,
    next_token: u64,
    ready: Vec<(NetToken, NetCompletion)>,
    submitted_at: HashMap<NetToken, u64>,
    now: u64,
}

impl SimNet {
    pub fn new() -> Self {
        SimNet {
            files: HashMap::new(),
            next_token: 0,
            ready: Vec::new(),
            submitted_at: HashMap::new(),
            now: 0,
        }
    }

    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }

    pub fn put_file(&mut self, path: &str, contents: Vec<u8>) {
        self.files.insert(path.to_string(), contents);
    }

    fn path_from_payload(payload: &[u8]) -> String {
        let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
        String::from_utf8_lossy(&payload[..end]).into_owned()
    }
}

impl Default for SimNet {
    fn default() -> Self {
        Self::new()
    }
}

impl NetOps for SimNet {
    fn submit_rpc(&mut self, op: NfsOpKind, payload: Vec<u8>) -> NetToken {
        let token = NetToken(self.next_token);
        self.next_token += 1;
        self.submitted_at.insert(token, self.now);

        let completion = match op {
            NfsOpKind::Lookup => {
                let path = Self::path_from_payload(&payload);
                match self.files.get(&path) {
                    Some(_) => NetCompletion::Ok(encode_stub_stat(self.files.get(&path).unwrap().len() as u64)),
                    None => NetCompletion::NotFound,
                }
            }
            NfsOpKind::Create => {
                let path = Self::path_from_payload(&payload);
                self.files.entry(path).or_insert_with(Vec::new);
                NetCompletion::Ok(encode_stub_stat(0))
            }
            NfsOpKind::Stat => {
                let path = String::from_utf8_lossy(&payload).into_owned();
                match self.files.get(&path) {
                    Some(data) => NetCompletion::Ok(encode_stub_stat(data.len() as u64)),
                    None => NetCompletion::NotFound,
                }
            }
            NfsOpKind::Read => {
                let path = Self::path_from_payload(&payload);
                let offset = u64::from_le_bytes(payload[path.len() + 1..path.len() + 9].try_into().unwrap()) as usize;
                let nbyte = u64::from_le_bytes(payload[path.len() + 9..path.len() + 17].try_into().unwrap()) as usize;
                match self.files.get(&path) {
                    Some(data) => {
                        let start = offset.min(data.len());
                        let end = (start + nbyte).min(data.len());
                        NetCompletion::Ok(data[start..end].to_vec())
                    }
                    None => NetCompletion::NotFound,
                }
            }
            NfsOpKind::Write => {
                let path = Self::path_from_payload(&payload);
                let offset = u64::from_le_bytes(payload[path.len() + 1..path.len() + 9].try_into().unwrap()) as usize;
                let body = &payload[path.len() + 9..];
                match self.files.get_mut(&path) {
                    Some(data) => {
                        if data.len() < offset + body.len() {
                            data.resize(offset + body.len(), 0);
                        }
                        data[offset..offset + body.len()].copy_from_slice(body);
                        let mut resp = Vec::with_capacity(4);
                        resp.extend_from_slice(&(body.len() as u32).to_le_bytes());
                        NetCompletion::Ok(resp)
                    }
                    None => NetCompletion::NotFound,
                }
            }
            NfsOpKind::Remove => {
                let path = String::from_utf8_lossy(&payload).into_owned();
                if self.files.remove(&path).is_some() {
                    NetCompletion::Ok(Vec::new())
                } else {
                    NetCompletion::NotFound
                }
            }
            NfsOpKind::Readdir => NetCompletion::Ok(Vec::new()),
        };
        self.ready.push((token, completion));
        token
    }

    fn poll_completions(&mut self) -> Vec<(NetToken, NetCompletion)> {
        std::mem::take(&mut self.ready)
    }

    fn overdue(&mut self, threshold_ticks: u64, now: u64) -> Vec<NetToken> {
        self.submitted_at
            .iter()
            .filter(|(_, &t)| now.saturating_sub(t) >= threshold_ticks)
            .map(|(tok, _)| *tok)
            .collect()
    }

    fn resend(&mut self, token: NetToken) {
        self.submitted_at.insert(token, self.now);
    }
}

fn encode_stub_stat(size: u64) -> Vec<u8> {
    let mut v = Vec::with_capacity(26);
    v.push(1u8); // StatKind::File
    v.push(0b011); // FileMode::R | W
    v.extend_from_slice(&size.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes());
    v.extend_from_slice(&0u64.to_le_bytes());
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_map_then_was_accessed_defaults_false() {
        let mut k = SimKernel::new();
        k.map_page(SpaceId(1), 0x1000, PhysDesc(1), Rights::READ);
        assert!(!k.was_accessed(SpaceId(1), 0x1000));
        k.touch(SpaceId(1), 0x1000);
        assert!(k.was_accessed(SpaceId(1), 0x1000));
        k.clear_accessed(SpaceId(1), 0x1000);
        assert!(!k.was_accessed(SpaceId(1), 0x1000));
    }

    #[test]
    fn net_lookup_then_read_round_trips() {
        let mut net = SimNet::new();
        net.put_file("/hello", b"hi there".to_vec());
        let mut payload = b"/hello".to_vec();
        payload.push(0);
        net.submit_rpc(NfsOpKind::Lookup, payload.clone());
        let completions = net.poll_completions();
        assert!(matches!(completions[0].1, NetCompletion::Ok(_)));

        let mut read_payload = payload.clone();
        read_payload.extend_from_slice(&0u64.to_le_bytes());
        read_payload.extend_from_slice(&8u64.to_le_bytes());
        net.submit_rpc(NfsOpKind::Read, read_payload);
        let completions = net.poll_completions();
        match &completions[0].1 {
            NetCompletion::Ok(data) => assert_eq!(data, b"hi there"),
            _ => panic!("expected read data"),
        }
    }
}
