//! The NFS-style remote filesystem driver (spec §4.9): every call becomes
//! an RPC through `NetOps`, tracked in an outstanding-request table keyed
//! by the network token, with periodic resend of requests that have sat
//! unanswered past the retransmit interval.

use std::collections::HashMap;

use crate::error::SosError;
use crate::kernel_if::{NetCompletion, NetOps, NetToken, NfsOpKind};
use crate::stat::{FileMode, Stat, StatKind};
use crate::vfs::{OpenMode, VfsEvent, VfsToken};

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
}

enum PendingKind {
    /// A lookup issued by `open`; on NOENT for a write-capable open it is
    /// retried as `Create` (spec §4.9's translation of POSIX O_CREAT onto
    /// a stateless lookup/create RPC pair).
    Open { path: String, mode: OpenMode },
    Create { path: String, mode: OpenMode },
    Read,
    Write,
    Stat,
    Remove,
    Readdir,
}

struct PendingReq {
    vfs_token: VfsToken,
    kind: PendingKind,
    submitted_at: u64,
}

pub struct NfsDriver {
    reader_cap: u32,
    writer_cap: u32,
    retransmit_ms: u64,
    outstanding: HashMap<NetToken, PendingReq>,
    events: Vec<VfsEvent>,
}

fn encode_stat(s: &Stat) -> Vec<u8> {
    let mut v = Vec::with_capacity(26);
    v.push(matches!(s.st_type, StatKind::File) as u8);
    v.push(s.st_fmode.bits());
    v.extend_from_slice(&s.st_size.to_le_bytes());
    v.extend_from_slice(&s.st_ctime.to_le_bytes());
    v.extend_from_slice(&s.st_atime.to_le_bytes());
    v
}

fn decode_stat(b: &[u8]) -> Option<Stat> {
    if b.len() < 2 + 8 * 3 {
        return None;
    }
    let st_type = if b[0] == 1 { StatKind::File } else { StatKind::Special };
    let st_fmode = FileMode::from_bits_truncate(b[1]);
    let st_size = u64::from_le_bytes(b[2..10].try_into().ok()?);
    let st_ctime = u64::from_le_bytes(b[10..18].try_into().ok()?);
    let st_atime = u64::from_le_bytes(b[18..26].try_into().ok()?);
    Some(Stat {
        st_type,
        st_fmode,
        st_size,
        st_ctime,
        st_atime,
    })
}

fn path_payload(path: &str) -> Vec<u8> {
    let mut v = path.as_bytes().to_vec();
    v.push(0);
    v
}

impl NfsDriver {
    pub fn new(reader_cap: u32, writer_cap: u32, retransmit_ms: u64) -> Self {
        NfsDriver {
            reader_cap,
            writer_cap,
            retransmit_ms,
            outstanding: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn reader_cap(&self) -> u32 {
        self.reader_cap
    }

    pub fn writer_cap(&self) -> u32 {
        self.writer_cap
    }

    fn submit(&mut self, net: &mut dyn NetOps, vfs_token: VfsToken, kind: PendingKind, op: NfsOpKind, payload: Vec<u8>, now: u64) {
        let net_token = net.submit_rpc(op, payload);
        self.outstanding.insert(
            net_token,
            PendingReq {
                vfs_token,
                kind,
                submitted_at: now,
            },
        );
    }

    pub fn begin_open(&mut self, net: &mut dyn NetOps, token: VfsToken, path: String, mode: OpenMode, now: u64) {
        let payload = path_payload(&path);
        self.submit(net, token, PendingKind::Open { path, mode }, NfsOpKind::Lookup, payload, now);
    }

    pub fn begin_read(&mut self, net: &mut dyn NetOps, token: VfsToken, path: String, offset: u64, nbyte: usize, now: u64) {
        let mut payload = path_payload(&path);
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(&(nbyte as u64).to_le_bytes());
        self.submit(net, token, PendingKind::Read, NfsOpKind::Read, payload, now);
    }

    pub fn begin_write(&mut self, net: &mut dyn NetOps, token: VfsToken, path: String, offset: u64, data: Vec<u8>, now: u64) {
        let mut payload = path_payload(&path);
        payload.extend_from_slice(&offset.to_le_bytes());
        payload.extend_from_slice(&data);
        self.submit(net, token, PendingKind::Write, NfsOpKind::Write, payload, now);
    }

    pub fn begin_stat(&mut self, net: &mut dyn NetOps, token: VfsToken, path: String, now: u64) {
        self.submit(net, token, PendingKind::Stat, NfsOpKind::Stat, path.into_bytes(), now);
    }

    pub fn begin_remove(&mut self, net: &mut dyn NetOps, token: VfsToken, path: String, now: u64) {
        self.submit(net, token, PendingKind::Remove, NfsOpKind::Remove, path.into_bytes(), now);
    }

    pub fn begin_readdir(&mut self, net: &mut dyn NetOps, token: VfsToken, pos: usize, now: u64) {
        self.submit(
            net,
            token,
            PendingKind::Readdir,
            NfsOpKind::Readdir,
            (pos as u64).to_le_bytes().to_vec(),
            now,
        );
    }

    /// Harvests completions since the last call; called once per
    /// event-loop iteration.
    pub fn drain_events(&mut self, net: &mut dyn NetOps) -> Vec<VfsEvent> {
        let completions = net.poll_completions();
        for (net_token, completion) in completions {
            if let Some(req) = self.outstanding.remove(&net_token) {
                self.complete(net, req, completion);
            }
        }
        std::mem::take(&mut self.events)
    }

    /// Resends requests that have sat unanswered past the retransmit
    /// interval (spec §4.9: periodic timeout poke).
    pub fn check_timeouts(&mut self, net: &mut dyn NetOps, now: u64) {
        for token in net.overdue(self.retransmit_ms, now) {
            if self.outstanding.contains_key(&token) {
                net.resend(token);
            }
        }
    }

    fn complete(&mut self, net: &mut dyn NetOps, req: PendingReq, completion: NetCompletion) {
        let now = req.submitted_at;
        match req.kind {
            PendingKind::Open { path, mode } => match completion {
                NetCompletion::Ok(payload) => {
                    let stat = decode_stat(&payload).unwrap_or_else(|| Stat::new_file(0, FileMode::R | FileMode::W, now));
                    self.events.push(VfsEvent::Open {
                        token: req.vfs_token,
                        result: Ok((path, stat, mode)),
                    });
                }
                NetCompletion::NotFound if mode.contains(OpenMode::WRITE) => {
                    let payload = path_payload(&path);
                    self.submit(net, req.vfs_token, PendingKind::Create { path, mode }, NfsOpKind::Create, payload, now);
                }
                NetCompletion::NotFound => {
                    self.events.push(VfsEvent::Open {
                        token: req.vfs_token,
                        result: Err(SosError::NoFile),
                    });
                }
                NetCompletion::Err => {
                    self.events.push(VfsEvent::Open {
                        token: req.vfs_token,
                        result: Err(SosError::Error),
                    });
                }
            },
            PendingKind::Create { path, mode } => {
                let result = match completion {
                    NetCompletion::Ok(payload) => {
                        let stat = decode_stat(&payload).unwrap_or_else(|| Stat::new_file(0, FileMode::R | FileMode::W, now));
                        Ok((path, stat, mode))
                    }
                    _ => Err(SosError::Error),
                };
                self.events.push(VfsEvent::Open { token: req.vfs_token, result });
            }
            PendingKind::Read => {
                let result = match completion {
                    NetCompletion::Ok(data) => Ok(data),
                    NetCompletion::NotFound => Err(SosError::NoFile),
                    NetCompletion::Err => Err(SosError::Error),
                };
                self.events.push(VfsEvent::Read { token: req.vfs_token, result });
            }
            PendingKind::Write => {
                let result = match completion {
                    NetCompletion::Ok(payload) if payload.len() >= 4 => {
                        Ok(u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize)
                    }
                    NetCompletion::Ok(_) => Ok(0),
                    NetCompletion::NotFound => Err(SosError::NoFile),
                    NetCompletion::Err => Err(SosError::Error),
                };
                self.events.push(VfsEvent::Write { token: req.vfs_token, result });
            }
            PendingKind::Stat => {
                let result = match completion {
                    NetCompletion::Ok(payload) => decode_stat(&payload).ok_or(SosError::Error),
                    NetCompletion::NotFound => Err(SosError::NoFile),
                    NetCompletion::Err => Err(SosError::Error),
                };
                self.events.push(VfsEvent::Stat { token: req.vfs_token, result });
            }
            PendingKind::Remove => {
                let result = match completion {
                    NetCompletion::Ok(_) => Ok(()),
                    NetCompletion::NotFound => Err(SosError::NoFile),
                    NetCompletion::Err => Err(SosError::Error),
                };
                self.events.push(VfsEvent::Remove { token: req.vfs_token, result });
            }
            PendingKind::Readdir => {
                let result = match completion {
                    NetCompletion::Ok(payload) if payload.is_empty() => Ok(None),
                    NetCompletion::Ok(payload) => Ok(Some(DirEntry {
                        name: String::from_utf8_lossy(&payload).into_owned(),
                    })),
                    NetCompletion::NotFound => Ok(None),
                    NetCompletion::Err => Err(SosError::Error),
                };
                self.events.push(VfsEvent::GetDirent { token: req.vfs_token, result });
            }
        }
    }
}
