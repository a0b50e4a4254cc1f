//! The console driver (spec §4.8): line-buffered blocking reads with the
//! single-outstanding-reader rule, and unbuffered writes straight to the
//! serial/teletype collaborator reached only via `kernel_*` notifications
//! in the real build (here, via whatever sink the `sim` backend provides).

use crate::error::{SosError, SosResult};
use crate::pcb::Pid;
use crate::stat::{FileMode, Stat, StatKind};
use crate::vfs::{VfsEvent, VfsToken};

struct PendingRead {
    pid: Pid,
    token: VfsToken,
    requested: usize,
    buf: Vec<u8>,
}

/// Console input arrives a byte (or a chunk) at a time from the real
/// serial driver; here it is fed in by whatever pushes bytes into
/// `feed_input`, matching the original's line-discipline loop in
/// `examples/original_source/sos/serial.c`.
pub struct ConsoleDriver {
    paths: Vec<String>,
    reader_cap: u32,
    writer_cap: u32,
    pending: Option<PendingRead>,
    out: Vec<u8>,
    events: Vec<VfsEvent>,
}

impl ConsoleDriver {
    pub fn new(paths: Vec<String>, reader_cap: u32, writer_cap: u32) -> Self {
        ConsoleDriver {
            paths,
            reader_cap,
            writer_cap,
            pending: None,
            out: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn owns(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn caps(&self) -> (u32, u32) {
        (self.reader_cap, self.writer_cap)
    }

    pub fn stat(&self, _path: &str, now_ms: u64) -> Stat {
        Stat {
            st_type: StatKind::Special,
            st_fmode: FileMode::R | FileMode::W,
            st_size: 0,
            st_ctime: now_ms,
            st_atime: now_ms,
        }
    }

    pub fn close(&mut self, _path: &str) {}

    /// Only one outstanding reader is permitted at a time (spec §4.8,
    /// §8): a second concurrent read fails immediately with READFULL
    /// rather than queuing.
    pub fn begin_read(&mut self, pid: Pid, token: VfsToken, nbyte: usize) -> SosResult<()> {
        if self.pending.is_some() {
            return Err(SosError::ReadFull);
        }
        self.pending = Some(PendingRead {
            pid,
            token,
            requested: nbyte,
            buf: Vec::new(),
        });
        Ok(())
    }

    /// Feeds bytes as they arrive from the driver below; completes the
    /// pending read on a newline or once `requested` bytes have
    /// accumulated, whichever comes first.
    pub fn feed_input(&mut self, bytes: &[u8]) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        for &b in bytes {
            pending.buf.push(b);
            if b == b'\n' || pending.buf.len() >= pending.requested {
                break;
            }
        }
        if pending.buf.last() == Some(&b'\n') || pending.buf.len() >= pending.requested {
            let pending = self.pending.take().unwrap();
            self.events.push(VfsEvent::Read {
                token: pending.token,
                result: Ok(pending.buf),
            });
        }
    }

    pub fn write(&mut self, data: &[u8]) -> usize {
        self.out.extend_from_slice(data);
        data.len()
    }

    pub fn flush(&mut self) {}

    /// Test/demo hook: the bytes written so far, for assertions.
    pub fn written(&self) -> &[u8] {
        &self.out
    }

    pub fn drain_events(&mut self) -> Vec<VfsEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_concurrent_reader_is_readfull() {
        let mut c = ConsoleDriver::new(vec!["console".into()], 1, 1);
        c.begin_read(Pid(1), VfsToken(0), 16).unwrap();
        assert_eq!(c.begin_read(Pid(2), VfsToken(1), 16), Err(SosError::ReadFull));
    }

    #[test]
    fn read_completes_on_newline_before_requested_length() {
        let mut c = ConsoleDriver::new(vec!["console".into()], 1, 1);
        c.begin_read(Pid(1), VfsToken(0), 100).unwrap();
        c.feed_input(b"hi\n");
        let events = c.drain_events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            VfsEvent::Read { result: Ok(data), .. } => assert_eq!(data, b"hi\n"),
            _ => panic!("expected a completed read"),
        }
        // The slot is free again for the next reader.
        assert!(c.begin_read(Pid(2), VfsToken(1), 16).is_ok());
    }

    #[test]
    fn read_completes_when_requested_length_reached_without_newline() {
        let mut c = ConsoleDriver::new(vec!["console".into()], 1, 1);
        c.begin_read(Pid(1), VfsToken(0), 3).unwrap();
        c.feed_input(b"abc");
        let events = c.drain_events();
        assert_eq!(events.len(), 1);
    }
}
