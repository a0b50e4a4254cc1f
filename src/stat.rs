//! The stat format crossing the shared-buffer wire boundary (spec §6).

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FileMode: u8 {
        const R = 0b001;
        const W = 0b010;
        const X = 0b100;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatKind {
    File,
    Special,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub st_type: StatKind,
    pub st_fmode: FileMode,
    pub st_size: u64,
    pub st_ctime: u64,
    pub st_atime: u64,
}

impl Stat {
    pub fn new_file(size: u64, mode: FileMode, now_ms: u64) -> Self {
        Stat {
            st_type: StatKind::File,
            st_fmode: mode,
            st_size: size,
            st_ctime: now_ms,
            st_atime: now_ms,
        }
    }

    pub fn touch_atime(&mut self, now_ms: u64) {
        self.st_atime = now_ms;
    }
}
