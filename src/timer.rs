//! The delay queue behind `TIME_STAMP`/`register_timer`/`remove_timer`
//! (spec §4.9's "periodic timeout poke" and §3's timer entries). Kept as
//! a sorted `Vec` rather than a binary heap: the expected queue depth is
//! small (one entry per process with a pending NFS retransmit or sleep)
//! and a sorted vec makes `tick`'s "pop everything due" loop a simple
//! prefix drain.

use crate::kernel_if::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(pub u64);

struct Entry {
    id: TimerId,
    deadline: u64,
    tid: ThreadId,
}

pub struct TimerQueue {
    entries: Vec<Entry>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        TimerQueue {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    /// Registers a wakeup for `tid` at `now + delay_ticks`.
    pub fn register(&mut self, tid: ThreadId, now: u64, delay_ticks: u64) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let deadline = now.saturating_add(delay_ticks);
        let pos = self.entries.partition_point(|e| e.deadline <= deadline);
        self.entries.insert(pos, Entry { id, deadline, tid });
        id
    }

    pub fn remove(&mut self, id: TimerId) -> bool {
        if let Some(i) = self.entries.iter().position(|e| e.id == id) {
            self.entries.remove(i);
            true
        } else {
            false
        }
    }

    /// Pops every timer due at or before `now`, in deadline order.
    pub fn expire(&mut self, now: u64) -> Vec<ThreadId> {
        let split = self.entries.partition_point(|e| e.deadline <= now);
        self.entries.drain(..split).map(|e| e.tid).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TimerQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_in_deadline_order_regardless_of_registration_order() {
        let mut q = TimerQueue::new();
        q.register(ThreadId(1), 0, 30);
        q.register(ThreadId(2), 0, 10);
        q.register(ThreadId(3), 0, 20);
        assert_eq!(q.expire(25), vec![ThreadId(2), ThreadId(3)]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.expire(30), vec![ThreadId(1)]);
        assert!(q.is_empty());
    }

    #[test]
    fn removed_timer_never_fires() {
        let mut q = TimerQueue::new();
        let id = q.register(ThreadId(1), 0, 10);
        assert!(q.remove(id));
        assert!(q.expire(100).is_empty());
    }
}
