//! The windmill queue: a per-channel bounded buffer with drop-oldest
//! overflow, decoupling production rate from the Solver-assigned
//! transmission rate.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};

use bytes::Bytes;

/// Backing store for a channel's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Single-slot latest-wins: a new `put` overwrites the pending value.
    CacheSingle,
    /// In-memory FIFO with drop-oldest on overflow.
    CacheFifo,
    /// On-disk FIFO with drop-oldest on overflow.
    Persistent,
}

struct Inner {
    items: VecDeque<Bytes>,
}

/// A bounded, drop-oldest queue feeding one channel's `MessageWindmill`.
pub struct WindmillQueue {
    kind: QueueKind,
    capacity: usize,
    state: Mutex<Inner>,
    available: Condvar,
    persistent_dir: Option<PathBuf>,
    persistent_seq: Mutex<(u64, u64)>, // (next_write_index, next_read_index)
}

impl WindmillQueue {
    pub fn new_cache(capacity: usize) -> Self {
        let kind = if capacity <= 1 {
            QueueKind::CacheSingle
        } else {
            QueueKind::CacheFifo
        };
        WindmillQueue {
            kind,
            capacity: capacity.max(1),
            state: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity.max(1)),
            }),
            available: Condvar::new(),
            persistent_dir: None,
            persistent_seq: Mutex::new((0, 0)),
        }
    }

    /// `QUEUE_PATH/<channel>/` backed FIFO. Tolerates a missing or
    /// pre-existing directory.
    pub fn new_persistent(dir: PathBuf, capacity: usize) -> std::io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let mut entries: Vec<u64> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|n| n.parse::<u64>().ok()))
            .collect();
        entries.sort_unstable();
        let next_read = entries.first().copied().unwrap_or(0);
        let next_write = entries.last().map(|n| n + 1).unwrap_or(0);

        Ok(WindmillQueue {
            kind: QueueKind::Persistent,
            capacity: capacity.max(1),
            state: Mutex::new(Inner {
                items: VecDeque::new(),
            }),
            available: Condvar::new(),
            persistent_dir: Some(dir),
            persistent_seq: Mutex::new((next_write, next_read)),
        })
    }

    /// Push a payload, applying this queue's overflow policy.
    pub fn push(&self, payload: Bytes) {
        match self.kind {
            QueueKind::CacheSingle => {
                let mut state = self.state.lock().unwrap();
                state.items.clear();
                state.items.push_back(payload);
                self.available.notify_one();
            }
            QueueKind::CacheFifo => {
                let mut state = self.state.lock().unwrap();
                if state.items.len() >= self.capacity {
                    state.items.pop_front();
                }
                state.items.push_back(payload);
                self.available.notify_one();
            }
            QueueKind::Persistent => {
                let dir = self.persistent_dir.as_ref().expect("persistent dir set");
                let mut seq = self.persistent_seq.lock().unwrap();
                let (write_idx, read_idx) = *seq;
                if write_idx.saturating_sub(read_idx) >= self.capacity as u64 {
                    let oldest = dir.join(read_idx.to_string());
                    let _ = std::fs::remove_file(oldest);
                    seq.1 += 1;
                }
                let path = dir.join(write_idx.to_string());
                if std::fs::write(&path, &payload).is_ok() {
                    seq.0 += 1;
                    self.available.notify_one();
                }
            }
        }
    }

    /// Block until a value is available, then return it.
    pub fn pop_blocking(&self) -> Bytes {
        loop {
            if let Some(v) = self.try_pop() {
                return v;
            }
            match self.kind {
                QueueKind::Persistent => std::thread::sleep(std::time::Duration::from_millis(10)),
                _ => {
                    let state = self.state.lock().unwrap();
                    let _unused = self.available.wait(state).unwrap();
                }
            }
        }
    }

    pub fn try_pop(&self) -> Option<Bytes> {
        match self.kind {
            QueueKind::CacheSingle | QueueKind::CacheFifo => {
                self.state.lock().unwrap().items.pop_front()
            }
            QueueKind::Persistent => {
                let dir = self.persistent_dir.as_ref()?;
                let mut seq = self.persistent_seq.lock().unwrap();
                let (write_idx, read_idx) = *seq;
                if read_idx >= write_idx {
                    return None;
                }
                let path = dir.join(read_idx.to_string());
                let data = std::fs::read(&path).ok()?;
                let _ = std::fs::remove_file(&path);
                seq.1 += 1;
                Some(Bytes::from(data))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self.kind {
            QueueKind::CacheSingle | QueueKind::CacheFifo => self.state.lock().unwrap().items.len(),
            QueueKind::Persistent => {
                let (write_idx, read_idx) = *self.persistent_seq.lock().unwrap();
                write_idx.saturating_sub(read_idx) as usize
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_single_overwrites() {
        let q = WindmillQueue::new_cache(1);
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"b"));
        assert_eq!(q.len(), 1);
        assert_eq!(q.try_pop(), Some(Bytes::from_static(b"b")));
    }

    #[test]
    fn cache_fifo_drops_oldest() {
        let q = WindmillQueue::new_cache(2);
        q.push(Bytes::from_static(b"a"));
        q.push(Bytes::from_static(b"b"));
        q.push(Bytes::from_static(b"c"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(Bytes::from_static(b"b")));
        assert_eq!(q.try_pop(), Some(Bytes::from_static(b"c")));
    }

    #[test]
    fn persistent_round_trips_and_drops_oldest() {
        let dir = std::env::temp_dir().join(format!("adanet-queue-test-{}", std::process::id()));
        let q = WindmillQueue::new_persistent(dir.clone(), 2).unwrap();
        q.push(Bytes::from_static(b"1"));
        q.push(Bytes::from_static(b"2"));
        q.push(Bytes::from_static(b"3"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.try_pop(), Some(Bytes::from_static(b"2")));
        assert_eq!(q.try_pop(), Some(Bytes::from_static(b"3")));
        assert!(q.try_pop().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn persistent_tolerates_preexisting_directory() {
        let dir = std::env::temp_dir().join(format!("adanet-queue-preexist-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let q = WindmillQueue::new_persistent(dir.clone(), 4);
        assert!(q.is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
