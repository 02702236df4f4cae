//! In-memory retention buffer
//!
//! Fixed-capacity ring of the most recent entries. Survives start/stop cycles of the
//! collector; only `clear` or eviction removes entries.

use std::collections::VecDeque;
use std::sync::RwLock;

use crate::entry::LogEntry;

/// Default number of entries kept in memory
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Thread-safe ring buffer of recent log entries
pub struct RetentionBuffer {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl RetentionBuffer {
    /// Create a buffer holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Add an entry, evicting the oldest one when full
    pub fn add(&self, entry: LogEntry) {
        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry);
        }
    }

    /// Copy out all retained entries, oldest first
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries
            .read()
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every retained entry
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RetentionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Protocol;
    use std::sync::Arc;

    fn entry(message: impl Into<String>) -> LogEntry {
        LogEntry::new(Protocol::Tcp, "127.0.0.1", message)
    }

    #[test]
    fn test_add_and_snapshot_in_order() {
        let buffer = RetentionBuffer::new(10);
        buffer.add(entry("first"));
        buffer.add(entry("second"));
        buffer.add(entry("third"));

        let entries = buffer.snapshot();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
        assert_eq!(entries[2].message, "third");
    }

    #[test]
    fn test_overflow_keeps_last_entries() {
        let buffer = RetentionBuffer::new(3);
        for i in 0..10 {
            buffer.add(entry(format!("msg {}", i)));
        }

        assert_eq!(buffer.len(), 3);
        let messages: Vec<String> = buffer.snapshot().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["msg 7", "msg 8", "msg 9"]);
    }

    #[test]
    fn test_snapshot_never_exceeds_capacity() {
        for capacity in [1usize, 2, 5, 17] {
            let buffer = RetentionBuffer::new(capacity);
            for n in 0..(capacity * 3 + 1) {
                buffer.add(entry(n.to_string()));
                let snapshot = buffer.snapshot();
                assert!(snapshot.len() <= capacity);

                let expected: Vec<String> = (0..=n)
                    .skip((n + 1).saturating_sub(capacity))
                    .map(|i| i.to_string())
                    .collect();
                let actual: Vec<String> = snapshot.into_iter().map(|e| e.message).collect();
                assert_eq!(actual, expected);
            }
        }
    }

    #[test]
    fn test_snapshot_is_detached_from_buffer() {
        let buffer = RetentionBuffer::new(2);
        buffer.add(entry("a"));
        let snapshot = buffer.snapshot();
        buffer.add(entry("b"));
        buffer.add(entry("c"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "a");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = RetentionBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.add(entry("x"));
        buffer.add(entry("y"));
        assert_eq!(buffer.snapshot()[0].message, "y");
    }

    #[test]
    fn test_clear() {
        let buffer = RetentionBuffer::default();
        assert_eq!(buffer.capacity(), DEFAULT_BUFFER_CAPACITY);
        buffer.add(entry("a"));
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_concurrent_adds() {
        let buffer = Arc::new(RetentionBuffer::new(50));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        buffer.add(entry(format!("{}-{}", t, i)));
                        let _ = buffer.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(buffer.len(), 50);
    }
}
