//! Fixed-capacity ring of recent channel activations.

use crate::input::Channel;

/// Number of activations kept per session.
pub const HISTORY_CAPACITY: usize = 10;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    slots: [Channel; HISTORY_CAPACITY],
    /// next slot to write
    write: usize,
    /// oldest slot still in the window
    rear: usize,
    len: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self {
            slots: [0; HISTORY_CAPACITY],
            write: 0,
            rear: 0,
            len: 0,
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        HISTORY_CAPACITY
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[cfg(test)]
    pub fn is_full(&self) -> bool {
        self.len == HISTORY_CAPACITY
    }

    /// Overwrites the oldest entry once the ring is full.
    pub fn push(&mut self, channel: Channel) {
        self.slots[self.write] = channel;
        self.write = (self.write + 1) % HISTORY_CAPACITY;
        if self.len == HISTORY_CAPACITY {
            self.rear = (self.rear + 1) % HISTORY_CAPACITY;
        } else {
            self.len += 1;
        }
    }

    pub fn clear(&mut self) {
        self.write = 0;
        self.rear = 0;
        self.len = 0;
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<Channel> {
        self.iter_back().next()
    }

    /// Walks the window from the most recent entry back to the oldest one.
    pub fn iter_back(&self) -> IterBack<'_> {
        IterBack {
            slots: &self.slots,
            cursor: self.write,
            remaining: self.len,
        }
    }
}

pub struct IterBack<'a> {
    slots: &'a [Channel; HISTORY_CAPACITY],
    cursor: usize,
    remaining: usize,
}

impl Iterator for IterBack<'_> {
    type Item = Channel;

    fn next(&mut self) -> Option<Channel> {
        if self.remaining == 0 {
            return None;
        }
        self.cursor = (self.cursor + HISTORY_CAPACITY - 1) % HISTORY_CAPACITY;
        self.remaining -= 1;
        Some(self.slots[self.cursor])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for IterBack<'_> {}
