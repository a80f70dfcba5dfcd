use std::collections::VecDeque;

use crate::types::ImuSample;

/// Fixed-length sliding window of the most recent samples.
///
/// Consumer-side only; the BLE task never touches it.  Once `capacity`
/// samples have been appended, each new one evicts the oldest.
#[derive(Debug, Clone)]
pub struct LiveWindowBuffer {
    buf: VecDeque<ImuSample>,
    capacity: usize,
}

impl LiveWindowBuffer {
    /// Create a window of `capacity` samples (at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, sample: ImuSample) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    pub fn extend<I: IntoIterator<Item = ImuSample>>(&mut self, samples: I) {
        for s in samples {
            self.append(s);
        }
    }

    /// Up to `capacity` samples, oldest first.
    pub fn snapshot(&self) -> Vec<ImuSample> {
        self.buf.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImuSample> + '_ {
        self.buf.iter()
    }

    pub fn latest(&self) -> Option<&ImuSample> {
        self.buf.back()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.buf.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for LiveWindowBuffer {
    fn default() -> Self {
        Self::new(crate::protocol::DEFAULT_WINDOW_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u32) -> ImuSample {
        ImuSample {
            sequence_timestamp: ts,
            ..Default::default()
        }
    }

    fn stamps(w: &LiveWindowBuffer) -> Vec<u32> {
        w.snapshot().iter().map(|s| s.sequence_timestamp).collect()
    }

    #[test]
    fn partial_window_returns_only_written_entries() {
        let mut w = LiveWindowBuffer::new(5);
        assert!(w.snapshot().is_empty());
        w.extend((0..3).map(sample));
        assert_eq!(stamps(&w), vec![0, 1, 2]);
        assert!(!w.is_full());
    }

    #[test]
    fn overflow_keeps_most_recent_in_order() {
        let mut w = LiveWindowBuffer::new(4);
        w.extend((0..11).map(sample));
        assert_eq!(w.len(), 4);
        assert!(w.is_full());
        assert_eq!(stamps(&w), vec![7, 8, 9, 10]);
        assert_eq!(w.latest().map(|s| s.sequence_timestamp), Some(10));
    }

    #[test]
    fn clear_resets() {
        let mut w = LiveWindowBuffer::new(2);
        w.extend((0..5).map(sample));
        w.clear();
        assert!(w.is_empty());
        w.append(sample(42));
        assert_eq!(stamps(&w), vec![42]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut w = LiveWindowBuffer::new(0);
        assert_eq!(w.capacity(), 1);
        w.append(sample(1));
        w.append(sample(2));
        assert_eq!(stamps(&w), vec![2]);
    }
}
