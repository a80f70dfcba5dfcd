//! Bounded hand-off of decoded samples from the BLE notification task to the
//! consumer thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::types::ImuSample;

/// Bounded FIFO of [`ImuSample`]s with a drop-newest overflow policy.
///
/// Cloning yields another handle to the same queue: the session keeps one to
/// push into, the consumer keeps one to drain.  `try_push` never blocks and
/// never grows the queue beyond the capacity given at construction.
#[derive(Clone, Debug)]
pub struct SampleChannel {
    tx: Sender<ImuSample>,
    rx: Receiver<ImuSample>,
    dropped: Arc<AtomicU64>,
}

impl SampleChannel {
    /// Create a channel holding at most `capacity` samples (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self {
            tx,
            rx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Enqueue `sample`; returns `false` if the queue was full and the sample
    /// was discarded.
    pub fn try_push(&self, sample: ImuSample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            // Both ends live in `self`, so Disconnected cannot happen here.
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Take everything currently queued, oldest first.  Never blocks.
    pub fn drain_all(&self) -> Vec<ImuSample> {
        self.rx.try_iter().collect()
    }

    /// Discard everything currently queued.
    pub fn clear(&self) {
        for _ in self.rx.try_iter() {}
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        // `bounded` always reports Some.
        self.tx.capacity().unwrap_or(0)
    }

    /// Samples rejected by [`try_push`](Self::try_push) since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SampleChannel {
    fn default() -> Self {
        Self::new(crate::protocol::DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn sample(ts: u32) -> ImuSample {
        ImuSample {
            sequence_timestamp: ts,
            ..Default::default()
        }
    }

    #[test]
    fn overflow_drops_newest() {
        let ch = SampleChannel::new(10);
        let accepted: Vec<bool> = (0..15).map(|i| ch.try_push(sample(i))).collect();
        assert_eq!(accepted.iter().filter(|&&ok| ok).count(), 10);
        assert!(accepted[10..].iter().all(|&ok| !ok));
        assert_eq!(ch.dropped(), 5);

        let ts: Vec<u32> = ch.drain_all().iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, (0..10).collect::<Vec<_>>());
        assert!(ch.is_empty());
    }

    #[test]
    fn drain_is_fifo_and_nonblocking() {
        let ch = SampleChannel::new(4);
        assert!(ch.drain_all().is_empty());
        ch.try_push(sample(3));
        ch.try_push(sample(1));
        assert_eq!(ch.len(), 2);
        let ts: Vec<u32> = ch.drain_all().iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, vec![3, 1]);
        assert!(ch.drain_all().is_empty());
    }

    #[test]
    fn clear_empties_and_frees_capacity() {
        let ch = SampleChannel::new(2);
        ch.try_push(sample(1));
        ch.try_push(sample(2));
        assert!(!ch.try_push(sample(3)));
        ch.clear();
        assert!(ch.is_empty());
        assert!(ch.try_push(sample(4)));
        assert_eq!(ch.drain_all()[0].sequence_timestamp, 4);
    }

    #[test]
    fn clones_share_the_queue() {
        let producer = SampleChannel::new(8);
        let consumer = producer.clone();
        producer.try_push(sample(9));
        assert_eq!(consumer.drain_all().len(), 1);
        assert_eq!(consumer.capacity(), 8);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let ch = SampleChannel::new(0);
        assert_eq!(ch.capacity(), 1);
        assert!(ch.try_push(sample(0)));
        assert!(!ch.try_push(sample(1)));
    }

    #[test]
    fn concurrent_producer_and_consumer_preserve_order() {
        let ch = SampleChannel::new(10_000);
        let producer = ch.clone();
        let handle = thread::spawn(move || {
            for i in 0..5_000 {
                assert!(producer.try_push(sample(i)));
            }
        });

        let mut seen = Vec::new();
        while seen.len() < 5_000 {
            seen.extend(ch.drain_all().into_iter().map(|s| s.sequence_timestamp));
            thread::yield_now();
        }
        handle.join().unwrap();
        assert_eq!(seen, (0..5_000).collect::<Vec<_>>());
    }
}
