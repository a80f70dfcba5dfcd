//! Notification handler: fragment → frame → samples → [`SampleChannel`].

use log::{debug, info, warn};

use crate::channel::SampleChannel;
use crate::parse::{decode_frame, PacketReassembler};

/// Counters kept by a [`NotificationPipeline`] for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub notifications: u64,
    pub frames: u64,
    pub decode_errors: u64,
    pub samples_pushed: u64,
    pub samples_dropped: u64,
}

/// Owns the reassembly state for one streaming run and pushes decoded
/// samples into the shared channel.
///
/// Every call to [`handle`](Self::handle) runs to completion synchronously,
/// so aborting the task that drives it can only happen between
/// notifications, never halfway through a frame.
pub struct NotificationPipeline {
    reassembler: PacketReassembler,
    channel: SampleChannel,
    stats: PipelineStats,
}

impl NotificationPipeline {
    pub fn new(channel: SampleChannel) -> Self {
        Self {
            reassembler: PacketReassembler::new(),
            channel,
            stats: PipelineStats::default(),
        }
    }

    /// Process one raw notification; returns the number of samples enqueued.
    pub fn handle(&mut self, data: &[u8]) -> usize {
        self.stats.notifications += 1;
        let n = self.stats.notifications;
        if n <= 3 || n % 500 == 0 {
            info!("notif #{n} len={} (frames: {})", data.len(), self.stats.frames);
        }

        let Some(frame) = self.reassembler.on_fragment(data) else {
            return 0;
        };
        self.stats.frames += 1;

        let samples = match decode_frame(frame.as_bytes()) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.decode_errors += 1;
                warn!("Dropping frame #{}: {e}", self.stats.frames);
                return 0;
            }
        };

        let mut pushed = 0;
        for sample in samples {
            if self.channel.try_push(sample) {
                pushed += 1;
            } else {
                self.stats.samples_dropped += 1;
                let dropped = self.stats.samples_dropped;
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!("Sample channel full: {dropped} sample(s) dropped so far");
                }
            }
        }
        self.stats.samples_pushed += pushed as u64;
        debug!(
            "frame ts={} → {pushed} sample(s)",
            samples[0].sequence_timestamp
        );
        pushed
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{encode_frame, split_frame};
    use crate::protocol::{IMU_REFERENCE, PACKET_TYPE_DATA, PACKET_TYPE_DATA_PART2};
    use crate::types::ImuSample;

    fn fragments(base: u32) -> (Vec<u8>, Vec<u8>) {
        let samples: [ImuSample; 8] = std::array::from_fn(|i| ImuSample {
            sequence_timestamp: base + i as u32,
            accel: [i as f32, 0.0, 0.0],
            ..Default::default()
        });
        split_frame(&encode_frame(&samples, IMU_REFERENCE), 160)
    }

    #[test]
    fn pair_enqueues_eight_samples_in_order() {
        let ch = SampleChannel::new(64);
        let mut p = NotificationPipeline::new(ch.clone());
        let (a, b) = fragments(300);
        assert_eq!(p.handle(&a), 0);
        assert_eq!(p.handle(&b), 8);

        let ts: Vec<u32> = ch.drain_all().iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, (300..308).collect::<Vec<_>>());
        assert_eq!(p.stats().frames, 1);
        assert_eq!(p.stats().samples_pushed, 8);
    }

    #[test]
    fn truncated_frame_enqueues_nothing() {
        let ch = SampleChannel::new(64);
        let mut p = NotificationPipeline::new(ch.clone());
        p.handle(&[PACKET_TYPE_DATA, IMU_REFERENCE, 1, 2, 3, 4]);
        assert_eq!(p.handle(&[PACKET_TYPE_DATA_PART2, IMU_REFERENCE, 5, 6]), 0);
        assert!(ch.is_empty());
        assert_eq!(p.stats().decode_errors, 1);

        // The session keeps going after a bad frame.
        let (a, b) = fragments(0);
        p.handle(&a);
        assert_eq!(p.handle(&b), 8);
    }

    #[test]
    fn full_channel_drops_tail_of_frame() {
        let ch = SampleChannel::new(5);
        let mut p = NotificationPipeline::new(ch.clone());
        let (a, b) = fragments(10);
        p.handle(&a);
        assert_eq!(p.handle(&b), 5);
        assert_eq!(p.stats().samples_dropped, 3);
        let ts: Vec<u32> = ch.drain_all().iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn frames_follow_arrival_order() {
        let ch = SampleChannel::new(64);
        let mut p = NotificationPipeline::new(ch.clone());
        for base in [800, 808, 816] {
            let (a, b) = fragments(base);
            p.handle(&a);
            p.handle(&b);
        }
        let ts: Vec<u32> = ch.drain_all().iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, (800..824).collect::<Vec<_>>());
    }
}
