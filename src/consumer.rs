//! Consumer-side polling: channel → live window (+ optional recording).

use log::info;

use crate::channel::SampleChannel;
use crate::types::ImuSample;
use crate::window::LiveWindowBuffer;

/// Drains a [`SampleChannel`] on the consumer thread.
///
/// Meant to be called from a UI refresh loop every few tens of milliseconds.
/// Each poll appends everything new to the [`LiveWindowBuffer`] and, while
/// recording, to an in-memory recording that the caller can persist however
/// it likes.
pub struct SampleConsumer {
    channel: SampleChannel,
    window: LiveWindowBuffer,
    recording: Option<Vec<ImuSample>>,
    total: u64,
}

impl SampleConsumer {
    pub fn new(channel: SampleChannel, window_len: usize) -> Self {
        Self {
            channel,
            window: LiveWindowBuffer::new(window_len),
            recording: None,
            total: 0,
        }
    }

    /// Move all pending samples into the window; returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let samples = self.channel.drain_all();
        if let Some(rec) = self.recording.as_mut() {
            rec.extend_from_slice(&samples);
        }
        let n = samples.len();
        self.window.extend(samples);
        self.total += n as u64;
        n
    }

    pub fn window(&self) -> &LiveWindowBuffer {
        &self.window
    }

    /// Samples received since construction.
    pub fn total_received(&self) -> u64 {
        self.total
    }

    /// Start a fresh recording, discarding any unfinished one.
    pub fn start_recording(&mut self) {
        self.recording = Some(Vec::new());
        info!("Recording started");
    }

    /// Finish the recording and hand back what was captured.
    pub fn stop_recording(&mut self) -> Vec<ImuSample> {
        let rec = self.recording.take().unwrap_or_default();
        info!("Recording stopped: {} sample(s)", rec.len());
        rec
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    pub fn recorded_len(&self) -> usize {
        self.recording.as_ref().map_or(0, Vec::len)
    }

    /// Blank the live window, e.g. after a reconnect.
    pub fn clear_window(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(ch: &SampleChannel, range: std::ops::Range<u32>) {
        for ts in range {
            ch.try_push(ImuSample {
                sequence_timestamp: ts,
                ..Default::default()
            });
        }
    }

    #[test]
    fn poll_fills_window() {
        let ch = SampleChannel::new(100);
        let mut c = SampleConsumer::new(ch.clone(), 10);
        assert_eq!(c.poll(), 0);
        push(&ch, 0..25);
        assert_eq!(c.poll(), 25);
        assert_eq!(c.total_received(), 25);
        let ts: Vec<u32> = c.window().iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, (15..25).collect::<Vec<_>>());
        assert!(ch.is_empty());
    }

    #[test]
    fn recording_captures_only_while_active() {
        let ch = SampleChannel::new(100);
        let mut c = SampleConsumer::new(ch.clone(), 4);
        push(&ch, 0..3);
        c.poll();

        c.start_recording();
        push(&ch, 3..9);
        c.poll();
        assert_eq!(c.recorded_len(), 6);
        let rec = c.stop_recording();
        assert!(!c.is_recording());

        push(&ch, 9..12);
        c.poll();
        let ts: Vec<u32> = rec.iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, (3..9).collect::<Vec<_>>());
        assert!(c.stop_recording().is_empty());
    }
}
