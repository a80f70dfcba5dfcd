//! A stand-in sensor for running the consumer path without hardware.
//!
//! Frames are synthesised at the real rate, split into `DATA` /
//! `DATA_PART2` notification pairs and fed through the same
//! [`NotificationPipeline`] the BLE session uses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::info;

use crate::channel::SampleChannel;
use crate::error::SessionError;
use crate::parse::{encode_frame, split_frame};
use crate::pipeline::NotificationPipeline;
use crate::protocol::{IMU_REFERENCE, SAMPLES_PER_FRAME, SAMPLE_INTERVAL_SECS};
use crate::types::{ImuSample, SessionState};
use crate::worker::{CommandOutcome, SessionCommand};

/// Where each frame is cut into its two notifications.
pub const SPLIT_AT: usize = 150;

/// Simulated sensor with the same command semantics as a real session.
///
/// The feeder thread holds the `streaming` lock for the whole of each frame,
/// so once a stop or disconnect has taken the lock no further sample of the
/// run can be pushed.
pub struct Simulator {
    channel: SampleChannel,
    connected: bool,
    streaming: Arc<Mutex<bool>>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Simulator {
    pub fn spawn(capacity: usize) -> Self {
        let channel = SampleChannel::new(capacity);
        let streaming = Arc::new(Mutex::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = {
            let channel = channel.clone();
            let streaming = Arc::clone(&streaming);
            let stop = Arc::clone(&stop);
            thread::spawn(move || feed(channel, &streaming, &stop))
        };

        Self {
            channel,
            connected: false,
            streaming,
            stop,
            thread: Some(thread),
        }
    }

    pub fn channel(&self) -> SampleChannel {
        self.channel.clone()
    }

    pub fn state(&self) -> SessionState {
        match (self.connected, *lock(&self.streaming)) {
            (false, _) => SessionState::Disconnected,
            (true, false) => SessionState::Connected,
            (true, true) => SessionState::Streaming,
        }
    }

    /// Apply a lifecycle command; outcomes match
    /// [`worker::execute`](crate::worker::execute).
    pub fn apply(&mut self, command: SessionCommand) -> CommandOutcome {
        match (command, self.state()) {
            (SessionCommand::Connect, SessionState::Disconnected) => {
                self.connected = true;
                Ok("Connected: Movesense (simulated)".into())
            }
            (SessionCommand::Connect, _) => Err(SessionError::AlreadyConnected),
            (SessionCommand::StartStreaming, SessionState::Disconnected) => {
                Err(SessionError::NotConnected)
            }
            (SessionCommand::StartStreaming, _) => {
                *lock(&self.streaming) = true;
                Ok("Streaming".into())
            }
            (SessionCommand::StopStreaming, SessionState::Streaming) => {
                *lock(&self.streaming) = false;
                Ok("Stopped".into())
            }
            (SessionCommand::StopStreaming, _) => Err(SessionError::NotConnected),
            (SessionCommand::Disconnect, _) => {
                let mut streaming = lock(&self.streaming);
                *streaming = false;
                self.channel.clear();
                drop(streaming);
                self.connected = false;
                Ok("Disconnected".into())
            }
        }
    }

    pub fn shutdown(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.halt();
    }
}

fn lock(streaming: &Mutex<bool>) -> MutexGuard<'_, bool> {
    streaming.lock().unwrap_or_else(PoisonError::into_inner)
}

fn feed(channel: SampleChannel, streaming: &Mutex<bool>, stop: &AtomicBool) {
    let mut pipeline = NotificationPipeline::new(channel);
    let period = Duration::from_secs_f64(SAMPLES_PER_FRAME as f64 * SAMPLE_INTERVAL_SECS);
    let mut tick: u32 = 0;
    info!("Simulator running at {:.1} frames/s", 1.0 / period.as_secs_f64());

    while !stop.load(Ordering::Relaxed) {
        {
            let streaming = lock(streaming);
            if *streaming {
                let samples: [ImuSample; SAMPLES_PER_FRAME] =
                    std::array::from_fn(|i| sample_at(tick.wrapping_add(i as u32)));
                let frame = encode_frame(&samples, IMU_REFERENCE);
                let (first, second) = split_frame(&frame, SPLIT_AT);
                pipeline.handle(&first);
                pipeline.handle(&second);
                tick = tick.wrapping_add(SAMPLES_PER_FRAME as u32);
            }
        }
        thread::sleep(period);
    }
}

/// A sensor lying still, slightly rocking about X.
fn sample_at(tick: u32) -> ImuSample {
    use std::f32::consts::PI;

    let t = (tick as f64 * SAMPLE_INTERVAL_SECS) as f32;
    let rock = (2.0 * PI * 0.5 * t).sin();
    ImuSample {
        sequence_timestamp: tick,
        accel: [0.2 * rock, 0.05 * (2.0 * PI * 1.3 * t).cos(), 9.81],
        gyro: [45.0 * PI * 0.5 * (2.0 * PI * 0.5 * t).cos(), 0.0, 0.3 * rock],
        mag: [22.0, -4.0 + 2.0 * rock, 41.0],
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn wait_for_samples(channel: &SampleChannel, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while channel.len() < n {
            assert!(Instant::now() < deadline, "simulator produced no samples");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn commands_follow_session_rules() {
        let mut sim = Simulator::spawn(64);
        assert_eq!(sim.apply(SessionCommand::StartStreaming), Err(SessionError::NotConnected));
        assert_eq!(sim.apply(SessionCommand::StopStreaming), Err(SessionError::NotConnected));
        assert!(sim.apply(SessionCommand::Connect).is_ok());
        assert_eq!(sim.apply(SessionCommand::Connect), Err(SessionError::AlreadyConnected));
        assert_eq!(sim.state(), SessionState::Connected);
        sim.shutdown();
    }

    #[test]
    fn streams_consecutive_timestamps() {
        let mut sim = Simulator::spawn(1000);
        let channel = sim.channel();
        sim.apply(SessionCommand::Connect).unwrap();
        sim.apply(SessionCommand::StartStreaming).unwrap();
        wait_for_samples(&channel, 16);
        assert_eq!(sim.apply(SessionCommand::StopStreaming), Ok("Stopped".to_owned()));

        let samples = channel.drain_all();
        assert_eq!(samples.len() % SAMPLES_PER_FRAME, 0);
        for (i, s) in samples.iter().enumerate() {
            assert_eq!(s.sequence_timestamp, i as u32);
        }
    }

    #[test]
    fn disconnect_leaves_no_stale_samples() {
        let mut sim = Simulator::spawn(1000);
        let channel = sim.channel();
        sim.apply(SessionCommand::Connect).unwrap();
        sim.apply(SessionCommand::StartStreaming).unwrap();
        wait_for_samples(&channel, 8);

        sim.apply(SessionCommand::Disconnect).unwrap();
        assert!(channel.is_empty());
        assert_eq!(sim.state(), SessionState::Disconnected);

        thread::sleep(Duration::from_millis(250));
        assert!(channel.is_empty());
    }
}
