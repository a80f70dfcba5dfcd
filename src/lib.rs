//! # movesense-rs
//!
//! Async Rust library and CLI for streaming 9-axis IMU data (accelerometer,
//! gyroscope, magnetometer at 104 Hz) from [Movesense](https://www.movesense.com/)
//! sensors over Bluetooth Low Energy.
//!
//! ## Pipeline
//!
//! ```text
//! BLE notification ─▶ PacketReassembler ─▶ decode_frame ─▶ SampleChannel
//!                                                               │
//!                          (consumer thread)  drain_all ◀───────┘
//!                                                │
//!                                                ▼
//!                                         LiveWindowBuffer
//! ```
//!
//! The sensor splits every frame of 8 samples across two notifications.  The
//! notification task reassembles and decodes them synchronously and pushes
//! the samples into a bounded [`channel::SampleChannel`] that drops the newest
//! sample when full, so the BLE side never blocks on a slow consumer.
//!
//! ## Quick start
//!
//! ```no_run
//! use movesense_rs::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let worker = BleWorker::spawn(SessionConfig::default())?;
//!     println!("{}", worker.run_blocking(SessionCommand::Connect)?);
//!     worker.run_blocking(SessionCommand::StartStreaming)?;
//!
//!     let mut consumer = SampleConsumer::new(worker.channel(), DEFAULT_WINDOW_LEN);
//!     loop {
//!         consumer.poll();
//!         if let Some(s) = consumer.window().latest() {
//!             println!("t={:.2}s acc={:?}", s.seconds(), s.accel);
//!         }
//!         std::thread::sleep(std::time::Duration::from_millis(30));
//!     }
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`sensor_session`] | BLE scan / connect / start / stop / disconnect state machine |
//! | [`worker`] | Dedicated BLE thread that runs the session off the UI thread |
//! | [`transport`] | `Connector` / `SensorLink` traits and their btleplug implementation |
//! | [`pipeline`] | Notification handler driving reassembly and decoding |
//! | [`parse`] | Frame reader, fragment reassembler, and IMU frame codec |
//! | [`channel`] | Bounded drop-newest sample queue between threads |
//! | [`window`] | Fixed-length sliding window for live display |
//! | [`consumer`] | Consumer-side poller feeding the window and recordings |
//! | [`simulator`] | Hardware-free sensor stand-in driving the same pipeline |
//! | [`protocol`] | GATT UUIDs, packet tags, commands, and frame layout |
//! | [`types`] | Sample and session state types |
//! | [`error`] | Error types |

pub mod channel;
pub mod consumer;
pub mod error;
pub mod parse;
pub mod pipeline;
pub mod protocol;
pub mod sensor_session;
pub mod simulator;
pub mod transport;
pub mod types;
pub mod window;
pub mod worker;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Session ───────────────────────────────────────────────────────────────
    pub use crate::sensor_session::{BleSensorSession, SessionConfig};
    pub use crate::transport::{BtleConnector, Connector, SensorLink};
    pub use crate::worker::{BleWorker, CommandOutcome, SessionCommand};

    // ── Data path ─────────────────────────────────────────────────────────────
    pub use crate::channel::SampleChannel;
    pub use crate::consumer::SampleConsumer;
    pub use crate::window::LiveWindowBuffer;

    // ── Types and errors ──────────────────────────────────────────────────────
    pub use crate::error::{DecodeError, ReadError, SessionError};
    pub use crate::types::{ConnectedDevice, ImuSample, SessionState};

    // ── Protocol constants ────────────────────────────────────────────────────
    pub use crate::protocol::{
        DEFAULT_CHANNEL_CAPACITY, DEFAULT_WINDOW_LEN, SAMPLES_PER_FRAME, SAMPLE_RATE_HZ,
    };
}
