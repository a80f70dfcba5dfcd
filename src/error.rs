//! Error types for frame decoding and the sensor session.

use thiserror::Error;

/// A binary read ran past the end of the buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    #[error("read of {width} bytes at offset {offset} exceeds buffer of {len} bytes")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
}

/// A reassembled frame could not be decoded.  The whole frame is discarded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame truncated: {len} bytes, need at least {required}")]
    Truncated { len: usize, required: usize },

    #[error(transparent)]
    OutOfBounds(#[from] ReadError),
}

/// Lifecycle failure reported by [`crate::sensor_session::BleSensorSession`].
///
/// The `Display` text is meant to be shown to the user as-is.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No device matching \"{pattern}\" found within {timeout_secs} s")]
    DeviceNotFound { pattern: String, timeout_secs: u64 },

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The [`crate::worker::BleWorker`] thread is gone and can no longer
    /// answer commands.
    #[error("BLE worker stopped")]
    WorkerStopped,
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
