use crate::protocol::SAMPLE_INTERVAL_SECS;

/// One timestamped 9-axis reading.
///
/// Eight of these are packed into every reassembled frame.  The sensor only
/// timestamps the frame, so `sequence_timestamp` is the frame's base tick plus
/// the sample's index within it; spacing inside a frame is assumed uniform at
/// 104 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuSample {
    /// Sensor tick (1 tick = 1/104 s).
    pub sequence_timestamp: u32,
    /// Accelerometer XYZ in m/s².
    pub accel: [f32; 3],
    /// Gyroscope XYZ in °/s.
    pub gyro: [f32; 3],
    /// Magnetometer XYZ in µT.
    pub mag: [f32; 3],
}

impl ImuSample {
    /// Sample time in seconds on the sensor's clock.
    pub fn seconds(&self) -> f64 {
        self.sequence_timestamp as f64 * SAMPLE_INTERVAL_SECS
    }
}

/// Lifecycle of a [`crate::sensor_session::BleSensorSession`].
///
/// `Connecting` and `Stopping` are transient; they are only observable while
/// the corresponding operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Streaming,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Connected => "Connected",
            SessionState::Streaming => "Streaming",
            SessionState::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}

/// A sensor the session is connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedDevice {
    /// Advertised name, e.g. `"Movesense 174630000192"`.
    pub name: String,
    /// Platform BLE identifier (MAC on Linux, UUID on macOS / Windows).
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_uses_104_hz_ticks() {
        let s = ImuSample {
            sequence_timestamp: 208,
            ..Default::default()
        };
        assert!((s.seconds() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn state_display() {
        assert_eq!(SessionState::Streaming.to_string(), "Streaming");
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }
}
