//! GATT UUIDs, packet tags, sampling constants, and command encoding for the
//! Movesense GSP (Generic Sensor Protocol) service.
//!
//! All UUIDs belong to the Movesense vendor namespace
//! `3480XXXX-7185-4d5d-b431-630e7050e8f0`.

use uuid::Uuid;

// ── Characteristics ───────────────────────────────────────────────────────────

/// Command channel.
///
/// The host writes `{opcode, reference, payload}` frames here to subscribe to
/// or unsubscribe from a measurement path.  See [`encode_command`].
pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x34800001_7185_4d5d_b431_630e7050e8f0);

/// Data channel.
///
/// Every logical IMU frame arrives as two notifications: a [`PACKET_TYPE_DATA`]
/// fragment followed by a [`PACKET_TYPE_DATA_PART2`] fragment.
pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x34800002_7185_4d5d_b431_630e7050e8f0);

/// Default substring matched against advertised device names during the scan.
pub const DEFAULT_NAME_PATTERN: &str = "Movesense";

// ── Packet tags ───────────────────────────────────────────────────────────────

/// First half of a data frame.  Kept whole (header included) during reassembly.
pub const PACKET_TYPE_DATA: u8 = 2;

/// Second half of a data frame.  Its 2-byte header is dropped on reassembly.
pub const PACKET_TYPE_DATA_PART2: u8 = 3;

/// Bytes of `[tag, reference]` that open every notification.
pub const FRAGMENT_HEADER_LEN: usize = 2;

// ── Commands ──────────────────────────────────────────────────────────────────

/// GSP opcode: subscribe to the resource path in the payload.
pub const OPCODE_SUBSCRIBE: u8 = 1;

/// GSP opcode: unsubscribe the subscription identified by the reference byte.
pub const OPCODE_UNSUBSCRIBE: u8 = 2;

/// Client-chosen reference tying a subscription to its data notifications.
pub const IMU_REFERENCE: u8 = 99;

/// Resource path for the accelerometer + gyroscope + magnetometer stream at 104 Hz.
pub const IMU9_104HZ_PATH: &str = "/Meas/IMU9/104";

// ── Sampling constants ────────────────────────────────────────────────────────

/// IMU sample rate in Hz.  One sensor tick is `1 / SAMPLE_RATE_HZ` seconds.
pub const SAMPLE_RATE_HZ: f64 = 104.0;

/// Seconds per tick.
pub const SAMPLE_INTERVAL_SECS: f64 = 1.0 / SAMPLE_RATE_HZ;

/// Samples packed into one reassembled frame.
pub const SAMPLES_PER_FRAME: usize = 8;

// ── Frame layout ──────────────────────────────────────────────────────────────

/// Byte offset of the little-endian `u32` base timestamp.
pub const TIMESTAMP_OFFSET: usize = 2;

/// Byte offset of the first accelerometer triplet.
pub const SAMPLES_OFFSET: usize = 6;

/// Bytes in one XYZ `f32` triplet.
pub const TRIPLET_LEN: usize = 3 * 4;

/// Bytes spanned by all 8 triplets of one sensor (`3 × 8 × 4 = 96`).
///
/// The frame carries 8 accelerometer triplets, then 8 gyroscope triplets, then
/// 8 magnetometer triplets, so the gyro of sample `i` sits one block after its
/// accel and the mag two blocks after.
pub const SENSOR_BLOCK_LEN: usize = TRIPLET_LEN * SAMPLES_PER_FRAME;

/// Minimum reassembled frame length that holds all 8 × 9 floats (294 bytes).
pub const MIN_FRAME_LEN: usize = SAMPLES_OFFSET + 3 * SENSOR_BLOCK_LEN;

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Default capacity of the [`crate::channel::SampleChannel`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 5000;

/// Default length of the [`crate::window::LiveWindowBuffer`].
pub const DEFAULT_WINDOW_LEN: usize = 500;

/// Encode a GSP command for [`WRITE_CHARACTERISTIC`].
///
/// ```text
/// byte 0     : opcode
/// byte 1     : reference
/// bytes 2..N : payload (resource path, UTF-8, no terminator)
/// ```
///
/// # Example
///
/// ```
/// # use movesense_rs::protocol::encode_command;
/// assert_eq!(encode_command(2, 99, ""), vec![2, 99]);
/// assert_eq!(&encode_command(1, 99, "/Meas/IMU9/104")[..4], &[1, 99, b'/', b'M']);
/// ```
pub fn encode_command(opcode: u8, reference: u8, path: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2 + path.len());
    bytes.push(opcode);
    bytes.push(reference);
    bytes.extend_from_slice(path.as_bytes());
    bytes
}

/// Command that starts the 9-axis 104 Hz stream.
pub fn start_imu9_command() -> Vec<u8> {
    encode_command(OPCODE_SUBSCRIBE, IMU_REFERENCE, IMU9_104HZ_PATH)
}

/// Command that stops the stream started by [`start_imu9_command`].
pub fn stop_imu9_command() -> Vec<u8> {
    encode_command(OPCODE_UNSUBSCRIBE, IMU_REFERENCE, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_layout_constants() {
        assert_eq!(SENSOR_BLOCK_LEN, 96);
        assert_eq!(MIN_FRAME_LEN, 294);
    }

    #[test]
    fn start_and_stop_commands() {
        let mut expected = vec![1u8, 99];
        expected.extend_from_slice(b"/Meas/IMU9/104");
        assert_eq!(start_imu9_command(), expected);
        assert_eq!(stop_imu9_command(), vec![2, 99]);
    }
}
