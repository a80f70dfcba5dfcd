//! Binary decoders for Movesense BLE notification payloads.
//!
//! Everything in this module is pure or owns its state explicitly; nothing
//! here performs I/O, so it is safe to call from the notification task, the
//! simulator, or a test.
//!
//! # Wire format
//!
//! One logical IMU frame is split by the sensor across two notifications:
//!
//! | Fragment | Tag | Kept on reassembly |
//! |---|---|---|
//! | part 1 | [`PACKET_TYPE_DATA`] (2) | whole fragment, header included |
//! | part 2 | [`PACKET_TYPE_DATA_PART2`] (3) | everything after the 2-byte header |
//!
//! The reassembled frame then reads as:
//!
//! ```text
//! [0]        packet type (2)
//! [1]        subscription reference
//! [2..6]     u32 LE base timestamp (ticks)
//! [6..102]   8 × accel XYZ  (f32 LE)
//! [102..198] 8 × gyro  XYZ  (f32 LE)
//! [198..294] 8 × mag   XYZ  (f32 LE)
//! ```

use log::debug;

use crate::error::{DecodeError, ReadError};
use crate::protocol::{
    FRAGMENT_HEADER_LEN, MIN_FRAME_LEN, PACKET_TYPE_DATA, PACKET_TYPE_DATA_PART2,
    SAMPLES_OFFSET, SAMPLES_PER_FRAME, SENSOR_BLOCK_LEN, TIMESTAMP_OFFSET, TRIPLET_LEN,
};
use crate::types::ImuSample;

// ── FrameReader ───────────────────────────────────────────────────────────────

/// Little-endian reads at arbitrary byte offsets over a borrowed buffer.
///
/// Every read is bounds-checked and fails with [`ReadError::OutOfBounds`]
/// instead of panicking.
#[derive(Debug, Clone, Copy)]
pub struct FrameReader<'a> {
    data: &'a [u8],
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Result<[u8; N], ReadError> {
        offset
            .checked_add(N)
            .and_then(|end| self.data.get(offset..end))
            .and_then(|b| b.try_into().ok())
            .ok_or(ReadError::OutOfBounds {
                offset,
                width: N,
                len: self.data.len(),
            })
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, ReadError> {
        self.bytes::<1>(offset).map(|b| b[0])
    }

    pub fn read_u32_le(&self, offset: usize) -> Result<u32, ReadError> {
        self.bytes::<4>(offset).map(u32::from_le_bytes)
    }

    pub fn read_f32_le(&self, offset: usize) -> Result<f32, ReadError> {
        self.bytes::<4>(offset).map(f32::from_le_bytes)
    }

    /// Three consecutive `f32` values starting at `offset`.
    pub fn read_xyz(&self, offset: usize) -> Result<[f32; 3], ReadError> {
        Ok([
            self.read_f32_le(offset)?,
            self.read_f32_le(offset + 4)?,
            self.read_f32_le(offset + 8)?,
        ])
    }
}

// ── Reassembly ────────────────────────────────────────────────────────────────

/// One logical frame rebuilt from a `DATA` / `DATA_PART2` fragment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembledFrame(Vec<u8>);

impl ReassembledFrame {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for ReassembledFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ReassembledFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Pairs `DATA` fragments with the `DATA_PART2` fragment that follows them.
///
/// Two states: idle, or holding one pending `DATA` fragment.  A second `DATA`
/// replaces the pending one; a `DATA_PART2` with nothing pending is dropped.
/// Unknown tags and fragments shorter than the header are ignored.
#[derive(Debug, Default)]
pub struct PacketReassembler {
    pending: Option<Vec<u8>>,
}

impl PacketReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one notification; returns a frame when a pair completes.
    pub fn on_fragment(&mut self, fragment: &[u8]) -> Option<ReassembledFrame> {
        if fragment.len() < FRAGMENT_HEADER_LEN {
            debug!("ignoring {}-byte fragment", fragment.len());
            return None;
        }
        match fragment[0] {
            PACKET_TYPE_DATA => {
                if self.pending.replace(fragment.to_vec()).is_some() {
                    debug!("unpaired DATA fragment replaced");
                }
                None
            }
            PACKET_TYPE_DATA_PART2 => {
                let Some(mut frame) = self.pending.take() else {
                    debug!("DATA_PART2 without a pending DATA fragment dropped");
                    return None;
                };
                frame.extend_from_slice(&fragment[FRAGMENT_HEADER_LEN..]);
                Some(ReassembledFrame(frame))
            }
            tag => {
                debug!("ignoring packet type {tag}");
                None
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Forget any pending fragment.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Decode a reassembled frame into its 8 samples.
///
/// The length is checked once up front so that a frame either yields all 8
/// samples or none.  Sample `i` is stamped `base + i` (wrapping).
pub fn decode_frame(frame: &[u8]) -> Result<[ImuSample; SAMPLES_PER_FRAME], DecodeError> {
    if frame.len() < MIN_FRAME_LEN {
        return Err(DecodeError::Truncated {
            len: frame.len(),
            required: MIN_FRAME_LEN,
        });
    }
    let reader = FrameReader::new(frame);
    let base = reader.read_u32_le(TIMESTAMP_OFFSET)?;

    let mut samples = [ImuSample::default(); SAMPLES_PER_FRAME];
    for (i, sample) in samples.iter_mut().enumerate() {
        let offset = SAMPLES_OFFSET + i * TRIPLET_LEN;
        *sample = ImuSample {
            sequence_timestamp: base.wrapping_add(i as u32),
            accel: reader.read_xyz(offset)?,
            gyro: reader.read_xyz(offset + SENSOR_BLOCK_LEN)?,
            mag: reader.read_xyz(offset + 2 * SENSOR_BLOCK_LEN)?,
        };
    }
    Ok(samples)
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Lay out 8 samples in the reassembled-frame format.
///
/// The base timestamp is taken from `samples[0]`; the other timestamps are
/// implied by position, as on the wire.
pub fn encode_frame(samples: &[ImuSample; SAMPLES_PER_FRAME], reference: u8) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN);
    frame.push(PACKET_TYPE_DATA);
    frame.push(reference);
    frame.extend_from_slice(&samples[0].sequence_timestamp.to_le_bytes());
    let blocks: [fn(&ImuSample) -> [f32; 3]; 3] = [|s| s.accel, |s| s.gyro, |s| s.mag];
    for pick in blocks {
        for sample in samples {
            for v in pick(sample) {
                frame.extend_from_slice(&v.to_le_bytes());
            }
        }
    }
    frame
}

/// Split an encoded frame into the `DATA` / `DATA_PART2` notification pair the
/// sensor would send, cutting at byte `at` (clamped to the frame).
pub fn split_frame(frame: &[u8], at: usize) -> (Vec<u8>, Vec<u8>) {
    let at = at.clamp(FRAGMENT_HEADER_LEN.min(frame.len()), frame.len());
    let reference = frame.get(1).copied().unwrap_or(0);

    let first = frame[..at].to_vec();
    let mut second = Vec::with_capacity(FRAGMENT_HEADER_LEN + frame.len() - at);
    second.push(PACKET_TYPE_DATA_PART2);
    second.push(reference);
    second.extend_from_slice(&frame[at..]);
    (first, second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::IMU_REFERENCE;

    fn frame_with(base: u32, fill: impl Fn(usize) -> ImuSample) -> [ImuSample; 8] {
        let mut samples: [ImuSample; 8] = std::array::from_fn(fill);
        for (i, s) in samples.iter_mut().enumerate() {
            s.sequence_timestamp = base.wrapping_add(i as u32);
        }
        samples
    }

    fn varied(i: usize) -> ImuSample {
        let f = i as f32;
        ImuSample {
            sequence_timestamp: 0,
            accel: [f, -f, 9.81 + f],
            gyro: [0.5 * f, 1.25, -3.0 * f],
            mag: [f32::MIN_POSITIVE, 42.0 + f, -0.0],
        }
    }

    // ── FrameReader ───────────────────────────────────────────────────────────

    #[test]
    fn reader_reads_little_endian() {
        let mut buf = vec![7u8];
        buf.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        buf.extend_from_slice(&1.5f32.to_le_bytes());
        let r = FrameReader::new(&buf);
        assert_eq!(r.read_u8(0), Ok(7));
        assert_eq!(r.read_u32_le(1), Ok(0xDEAD_BEEF));
        assert_eq!(r.read_f32_le(5), Ok(1.5));
    }

    #[test]
    fn reader_rejects_reads_past_end() {
        let buf = [0u8; 6];
        let r = FrameReader::new(&buf);
        assert_eq!(
            r.read_u32_le(3),
            Err(ReadError::OutOfBounds {
                offset: 3,
                width: 4,
                len: 6
            })
        );
        assert!(r.read_u8(6).is_err());
        assert!(r.read_f32_le(usize::MAX).is_err());
        assert!(r.read_u32_le(2).is_ok());
    }

    // ── PacketReassembler ─────────────────────────────────────────────────────

    #[test]
    fn lone_part2_yields_nothing() {
        let mut r = PacketReassembler::new();
        assert!(r.on_fragment(&[PACKET_TYPE_DATA_PART2, 99, 1, 2, 3]).is_none());
        assert!(!r.has_pending());
    }

    #[test]
    fn pair_concatenates_without_part2_header() {
        let mut r = PacketReassembler::new();
        assert!(r.on_fragment(&[PACKET_TYPE_DATA, 99, 10, 11]).is_none());
        assert!(r.has_pending());
        let frame = r.on_fragment(&[PACKET_TYPE_DATA_PART2, 99, 12, 13]).unwrap();
        assert_eq!(frame.as_bytes(), &[PACKET_TYPE_DATA, 99, 10, 11, 12, 13]);
        assert!(!r.has_pending());
        // The pending slot is consumed: a repeated part 2 is an orphan.
        assert!(r.on_fragment(&[PACKET_TYPE_DATA_PART2, 99, 12, 13]).is_none());
    }

    #[test]
    fn second_data_replaces_first() {
        let mut r = PacketReassembler::new();
        r.on_fragment(&[PACKET_TYPE_DATA, 99, 1]);
        r.on_fragment(&[PACKET_TYPE_DATA, 99, 2]);
        let frame = r.on_fragment(&[PACKET_TYPE_DATA_PART2, 99, 3]).unwrap();
        assert_eq!(frame.as_bytes(), &[PACKET_TYPE_DATA, 99, 2, 3]);
    }

    #[test]
    fn unknown_and_short_fragments_are_ignored() {
        let mut r = PacketReassembler::new();
        r.on_fragment(&[PACKET_TYPE_DATA, 99, 1]);
        assert!(r.on_fragment(&[]).is_none());
        assert!(r.on_fragment(&[PACKET_TYPE_DATA_PART2]).is_none());
        assert!(r.on_fragment(&[1, 99, 0, 0]).is_none());
        assert!(r.on_fragment(&[0x7f, 0]).is_none());
        // Still pending after all the noise.
        let frame = r.on_fragment(&[PACKET_TYPE_DATA_PART2, 99, 4]).unwrap();
        assert_eq!(frame.as_bytes(), &[PACKET_TYPE_DATA, 99, 1, 4]);
    }

    #[test]
    fn reset_drops_pending() {
        let mut r = PacketReassembler::new();
        r.on_fragment(&[PACKET_TYPE_DATA, 99, 1]);
        r.reset();
        assert!(r.on_fragment(&[PACKET_TYPE_DATA_PART2, 99, 2]).is_none());
    }

    // ── decode_frame ──────────────────────────────────────────────────────────

    #[test]
    fn decodes_first_sample_accel() {
        let mut frame = vec![0u8; MIN_FRAME_LEN];
        frame[0] = PACKET_TYPE_DATA;
        frame[1] = IMU_REFERENCE;
        frame[2..6].copy_from_slice(&1000u32.to_le_bytes());
        frame[6..10].copy_from_slice(&1.0f32.to_le_bytes());
        frame[10..14].copy_from_slice(&2.0f32.to_le_bytes());
        frame[14..18].copy_from_slice(&3.0f32.to_le_bytes());

        let samples = decode_frame(&frame).unwrap();
        assert_eq!(samples[0].sequence_timestamp, 1000);
        assert_eq!(samples[0].accel, [1.0, 2.0, 3.0]);
        assert_eq!(samples[0].gyro, [0.0; 3]);
        assert_eq!(samples[0].mag, [0.0; 3]);
        assert_eq!(samples[1].accel, [0.0; 3]);
    }

    #[test]
    fn timestamps_are_consecutive() {
        let frame = encode_frame(&frame_with(5000, varied), IMU_REFERENCE);
        let samples = decode_frame(&frame).unwrap();
        let ts: Vec<u32> = samples.iter().map(|s| s.sequence_timestamp).collect();
        assert_eq!(ts, (5000..5008).collect::<Vec<_>>());
    }

    #[test]
    fn timestamps_wrap_at_u32_max() {
        let frame = encode_frame(&frame_with(u32::MAX - 2, varied), IMU_REFERENCE);
        let samples = decode_frame(&frame).unwrap();
        assert_eq!(samples[2].sequence_timestamp, u32::MAX);
        assert_eq!(samples[3].sequence_timestamp, 0);
        assert_eq!(samples[7].sequence_timestamp, 4);
    }

    #[test]
    fn gyro_and_mag_use_block_strides() {
        let mut frame = vec![0u8; MIN_FRAME_LEN];
        // Sample 3: gyro x at 6 + 36 + 96, mag z at 6 + 36 + 192 + 8.
        frame[138..142].copy_from_slice(&(-7.5f32).to_le_bytes());
        frame[242..246].copy_from_slice(&12.25f32.to_le_bytes());
        let samples = decode_frame(&frame).unwrap();
        assert_eq!(samples[3].gyro, [-7.5, 0.0, 0.0]);
        assert_eq!(samples[3].mag, [0.0, 0.0, 12.25]);
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let frame = vec![0u8; MIN_FRAME_LEN - 1];
        assert_eq!(
            decode_frame(&frame),
            Err(DecodeError::Truncated {
                len: 293,
                required: 294
            })
        );
        assert!(decode_frame(&[]).is_err());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut frame = encode_frame(&frame_with(1, varied), IMU_REFERENCE);
        frame.extend_from_slice(&[0xff; 6]);
        assert!(decode_frame(&frame).is_ok());
    }

    #[test]
    fn encode_decode_is_bit_exact() {
        let samples = frame_with(123_456, varied);
        let frame = encode_frame(&samples, IMU_REFERENCE);
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        let decoded = decode_frame(&frame).unwrap();
        for (a, b) in samples.iter().zip(decoded.iter()) {
            assert_eq!(a.sequence_timestamp, b.sequence_timestamp);
            for (x, y) in a.accel.iter().chain(&a.gyro).chain(&a.mag).zip(
                b.accel.iter().chain(&b.gyro).chain(&b.mag),
            ) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }

    #[test]
    fn split_frame_reassembles_to_original() {
        let frame = encode_frame(&frame_with(77, varied), IMU_REFERENCE);
        let (first, second) = split_frame(&frame, 150);
        assert_eq!(first[0], PACKET_TYPE_DATA);
        assert_eq!(second[..2], [PACKET_TYPE_DATA_PART2, IMU_REFERENCE]);

        let mut r = PacketReassembler::new();
        assert!(r.on_fragment(&first).is_none());
        let rebuilt = r.on_fragment(&second).unwrap();
        assert_eq!(rebuilt.as_bytes(), frame.as_slice());
    }
}
