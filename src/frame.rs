//! MAVLink wire framing.
//!
//! Outbound frames are always MAVLink v1. The inbound decoder understands both v1 and
//! v2 framing, since autopilots and routers switch to v2 as soon as they see a v2 peer.

use heapless::Vec as FixedVec;
use thiserror::Error;
use tracing::trace;

pub const STX_V1: u8 = 0xFE;
pub const STX_V2: u8 = 0xFD;

const V1_HEADER_LEN: usize = 6;
const V2_HEADER_LEN: usize = 10;
const CHECKSUM_LEN: usize = 2;
const SIGNATURE_LEN: usize = 13;
const V2_FLAG_SIGNED: u8 = 0x01;

pub const MAX_PAYLOAD_LEN: usize = 255;
pub const MAX_V1_FRAME_LEN: usize = V1_HEADER_LEN + MAX_PAYLOAD_LEN + CHECKSUM_LEN;

pub type EncodedFrame = FixedVec<u8, MAX_V1_FRAME_LEN>;

/// One message on the telemetry bus: a type discriminator and its raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub msg_id: u32,
    pub system_id: u8,
    pub component_id: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(msg_id: u32, payload: Vec<u8>) -> Self {
        Self {
            msg_id,
            system_id: 0,
            component_id: 0,
            payload,
        }
    }

    pub fn with_source(mut self, system_id: u8, component_id: u8) -> Self {
        self.system_id = system_id;
        self.component_id = component_id;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("no CRC seed known for message id {0}")]
    UnknownMessage(u32),
    #[error("payload of {0} bytes exceeds the 255 byte limit")]
    PayloadTooLarge(usize),
    #[error("checksum mismatch (expected {expected:#06x}, got {actual:#06x})")]
    BadChecksum { expected: u16, actual: u16 },
    #[error("unsupported incompatibility flags {0:#04x}")]
    UnsupportedFlags(u8),
}

/// Per-message CRC seed and v1 payload length.
struct MessageInfo {
    crc_extra: u8,
    base_len: usize,
}

fn message_info(msg_id: u32) -> Option<MessageInfo> {
    let (crc_extra, base_len) = match msg_id {
        0 => (50, 9),      // HEARTBEAT
        20 => (214, 20),   // PARAM_REQUEST_READ
        22 => (220, 25),   // PARAM_VALUE
        26 => (170, 22),   // SCALED_IMU
        30 => (39, 28),    // ATTITUDE
        32 => (185, 28),   // LOCAL_POSITION_NED
        33 => (104, 28),   // GLOBAL_POSITION_INT
        102 => (158, 32),  // VISION_POSITION_ESTIMATE
        105 => (93, 62),   // HIGHRES_IMU
        106 => (138, 44),  // OPTICAL_FLOW_RAD
        126 => (220, 79),  // SERIAL_CONTROL
        132 => (85, 14),   // DISTANCE_SENSOR
        138 => (109, 36),  // ATT_POS_MOCAP
        _ => return None,
    };
    Some(MessageInfo { crc_extra, base_len })
}

/// X.25 / MCRF4XX checksum as used by MAVLink.
fn crc_accumulate(crc: u16, byte: u8) -> u16 {
    let mut tmp = byte ^ (crc & 0xFF) as u8;
    tmp ^= tmp << 4;
    let tmp = u16::from(tmp);
    (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
}

fn checksum(bytes: &[u8], crc_extra: u8) -> u16 {
    let crc = bytes.iter().fold(0xFFFF, |crc, b| crc_accumulate(crc, *b));
    crc_accumulate(crc, crc_extra)
}

/// Encode `frame` as a MAVLink v1 packet.
pub fn encode_v1(frame: &Frame, sequence: u8) -> Result<EncodedFrame, FrameError> {
    let info = message_info(frame.msg_id).ok_or(FrameError::UnknownMessage(frame.msg_id))?;
    if frame.payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(frame.payload.len()));
    }

    let mut out = EncodedFrame::new();
    let header = [
        STX_V1,
        frame.payload.len() as u8,
        sequence,
        frame.system_id,
        frame.component_id,
        frame.msg_id as u8,
    ];
    out.extend_from_slice(&header)
        .and_then(|()| out.extend_from_slice(&frame.payload))
        .map_err(|()| FrameError::PayloadTooLarge(frame.payload.len()))?;

    let crc = checksum(&out[1..], info.crc_extra);
    out.extend_from_slice(&crc.to_le_bytes())
        .map_err(|()| FrameError::PayloadTooLarge(frame.payload.len()))?;
    Ok(out)
}

enum Parsed {
    Incomplete,
    Complete(Frame, usize),
    Invalid(FrameError),
}

fn verify(msg_id: u32, crc_input: &[u8], received: u16) -> Result<(), FrameError> {
    match message_info(msg_id) {
        Some(info) => {
            let expected = checksum(crc_input, info.crc_extra);
            if expected == received {
                Ok(())
            } else {
                Err(FrameError::BadChecksum {
                    expected,
                    actual: received,
                })
            }
        }
        // Unknown messages cannot be verified; pass them through untouched.
        None => Ok(()),
    }
}

fn parse_v1(buf: &[u8]) -> Parsed {
    if buf.len() < V1_HEADER_LEN {
        return Parsed::Incomplete;
    }
    let len = usize::from(buf[1]);
    let total = V1_HEADER_LEN + len + CHECKSUM_LEN;
    if buf.len() < total {
        return Parsed::Incomplete;
    }

    let msg_id = u32::from(buf[5]);
    let end = V1_HEADER_LEN + len;
    let received = u16::from_le_bytes([buf[end], buf[end + 1]]);
    if let Err(e) = verify(msg_id, &buf[1..end], received) {
        return Parsed::Invalid(e);
    }

    let frame = Frame::new(msg_id, buf[V1_HEADER_LEN..end].to_vec()).with_source(buf[3], buf[4]);
    Parsed::Complete(frame, total)
}

fn parse_v2(buf: &[u8]) -> Parsed {
    if buf.len() < V2_HEADER_LEN {
        return Parsed::Incomplete;
    }
    let len = usize::from(buf[1]);
    let incompat = buf[2];
    if incompat & !V2_FLAG_SIGNED != 0 {
        return Parsed::Invalid(FrameError::UnsupportedFlags(incompat));
    }
    let signature = if incompat & V2_FLAG_SIGNED != 0 { SIGNATURE_LEN } else { 0 };
    let total = V2_HEADER_LEN + len + CHECKSUM_LEN + signature;
    if buf.len() < total {
        return Parsed::Incomplete;
    }

    let msg_id = u32::from(buf[7]) | (u32::from(buf[8]) << 8) | (u32::from(buf[9]) << 16);
    let end = V2_HEADER_LEN + len;
    let received = u16::from_le_bytes([buf[end], buf[end + 1]]);
    if let Err(e) = verify(msg_id, &buf[1..end], received) {
        return Parsed::Invalid(e);
    }

    // v2 senders strip trailing zero bytes from the payload
    let mut payload = buf[V2_HEADER_LEN..end].to_vec();
    if let Some(info) = message_info(msg_id) {
        if payload.len() < info.base_len {
            payload.resize(info.base_len, 0);
        }
    }

    let frame = Frame::new(msg_id, payload).with_source(buf[5], buf[6]);
    Parsed::Complete(frame, total)
}

/// Incremental decoder for a MAVLink byte stream.
///
/// Bytes may be pushed in arbitrary chunks; complete frames are returned as soon as
/// they are available. Corrupt frames are skipped by resynchronising on the next
/// start byte.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    rejected: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            match self.buffer.iter().position(|b| *b == STX_V1 || *b == STX_V2) {
                Some(start) => {
                    self.buffer.drain(..start);
                }
                None => {
                    self.buffer.clear();
                    break;
                }
            }

            let parsed = if self.buffer[0] == STX_V1 {
                parse_v1(&self.buffer)
            } else {
                parse_v2(&self.buffer)
            };

            match parsed {
                Parsed::Incomplete => break,
                Parsed::Complete(frame, consumed) => {
                    self.buffer.drain(..consumed);
                    frames.push(frame);
                }
                Parsed::Invalid(e) => {
                    trace!("Dropping corrupt frame: {}", e);
                    self.rejected += 1;
                    self.buffer.drain(..1);
                }
            }
        }

        frames
    }

    /// Number of frames discarded so far because of checksum or header errors.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
