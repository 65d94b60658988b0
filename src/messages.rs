//! Payload codecs for the MAVLink messages the harness reads and writes.
//!
//! Only the fields the probes consume are decoded. Payload layouts follow MAVLink's
//! wire ordering (fields sorted by size, little-endian).

use arrayvec::{ArrayString, ArrayVec};
use static_assertions::const_assert_eq;
use thiserror::Error;

pub mod msg_id {
    pub const HEARTBEAT: u32 = 0;
    pub const PARAM_REQUEST_READ: u32 = 20;
    pub const PARAM_VALUE: u32 = 22;
    pub const SCALED_IMU: u32 = 26;
    pub const ATTITUDE: u32 = 30;
    pub const LOCAL_POSITION_NED: u32 = 32;
    pub const GLOBAL_POSITION_INT: u32 = 33;
    pub const VISION_POSITION_ESTIMATE: u32 = 102;
    pub const HIGHRES_IMU: u32 = 105;
    pub const OPTICAL_FLOW_RAD: u32 = 106;
    pub const SERIAL_CONTROL: u32 = 126;
    pub const DISTANCE_SENSOR: u32 = 132;
    pub const ATT_POS_MOCAP: u32 = 138;
}

pub const SERIAL_CONTROL_DATA_LEN: usize = 70;
pub const SERIAL_CONTROL_LEN: usize = 4 + 2 + 1 + 1 + 1 + SERIAL_CONTROL_DATA_LEN;
pub const PARAM_ID_LEN: usize = 16;
pub const PARAM_REQUEST_READ_LEN: usize = 2 + 1 + 1 + PARAM_ID_LEN;
pub const PARAM_VALUE_LEN: usize = 4 + 2 + 2 + PARAM_ID_LEN + 1;

const_assert_eq!(SERIAL_CONTROL_LEN, 79);
const_assert_eq!(PARAM_REQUEST_READ_LEN, 20);
const_assert_eq!(PARAM_VALUE_LEN, 25);

pub const SERIAL_CONTROL_DEV_SHELL: u8 = 10;
pub const SERIAL_CONTROL_FLAG_REPLY: u8 = 1 << 0;
pub const SERIAL_CONTROL_FLAG_RESPOND: u8 = 1 << 1;
pub const SERIAL_CONTROL_FLAG_EXCLUSIVE: u8 = 1 << 2;
pub const SERIAL_CONTROL_FLAG_BLOCKING: u8 = 1 << 3;
pub const SERIAL_CONTROL_FLAG_MULTI: u8 = 1 << 4;

pub const MAV_AUTOPILOT_INVALID: u8 = 8;

pub type ConsoleData = ArrayVec<u8, SERIAL_CONTROL_DATA_LEN>;
pub type ParamId = ArrayString<PARAM_ID_LEN>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("payload truncated: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("console byte count {0} exceeds the 70 byte data field")]
    CountOutOfRange(u8),
    #[error("parameter id '{0}' is longer than 16 characters")]
    ParamIdTooLong(String),
    #[error("parameter id is not valid UTF-8")]
    InvalidParamId,
}

fn field<const N: usize>(payload: &[u8], offset: usize) -> Result<[u8; N], MessageError> {
    payload
        .get(offset..offset + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(MessageError::Truncated {
            needed: offset + N,
            actual: payload.len(),
        })
}

fn f32_at(payload: &[u8], offset: usize) -> Result<f32, MessageError> {
    field::<4>(payload, offset).map(f32::from_le_bytes)
}

fn u32_at(payload: &[u8], offset: usize) -> Result<u32, MessageError> {
    field::<4>(payload, offset).map(u32::from_le_bytes)
}

fn u16_at(payload: &[u8], offset: usize) -> Result<u16, MessageError> {
    field::<2>(payload, offset).map(u16::from_le_bytes)
}

fn u8_at(payload: &[u8], offset: usize) -> Result<u8, MessageError> {
    field::<1>(payload, offset).map(|[b]| b)
}

fn param_id_from(bytes: &[u8]) -> Result<ParamId, MessageError> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = core::str::from_utf8(&bytes[..end]).map_err(|_| MessageError::InvalidParamId)?;
    ParamId::from(text).map_err(|_| MessageError::ParamIdTooLong(text.to_string()))
}

/// SERIAL_CONTROL: raw console bytes in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialControl {
    pub baudrate: u32,
    pub timeout_ms: u16,
    pub device: u8,
    pub flags: u8,
    pub data: ConsoleData,
}

impl SerialControl {
    /// Shell request carrying `input`, asking for output back over as many frames as
    /// needed while holding the console exclusively. Input beyond the data field is
    /// dropped; callers check [`SerialControl::fits`] first.
    pub fn shell_request(input: &[u8], timeout_ms: u16) -> Self {
        let mut data = ConsoleData::new();
        let take = input.len().min(SERIAL_CONTROL_DATA_LEN);
        // Cannot fail: `take` never exceeds the capacity.
        let _ = data.try_extend_from_slice(&input[..take]);

        Self {
            baudrate: 0,
            timeout_ms,
            device: SERIAL_CONTROL_DEV_SHELL,
            flags: SERIAL_CONTROL_FLAG_RESPOND
                | SERIAL_CONTROL_FLAG_EXCLUSIVE
                | SERIAL_CONTROL_FLAG_MULTI,
            data,
        }
    }

    pub fn fits(input: &[u8]) -> bool {
        input.len() <= SERIAL_CONTROL_DATA_LEN
    }

    pub fn is_reply(&self) -> bool {
        self.flags & SERIAL_CONTROL_FLAG_REPLY != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SERIAL_CONTROL_LEN);
        out.extend_from_slice(&self.baudrate.to_le_bytes());
        out.extend_from_slice(&self.timeout_ms.to_le_bytes());
        out.push(self.device);
        out.push(self.flags);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
        out.resize(SERIAL_CONTROL_LEN, 0);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        if payload.len() < SERIAL_CONTROL_LEN {
            return Err(MessageError::Truncated {
                needed: SERIAL_CONTROL_LEN,
                actual: payload.len(),
            });
        }
        let count = payload[8];
        if usize::from(count) > SERIAL_CONTROL_DATA_LEN {
            return Err(MessageError::CountOutOfRange(count));
        }

        let mut data = ConsoleData::new();
        let _ = data.try_extend_from_slice(&payload[9..9 + usize::from(count)]);

        Ok(Self {
            baudrate: u32_at(payload, 0)?,
            timeout_ms: u16_at(payload, 4)?,
            device: payload[6],
            flags: payload[7],
            data,
        })
    }
}

/// PARAM_REQUEST_READ addressed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRequestRead {
    pub target_system: u8,
    pub target_component: u8,
    pub param_id: ParamId,
}

impl ParamRequestRead {
    pub fn by_name(name: &str, target_system: u8, target_component: u8) -> Result<Self, MessageError> {
        let param_id = ParamId::from(name).map_err(|_| MessageError::ParamIdTooLong(name.to_string()))?;
        Ok(Self {
            target_system,
            target_component,
            param_id,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PARAM_REQUEST_READ_LEN);
        // index -1: look the parameter up by id
        out.extend_from_slice(&(-1i16).to_le_bytes());
        out.push(self.target_system);
        out.push(self.target_component);
        out.extend_from_slice(self.param_id.as_bytes());
        out.resize(PARAM_REQUEST_READ_LEN, 0);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let id_bytes = payload.get(4..PARAM_REQUEST_READ_LEN).ok_or(MessageError::Truncated {
            needed: PARAM_REQUEST_READ_LEN,
            actual: payload.len(),
        })?;
        Ok(Self {
            target_system: u8_at(payload, 2)?,
            target_component: u8_at(payload, 3)?,
            param_id: param_id_from(id_bytes)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParamType {
    Uint8 = 1,
    Int8 = 2,
    Uint16 = 3,
    Int16 = 4,
    Uint32 = 5,
    Int32 = 6,
    Uint64 = 7,
    Int64 = 8,
    Real32 = 9,
    Real64 = 10,
}

impl ParamType {
    pub fn from_wire(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Uint8,
            2 => Self::Int8,
            3 => Self::Uint16,
            4 => Self::Int16,
            5 => Self::Uint32,
            6 => Self::Int32,
            7 => Self::Uint64,
            8 => Self::Int64,
            9 => Self::Real32,
            10 => Self::Real64,
            _ => return None,
        })
    }
}

/// PARAM_VALUE as sent by the autopilot.
///
/// Integer parameters travel byte-wise inside the float field, so `raw` keeps the
/// four wire bytes and the typed accessors reinterpret them.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamValueMessage {
    pub param_id: ParamId,
    pub raw: [u8; 4],
    pub param_type: u8,
    pub param_count: u16,
    pub param_index: u16,
}

impl ParamValueMessage {
    pub fn integer(param_id: &str, value: i32) -> Result<Self, MessageError> {
        Ok(Self {
            param_id: ParamId::from(param_id).map_err(|_| MessageError::ParamIdTooLong(param_id.to_string()))?,
            raw: value.to_le_bytes(),
            param_type: ParamType::Int32 as u8,
            param_count: 0,
            param_index: 0,
        })
    }

    pub fn real(param_id: &str, value: f32) -> Result<Self, MessageError> {
        Ok(Self {
            param_id: ParamId::from(param_id).map_err(|_| MessageError::ParamIdTooLong(param_id.to_string()))?,
            raw: value.to_le_bytes(),
            param_type: ParamType::Real32 as u8,
            param_count: 0,
            param_index: 0,
        })
    }

    /// Integer representation, for integer-typed parameters.
    pub fn integer_value(&self) -> Option<i64> {
        let [b0, b1, b2, b3] = self.raw;
        Some(match ParamType::from_wire(self.param_type)? {
            ParamType::Uint8 => i64::from(b0),
            ParamType::Int8 => i64::from(b0 as i8),
            ParamType::Uint16 => i64::from(u16::from_le_bytes([b0, b1])),
            ParamType::Int16 => i64::from(i16::from_le_bytes([b0, b1])),
            ParamType::Uint32 => i64::from(u32::from_le_bytes(self.raw)),
            ParamType::Int32 => i64::from(i32::from_le_bytes([b0, b1, b2, b3])),
            _ => return None,
        })
    }

    /// Float representation, for real-typed (or unknown) parameters.
    pub fn real_value(&self) -> Option<f64> {
        match self.integer_value() {
            Some(_) => None,
            None => Some(f64::from(f32::from_le_bytes(self.raw))),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PARAM_VALUE_LEN);
        out.extend_from_slice(&self.raw);
        out.extend_from_slice(&self.param_count.to_le_bytes());
        out.extend_from_slice(&self.param_index.to_le_bytes());
        let mut id = [0u8; PARAM_ID_LEN];
        id[..self.param_id.len()].copy_from_slice(self.param_id.as_bytes());
        out.extend_from_slice(&id);
        out.push(self.param_type);
        out
    }

    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let id_bytes = payload.get(8..8 + PARAM_ID_LEN).ok_or(MessageError::Truncated {
            needed: PARAM_VALUE_LEN,
            actual: payload.len(),
        })?;
        Ok(Self {
            raw: field::<4>(payload, 0)?,
            param_count: u16_at(payload, 4)?,
            param_index: u16_at(payload, 6)?,
            param_id: param_id_from(id_bytes)?,
            param_type: u8_at(payload, 24)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub custom_mode: u32,
    pub mav_type: u8,
    pub autopilot: u8,
    pub base_mode: u8,
    pub system_status: u8,
}

impl Heartbeat {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            custom_mode: u32_at(payload, 0)?,
            mav_type: u8_at(payload, 4)?,
            autopilot: u8_at(payload, 5)?,
            base_mode: u8_at(payload, 6)?,
            system_status: u8_at(payload, 7)?,
        })
    }

    /// Ground stations and companion software announce themselves with an
    /// invalid autopilot; only a real flight stack counts as the FCU.
    pub fn is_autopilot(&self) -> bool {
        self.autopilot != MAV_AUTOPILOT_INVALID
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub rollspeed: f32,
    pub pitchspeed: f32,
    pub yawspeed: f32,
}

impl Attitude {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            roll: f32_at(payload, 4)?,
            pitch: f32_at(payload, 8)?,
            yaw: f32_at(payload, 12)?,
            rollspeed: f32_at(payload, 16)?,
            pitchspeed: f32_at(payload, 20)?,
            yawspeed: f32_at(payload, 24)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        for v in [self.roll, self.pitch, self.yaw, self.rollspeed, self.pitchspeed, self.yawspeed] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalPositionNed {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
}

impl LocalPositionNed {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            x: f32_at(payload, 4)?,
            y: f32_at(payload, 8)?,
            z: f32_at(payload, 12)?,
            vx: f32_at(payload, 16)?,
            vy: f32_at(payload, 20)?,
            vz: f32_at(payload, 24)?,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        for v in [self.x, self.y, self.z, self.vx, self.vy, self.vz] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Position and heading of an external vision or motion-capture fix, NED frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisionPose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub yaw: f32,
}

impl VisionPose {
    /// VISION_POSITION_ESTIMATE
    pub fn decode_vision(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(Self {
            x: f32_at(payload, 8)?,
            y: f32_at(payload, 12)?,
            z: f32_at(payload, 16)?,
            yaw: f32_at(payload, 28)?,
        })
    }

    /// ATT_POS_MOCAP; heading is extracted from the attitude quaternion (w, x, y, z).
    pub fn decode_mocap(payload: &[u8]) -> Result<Self, MessageError> {
        let w = f32_at(payload, 8)?;
        let qx = f32_at(payload, 12)?;
        let qy = f32_at(payload, 16)?;
        let qz = f32_at(payload, 20)?;
        let yaw = (2.0 * (w * qz + qx * qy)).atan2(1.0 - 2.0 * (qy * qy + qz * qz));

        Ok(Self {
            x: f32_at(payload, 24)?,
            y: f32_at(payload, 28)?,
            z: f32_at(payload, 32)?,
            yaw,
        })
    }
}
