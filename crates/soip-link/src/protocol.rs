use soip_utils::ArrayVec;
use soip_serial::{FlowControl, Parity, SerialConfig, StopBits};
use thiserror::Error;

use crate::frame::MAX_OPERATION_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Error = 0x00,
    Confirm = 0x01,
    OpenPort = 0x10,
    ClosePort = 0x20,
    ConfigurePort = 0x30,
    StreamSerial = 0x40,
    FlowControl = 0x50,
    PortState = 0x60,
}

impl TryFrom<u8> for OpCode {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(Self::Error),
            0x01 => Ok(Self::Confirm),
            0x10 => Ok(Self::OpenPort),
            0x20 => Ok(Self::ClosePort),
            0x30 => Ok(Self::ConfigurePort),
            0x40 => Ok(Self::StreamSerial),
            0x50 => Ok(Self::FlowControl),
            0x60 => Ok(Self::PortState),
            other => Err(ProtocolError::UnknownOpCode(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("undefined package code: {0}")]
    UnknownOpCode(u8),

    #[error("op {op:#04x} payload truncated: got {len} bytes")]
    Truncated { op: u8, len: usize },

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A fully-decoded inbound operation, ready for `LinkHandler` to act on.
#[derive(Debug)]
pub enum Operation {
    Error(String),
    Confirm(bool),
    OpenPort(String),
    ClosePort,
    ConfigurePort(SerialConfig),
    StreamSerial(ArrayVec<u8, MAX_OPERATION_BYTES>),
    FlowControl(bool),
    PortState { dtr: bool, rts: bool },
}

/// Parses the payload that follows `op_code` into a typed [`Operation`].
/// An unknown `op_code` or a too-short payload is a protocol fault: the
/// caller reports it via `ERROR` but keeps the link alive.
pub fn decode(op_code: u8, payload: &[u8]) -> Result<Operation> {
    let op = OpCode::try_from(op_code)?;
    match op {
        OpCode::Error => Ok(Operation::Error(std::str::from_utf8(payload)?.to_string())),
        OpCode::Confirm => {
            let byte = *payload.first().ok_or(ProtocolError::Truncated { op: op_code, len: payload.len() })?;
            Ok(Operation::Confirm(byte == 0x01))
        }
        OpCode::OpenPort => Ok(Operation::OpenPort(std::str::from_utf8(payload)?.to_string())),
        OpCode::ClosePort => Ok(Operation::ClosePort),
        OpCode::ConfigurePort => decode_configure_port(payload).map(Operation::ConfigurePort),
        OpCode::StreamSerial => {
            let mut bytes = ArrayVec::new();
            for &b in payload {
                bytes.push(b);
            }
            Ok(Operation::StreamSerial(bytes))
        }
        OpCode::FlowControl => {
            let byte = *payload.first().ok_or(ProtocolError::Truncated { op: op_code, len: payload.len() })?;
            Ok(Operation::FlowControl(byte == 0x01))
        }
        OpCode::PortState => {
            if payload.len() < 2 {
                return Err(ProtocolError::Truncated { op: op_code, len: payload.len() });
            }
            Ok(Operation::PortState { dtr: payload[0] == 0x01, rts: payload[1] == 0x01 })
        }
    }
}

pub fn encode_error(message: &str) -> ArrayVec<u8, MAX_OPERATION_BYTES> {
    let mut out = ArrayVec::new();
    for &b in message.as_bytes().iter().take(MAX_OPERATION_BYTES) {
        out.push(b);
    }
    out
}

pub fn encode_confirm(ok: bool) -> [u8; 1] {
    [u8::from(ok)]
}

pub fn encode_open_port(name: &str) -> ArrayVec<u8, MAX_OPERATION_BYTES> {
    let mut out = ArrayVec::new();
    for &b in name.as_bytes().iter().take(MAX_OPERATION_BYTES) {
        out.push(b);
    }
    out
}

pub fn encode_close_port() -> [u8; 0] {
    []
}

/// Exact 17-byte wire layout: baud (u32 BE), data_bits (u8), stop_bits (u32
/// BE enum code), parity (u32 BE enum code), flow_control (u32 BE enum
/// code).
pub fn encode_configure_port(cfg: &SerialConfig) -> [u8; 17] {
    let mut out = [0u8; 17];
    out[0..4].copy_from_slice(&cfg.baud_rate.to_be_bytes());
    out[4] = cfg.data_bits;
    out[5..9].copy_from_slice(&cfg.stop_bits.to_code().to_be_bytes());
    out[9..13].copy_from_slice(&cfg.parity.to_code().to_be_bytes());
    out[13..17].copy_from_slice(&cfg.flow_control.to_code().to_be_bytes());
    out
}

fn decode_configure_port(payload: &[u8]) -> Result<SerialConfig> {
    if payload.len() < 17 {
        return Err(ProtocolError::Truncated { op: OpCode::ConfigurePort as u8, len: payload.len() });
    }
    let baud_rate = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let data_bits = payload[4];
    let stop_code = u32::from_be_bytes(payload[5..9].try_into().unwrap());
    let parity_code = u32::from_be_bytes(payload[9..13].try_into().unwrap());
    let flow_code = u32::from_be_bytes(payload[13..17].try_into().unwrap());

    // An unsupported enum code is a protocol fault (malformed payload),
    // not a transport fault, so it surfaces through the same error type
    // rather than tearing the link down.
    let stop_bits = StopBits::from_code(stop_code)
        .map_err(|_| ProtocolError::Truncated { op: OpCode::ConfigurePort as u8, len: payload.len() })?;
    let parity = Parity::from_code(parity_code)
        .map_err(|_| ProtocolError::Truncated { op: OpCode::ConfigurePort as u8, len: payload.len() })?;
    let flow_control = FlowControl::from_code(flow_code)
        .map_err(|_| ProtocolError::Truncated { op: OpCode::ConfigurePort as u8, len: payload.len() })?;

    Ok(SerialConfig { baud_rate, data_bits, stop_bits, parity, flow_control, ..SerialConfig::default() })
}

pub fn encode_stream_serial(bytes: &[u8]) -> &[u8] {
    bytes
}

pub fn encode_flow_control(peer_ready: bool) -> [u8; 1] {
    [u8::from(peer_ready)]
}

pub fn encode_port_state(dtr: bool, rts: bool) -> [u8; 2] {
    [u8::from(dtr), u8::from(rts)]
}
