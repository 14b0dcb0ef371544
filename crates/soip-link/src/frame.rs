use std::io::{self, Read, Write};

use soip_utils::ArrayVec;
use thiserror::Error;

/// 4-byte ASCII magic that opens every frame on the wire.
pub const MAGIC: [u8; 4] = *b"SOIP";

/// Largest value `payload_length` may take (`op_code` + operation payload).
pub const MAX_PAYLOAD_LEN: usize = 249;

/// Largest number of bytes an operation payload may carry *after*
/// `op_code` (`MAX_PAYLOAD_LEN - 1`).
pub const MAX_OPERATION_BYTES: usize = MAX_PAYLOAD_LEN - 1;

const HEADER_LEN: usize = 7;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("bad magic bytes: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("payload length {0} exceeds the {MAX_PAYLOAD_LEN} byte limit")]
    PayloadTooLarge(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;

/// A decoded frame: the operation code plus everything after it.
pub struct DecodedFrame {
    pub op_code: u8,
    pub payload: ArrayVec<u8, MAX_OPERATION_BYTES>,
}

/// Writes one frame (`magic` + length + `op_code` + `payload`) to `writer`,
/// blocking until the whole frame has been accepted by the transport.
///
/// Callers are responsible for serializing access to `writer` across
/// threads (the single send-mutex-per-socket discipline); this function
/// does not lock anything itself.
pub fn write_frame<W: Write>(writer: &mut W, op_code: u8, payload: &[u8]) -> Result<()> {
    let payload_len = 1 + payload.len();
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }

    let mut frame = [0u8; HEADER_LEN + MAX_PAYLOAD_LEN];
    frame[..4].copy_from_slice(&MAGIC);
    let len_bytes = (payload_len as u32).to_le_bytes();
    frame[4..7].copy_from_slice(&len_bytes[..3]);
    frame[7] = op_code;
    frame[8..8 + payload.len()].copy_from_slice(payload);

    writer.write_all(&frame[..HEADER_LEN + payload_len])?;
    Ok(())
}

/// Blocking two-phase read of one frame from `reader`: the 7-byte header,
/// then exactly `payload_length` more bytes. A magic mismatch or an
/// oversized length is a framing error the caller must treat as fatal for
/// the link (the peer is misbehaving or the stream has desynchronized).
pub fn read_frame<R: Read>(reader: &mut R) -> Result<DecodedFrame> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let magic: [u8; 4] = header[..4].try_into().unwrap();
    if magic != MAGIC {
        return Err(FrameError::BadMagic(magic));
    }

    let payload_len = u32::from_le_bytes([header[4], header[5], header[6], 0]) as usize;
    if payload_len == 0 || payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge(payload_len));
    }

    let mut body = [0u8; MAX_PAYLOAD_LEN];
    reader.read_exact(&mut body[..payload_len])?;

    let op_code = body[0];
    let mut payload = ArrayVec::new();
    for &b in &body[1..payload_len] {
        payload.push(b);
    }

    Ok(DecodedFrame { op_code, payload })
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    fn round_trip(op_code: u8, payload: &[u8]) -> DecodedFrame {
        let mut buf = Vec::new();
        write_frame(&mut buf, op_code, payload).unwrap();
        let mut cursor = Cursor::new(buf);
        read_frame(&mut cursor).unwrap()
    }

    #[test]
    fn encode_decode_round_trip() {
        let decoded = round_trip(0x40, b"hello");
        assert_eq!(decoded.op_code, 0x40);
        assert_eq!(decoded.payload.as_slice(), b"hello");
    }

    #[test]
    fn empty_payload_round_trips() {
        let decoded = round_trip(0x20, &[]);
        assert_eq!(decoded.op_code, 0x20);
        assert_eq!(decoded.payload.as_slice(), &[] as &[u8]);
    }

    #[test]
    fn wire_layout_matches_scenario_3() {
        let mut buf = Vec::new();
        write_frame(&mut buf, 0x40, b"hello").unwrap();
        assert_eq!(buf, vec![0x53, 0x4F, 0x49, 0x50, 0x06, 0x00, 0x00, 0x40, 0x68, 0x65, 0x6C, 0x6C, 0x6F]);
    }

    #[test]
    fn oversized_payload_is_rejected_before_writing() {
        let huge = vec![0u8; MAX_OPERATION_BYTES + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, 0x40, &huge).unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge(_)));
        assert!(buf.is_empty());
    }

    #[test]
    fn bad_magic_is_reported() {
        let mut cursor = Cursor::new(b"XXXXXXX".to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::BadMagic(_)));
    }

    #[test]
    fn truncated_header_surfaces_io_error() {
        let mut cursor = Cursor::new(b"SOI".to_vec());
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }
}
