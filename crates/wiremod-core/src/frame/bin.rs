//! BIN framing: `{ unit | pdu | crc-lo | crc-hi }` in raw binary.
//!
//! Any data byte equal to one of the two sentinels is sent twice.

use crate::checksum::crc16;
use crate::DecodeError;

pub const FRAME_START: u8 = b'{';
pub const FRAME_END: u8 = b'}';

pub const fn is_sentinel(byte: u8) -> bool {
    byte == FRAME_START || byte == FRAME_END
}

/// Checks the CRC of an unescaped `unit | pdu | crc` payload.
pub fn verify(payload: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if payload.len() < 4 {
        return Err(DecodeError::InvalidLength);
    }
    let (body, trailer) = payload.split_at(payload.len() - 2);
    let expected = crc16(body).to_le_bytes();
    if expected[0] != trailer[0] || expected[1] != trailer[1] {
        return Err(DecodeError::InvalidCrc);
    }
    Ok((body[0], &body[1..]))
}
