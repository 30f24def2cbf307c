//! RTU framing: `unit | pdu | crc-lo | crc-hi` with no delimiters.
//!
//! RTU frames carry no length field, so a reader has to derive the body
//! length from the function code. [`expected_frame_len`] does that
//! incrementally from the bytes received so far.

use crate::checksum::crc16;
use crate::encoding::Writer;
use crate::frame::MAX_PDU_LEN;
use crate::{DecodeError, EncodeError};

/// Shortest RTU frame: unit id, function code and CRC.
pub const MIN_FRAME_LEN: usize = 4;
/// Unit id, 253 byte PDU and CRC.
pub const MAX_FRAME_LEN: usize = 256;

pub fn encode_frame(w: &mut Writer<'_>, address: u8, pdu: &[u8]) -> Result<(), EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    if pdu.len() > MAX_PDU_LEN {
        return Err(EncodeError::ValueOutOfRange);
    }

    let start = w.position();
    w.write_u8(address)?;
    w.write_all(pdu)?;
    let crc = crc16(&w.as_written()[start..]);
    w.write_le_u16(crc)?;
    Ok(())
}

/// Splits a complete frame into unit id and PDU after checking the CRC.
///
/// A frame whose trailer differs from the computed CRC in either byte is
/// rejected.
pub fn decode_frame(data: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if data.len() < MIN_FRAME_LEN {
        return Err(DecodeError::InvalidLength);
    }

    let payload = &data[..data.len() - 2];
    let expected = crc16(payload).to_le_bytes();
    let got = [data[data.len() - 2], data[data.len() - 1]];
    if expected[0] != got[0] || expected[1] != got[1] {
        return Err(DecodeError::InvalidCrc);
    }

    Ok((payload[0], &payload[1..]))
}

/// Which side of the exchange a frame travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FrameKind {
    Request,
    Response,
}

/// Result of inspecting a partially received RTU frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameProgress {
    /// At least this many bytes in total are needed before the length is known.
    NeedMore(usize),
    /// The complete frame, CRC included, is this many bytes long.
    Complete(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyLength {
    Fixed(usize),
    /// `prefix` header bytes, the last `width` of which count the bytes that follow.
    Counted { prefix: usize, width: usize },
    /// MEI read device identification object list.
    DeviceIdentification,
}

fn request_body(function: u8) -> Result<BodyLength, DecodeError> {
    use BodyLength::*;
    if function & 0x80 != 0 {
        return Err(DecodeError::InvalidFunctionCode);
    }
    match function {
        0x01..=0x06 | 0x08 => Ok(Fixed(4)),
        0x07 | 0x0B | 0x0C | 0x11 => Ok(Fixed(0)),
        0x0F | 0x10 => Ok(Counted { prefix: 5, width: 1 }),
        0x14 | 0x15 => Ok(Counted { prefix: 1, width: 1 }),
        0x16 => Ok(Fixed(6)),
        0x17 => Ok(Counted { prefix: 9, width: 1 }),
        0x18 => Ok(Fixed(2)),
        0x2B => Ok(Fixed(3)),
        _ => Err(DecodeError::Unsupported),
    }
}

fn response_body(function: u8) -> Result<BodyLength, DecodeError> {
    use BodyLength::*;
    if function & 0x80 != 0 {
        return Ok(Fixed(1));
    }
    match function {
        0x01..=0x04 | 0x0C | 0x11 | 0x14 | 0x15 | 0x17 => Ok(Counted { prefix: 1, width: 1 }),
        0x05 | 0x06 | 0x08 | 0x0B | 0x0F | 0x10 => Ok(Fixed(4)),
        0x07 => Ok(Fixed(1)),
        0x16 => Ok(Fixed(6)),
        0x18 => Ok(Counted { prefix: 2, width: 2 }),
        0x2B => Ok(DeviceIdentification),
        _ => Err(DecodeError::Unsupported),
    }
}

/// Derives the total frame length from the bytes received so far.
///
/// `buf` starts at the unit id. Unknown function codes are reported as
/// `Unsupported` so that a reader can resynchronize.
pub fn expected_frame_len(buf: &[u8], kind: FrameKind) -> Result<FrameProgress, DecodeError> {
    const HEADER: usize = 2;
    const CRC: usize = 2;

    if buf.len() < HEADER {
        return Ok(FrameProgress::NeedMore(HEADER));
    }
    let body = match kind {
        FrameKind::Request => request_body(buf[1])?,
        FrameKind::Response => response_body(buf[1])?,
    };

    let total = match body {
        BodyLength::Fixed(len) => HEADER + len + CRC,
        BodyLength::Counted { prefix, width } => {
            let counted_at = HEADER + prefix;
            if buf.len() < counted_at {
                return Ok(FrameProgress::NeedMore(counted_at));
            }
            let count = buf[counted_at - width..counted_at]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
            counted_at + count + CRC
        }
        BodyLength::DeviceIdentification => {
            // MEI type, read code, conformity, more follows, next id, object count.
            let objects_at = HEADER + 6;
            if buf.len() < objects_at {
                return Ok(FrameProgress::NeedMore(objects_at));
            }
            if buf[HEADER] != 0x0E {
                return Err(DecodeError::Unsupported);
            }
            let mut pos = objects_at;
            for _ in 0..buf[objects_at - 1] {
                if pos + 2 + CRC > MAX_FRAME_LEN {
                    return Err(DecodeError::InvalidLength);
                }
                if buf.len() < pos + 2 {
                    return Ok(FrameProgress::NeedMore(pos + 2));
                }
                pos += 2 + usize::from(buf[pos + 1]);
            }
            pos + CRC
        }
    };

    if total > MAX_FRAME_LEN {
        return Err(DecodeError::InvalidLength);
    }
    Ok(FrameProgress::Complete(total))
}
