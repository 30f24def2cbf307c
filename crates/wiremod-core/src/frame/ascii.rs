//! ASCII framing: `:` then every byte of `unit | pdu | lrc` as two uppercase
//! hex digits, terminated by CR LF.

use crate::checksum::lrc;
use crate::DecodeError;

pub const FRAME_START: u8 = b':';
pub const FRAME_END: [u8; 2] = [b'\r', b'\n'];

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Uppercase hex digits for one byte.
pub const fn hex_digits(byte: u8) -> [u8; 2] {
    [HEX[(byte >> 4) as usize], HEX[(byte & 0x0F) as usize]]
}

const fn nibble(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        _ => None,
    }
}

/// Parses a hex digit pair. Lowercase digits are accepted.
pub const fn from_hex_digits(high: u8, low: u8) -> Option<u8> {
    match (nibble(high), nibble(low)) {
        (Some(h), Some(l)) => Some((h << 4) | l),
        _ => None,
    }
}

/// Checks the LRC of a decoded `unit | pdu | lrc` payload.
pub fn verify(payload: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if payload.len() < 3 {
        return Err(DecodeError::InvalidLength);
    }
    let (body, check) = payload.split_at(payload.len() - 1);
    if lrc(body) != check[0] {
        return Err(DecodeError::InvalidLrc);
    }
    Ok((body[0], &body[1..]))
}

#[cfg(test)]
mod tests {
    use super::{from_hex_digits, hex_digits, verify};
    use crate::DecodeError;

    #[test]
    fn hex_helpers() {
        assert_eq!(hex_digits(0x7E), *b"7E");
        assert_eq!(hex_digits(0x0A), *b"0A");
        assert_eq!(from_hex_digits(b'7', b'e'), Some(0x7E));
        assert_eq!(from_hex_digits(b'G', b'0'), None);
    }

    #[test]
    fn verifies_reference_payload() {
        let (unit, pdu) = verify(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x7E]).unwrap();
        assert_eq!(unit, 0x11);
        assert_eq!(pdu, &[0x03, 0x00, 0x6B, 0x00, 0x03]);
        assert_eq!(
            verify(&[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03, 0x7F]).unwrap_err(),
            DecodeError::InvalidLrc
        );
    }

    #[test]
    fn verify_requires_unit_function_and_check() {
        assert_eq!(verify(&[0x11, 0xEF]).unwrap_err(), DecodeError::InvalidLength);
    }
}
