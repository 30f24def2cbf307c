//! MBAP framing shared by Modbus TCP and Modbus UDP.

use crate::encoding::{Reader, Writer};
use crate::frame::MAX_PDU_LEN;
use crate::{DecodeError, EncodeError};

pub const MBAP_HEADER_LEN: usize = 7;
/// Header plus the largest PDU.
pub const MAX_ADU_LEN: usize = MBAP_HEADER_LEN + MAX_PDU_LEN;
/// Receive buffer size for one UDP datagram.
pub const MAX_DATAGRAM_LEN: usize = 262;

const MAX_LENGTH_FIELD: u16 = MAX_PDU_LEN as u16 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Length includes unit-id byte + PDU length.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    /// Number of PDU bytes that follow the header.
    pub const fn pdu_len(&self) -> usize {
        self.length as usize - 1
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_be_u16(self.transaction_id)?;
        w.write_be_u16(self.protocol_id)?;
        w.write_be_u16(self.length)?;
        w.write_u8(self.unit_id)?;
        Ok(())
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let transaction_id = r.read_be_u16()?;
        let protocol_id = r.read_be_u16()?;
        let length = r.read_be_u16()?;
        let unit_id = r.read_u8()?;

        if protocol_id != 0 {
            return Err(DecodeError::InvalidValue);
        }
        if !(1..=MAX_LENGTH_FIELD).contains(&length) {
            return Err(DecodeError::InvalidLength);
        }

        Ok(Self {
            transaction_id,
            protocol_id,
            length,
            unit_id,
        })
    }
}

pub fn encode_frame(
    w: &mut Writer<'_>,
    transaction_id: u16,
    unit_id: u8,
    pdu: &[u8],
) -> Result<(), EncodeError> {
    if pdu.is_empty() {
        return Err(EncodeError::InvalidLength);
    }
    if pdu.len() > MAX_PDU_LEN {
        return Err(EncodeError::ValueOutOfRange);
    }

    let header = MbapHeader {
        transaction_id,
        protocol_id: 0,
        length: pdu.len() as u16 + 1,
        unit_id,
    };
    header.encode(w)?;
    w.write_all(pdu)?;
    Ok(())
}

pub fn decode_frame<'a>(r: &mut Reader<'a>) -> Result<(MbapHeader, &'a [u8]), DecodeError> {
    let header = MbapHeader::decode(r)?;
    let pdu = r.read_exact(header.pdu_len())?;
    Ok((header, pdu))
}
