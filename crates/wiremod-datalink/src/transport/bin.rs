use std::time::Duration;

use tracing::trace;
use wiremod_core::checksum::crc16;
use wiremod_core::codec::{BinReader, BinWriter, Symbol, SymbolRead, SymbolWrite};
use wiremod_core::frame::bin as bin_frame;

use super::{decode_request, decode_response, read_checked_frame, ModbusTransport, Side};
use crate::{AduHeader, Channel, LinkError, RequestAdu, ResponseAdu};

/// Modbus BIN: raw binary frames between `{` and `}`, CRC-16 checked.
///
/// A closing `}` is only recognized once the following byte has arrived or
/// the read timed out, so keep the receive timeout short on BIN links.
#[derive(Debug)]
pub struct BinTransport<C> {
    reader: BinReader<C>,
    unit_filter: Option<u8>,
    buf: Vec<u8>,
}

impl<C: Channel> BinTransport<C> {
    pub fn new(channel: C) -> Self {
        Self {
            reader: BinReader::new(channel),
            unit_filter: None,
            buf: Vec::new(),
        }
    }

    pub fn channel(&self) -> &C {
        self.reader.get_ref()
    }

    pub fn into_inner(self) -> C {
        self.reader.into_inner()
    }

    fn read_frame(&mut self, side: Side) -> Result<(u8, Vec<u8>), LinkError> {
        let framed = read_checked_frame(
            &mut self.reader,
            &mut self.buf,
            bin_frame::verify,
            side,
            self.unit_filter,
        );
        match &framed {
            Ok(_) => {}
            Err(LinkError::Decode(_)) => {
                self.reader.discard_buffered();
                self.reader.get_mut().clear_input()?;
            }
            // A timeout can leave the reader inside a half-read frame.
            Err(_) => self.reader.discard_buffered(),
        }
        let (unit_id, pdu) = framed?;
        trace!(unit_id, pdu_len = pdu.len(), "received modbus bin frame");
        Ok((unit_id, pdu))
    }
}

impl<C: Channel> ModbusTransport for BinTransport<C> {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError> {
        let (unit_id, pdu) = self.read_frame(Side::Slave)?;
        decode_request(AduHeader::serial(unit_id), &pdu)
    }

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError> {
        let (unit_id, pdu) = self.read_frame(Side::Master)?;
        decode_response(AduHeader::serial(unit_id), &pdu)
    }

    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError> {
        let mut body = Vec::with_capacity(pdu.len() + 3);
        body.push(header.unit_id);
        body.extend_from_slice(pdu);
        let crc = crc16(&body);
        body.extend_from_slice(&crc.to_le_bytes());

        let mut w = BinWriter::new(Vec::with_capacity(body.len() * 2 + 2));
        w.write_symbol(Symbol::FrameStart)?;
        w.write_bytes(&body)?;
        w.write_symbol(Symbol::FrameEnd)?;

        trace!(
            unit_id = header.unit_id,
            pdu_len = pdu.len(),
            "sending modbus bin frame"
        );
        self.reader.get_mut().send(&w.into_inner())?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), LinkError> {
        Ok(self.reader.get_mut().set_timeout(timeout)?)
    }

    fn set_unit_filter(&mut self, unit_id: Option<u8>) {
        self.unit_filter = unit_id;
    }

    fn replies_to_broadcast(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(self.reader.get_mut().shutdown()?)
    }
}
