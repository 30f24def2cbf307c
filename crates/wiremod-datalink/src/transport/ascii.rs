use std::time::Duration;

use tracing::trace;
use wiremod_core::checksum::lrc;
use wiremod_core::codec::{AsciiReader, AsciiWriter, Symbol, SymbolWrite};
use wiremod_core::frame::ascii as ascii_frame;

use super::{decode_request, decode_response, read_checked_frame, ModbusTransport, Side};
use crate::{AduHeader, Channel, LinkError, RequestAdu, ResponseAdu};

/// Modbus ASCII: hex encoded frames delimited by `:` and CR LF, LRC checked.
#[derive(Debug)]
pub struct AsciiTransport<C> {
    reader: AsciiReader<C>,
    unit_filter: Option<u8>,
    buf: Vec<u8>,
}

impl<C: Channel> AsciiTransport<C> {
    pub fn new(channel: C) -> Self {
        Self {
            reader: AsciiReader::new(channel),
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
            ascii_frame::verify,
            side,
            self.unit_filter,
        );
        if let Err(LinkError::Decode(_)) = &framed {
            self.reader.get_mut().clear_input()?;
        }
        let (unit_id, pdu) = framed?;
        trace!(unit_id, pdu_len = pdu.len(), "received modbus ascii frame");
        Ok((unit_id, pdu))
    }
}

impl<C: Channel> ModbusTransport for AsciiTransport<C> {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError> {
        let (unit_id, pdu) = self.read_frame(Side::Slave)?;
        decode_request(AduHeader::serial(unit_id), &pdu)
    }

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError> {
        let (unit_id, pdu) = self.read_frame(Side::Master)?;
        decode_response(AduHeader::serial(unit_id), &pdu)
    }

    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError> {
        let mut body = Vec::with_capacity(pdu.len() + 1);
        body.push(header.unit_id);
        body.extend_from_slice(pdu);

        let mut w = AsciiWriter::new(Vec::with_capacity(body.len() * 2 + 5));
        w.write_symbol(Symbol::FrameStart)?;
        w.write_bytes(&body)?;
        w.write_symbol(Symbol::Byte(lrc(&body)))?;
        w.write_symbol(Symbol::FrameEnd)?;

        trace!(
            unit_id = header.unit_id,
            pdu_len = pdu.len(),
            "sending modbus ascii frame"
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
