use std::time::Duration;

use tracing::trace;
use wiremod_core::encoding::{Reader, Writer};
use wiremod_core::frame::tcp::{self, MbapHeader};

use super::{decode_request, decode_response, ModbusTransport};
use crate::{AduHeader, Channel, LinkError, RequestAdu, ResponseAdu};

/// Modbus TCP: MBAP header plus PDU over a stream.
#[derive(Debug)]
pub struct TcpTransport<C> {
    channel: C,
}

impl<C: Channel> TcpTransport<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    fn read_adu(&mut self) -> Result<(AduHeader, Vec<u8>), LinkError> {
        let mut mbap = [0u8; tcp::MBAP_HEADER_LEN];
        self.channel.read_exact(&mut mbap)?;
        let header = match MbapHeader::decode(&mut Reader::new(&mbap)) {
            Ok(header) => header,
            Err(err) => {
                // The length field can't be trusted, so drop the rest.
                self.channel.clear_input()?;
                return Err(err.into());
            }
        };

        let mut pdu = vec![0u8; header.pdu_len()];
        self.channel.read_exact(&mut pdu)?;
        trace!(
            transaction_id = header.transaction_id,
            unit_id = header.unit_id,
            pdu_len = pdu.len(),
            "received modbus tcp frame"
        );
        Ok((
            AduHeader::new(header.transaction_id, header.unit_id),
            pdu,
        ))
    }
}

impl<C: Channel> ModbusTransport for TcpTransport<C> {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError> {
        let (header, pdu) = self.read_adu()?;
        decode_request(header, &pdu)
    }

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError> {
        let (header, pdu) = self.read_adu()?;
        decode_response(header, &pdu)
    }

    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError> {
        let mut frame = [0u8; tcp::MAX_ADU_LEN];
        let mut w = Writer::new(&mut frame);
        tcp::encode_frame(&mut w, header.transaction_id, header.unit_id, pdu)?;

        trace!(
            transaction_id = header.transaction_id,
            unit_id = header.unit_id,
            pdu_len = pdu.len(),
            "sending modbus tcp frame"
        );
        self.channel.send(w.as_written())?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), LinkError> {
        Ok(self.channel.set_timeout(timeout)?)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(self.channel.shutdown()?)
    }
}
