use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use tracing::{trace, warn};
use wiremod_core::encoding::{Reader, Writer};
use wiremod_core::frame::tcp::{self, MbapHeader, MAX_DATAGRAM_LEN};
use wiremod_core::DecodeError;

use super::{decode_request, decode_response, ModbusTransport};
use crate::{AduHeader, LinkError, RequestAdu, ResponseAdu};

/// A source and sink of whole datagrams.
pub trait DatagramPort: Send {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()>;

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

/// A connected socket exchanges datagrams with its one peer.
impl DatagramPort for UdpSocket {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        self.send(datagram).map(|_| ())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.set_read_timeout(timeout.filter(|t| !t.is_zero()))
    }
}

/// Splits one datagram into its MBAP header and PDU.
///
/// The datagram must hold exactly the ADU its length field announces.
pub fn parse_datagram(datagram: &[u8]) -> Result<(MbapHeader, &[u8]), DecodeError> {
    if datagram.len() <= tcp::MBAP_HEADER_LEN {
        return Err(DecodeError::UnexpectedEof);
    }
    let mut r = Reader::new(datagram);
    let (header, pdu) = tcp::decode_frame(&mut r)?;
    r.finish()?;
    Ok((header, pdu))
}

/// Modbus UDP: one MBAP framed ADU per datagram.
#[derive(Debug)]
pub struct UdpTransport<P> {
    port: P,
}

impl<P: DatagramPort> UdpTransport<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Receives until a well-formed datagram arrives; others are dropped.
    fn read_adu(&mut self) -> Result<(AduHeader, Vec<u8>), LinkError> {
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            let len = self.port.recv_datagram(&mut buf)?;
            match parse_datagram(&buf[..len]) {
                Ok((header, pdu)) => {
                    trace!(
                        transaction_id = header.transaction_id,
                        unit_id = header.unit_id,
                        pdu_len = pdu.len(),
                        "received modbus udp datagram"
                    );
                    return Ok((
                        AduHeader::new(header.transaction_id, header.unit_id),
                        pdu.to_vec(),
                    ));
                }
                Err(err) => warn!(len, error = %err, "dropping malformed modbus udp datagram"),
            }
        }
    }
}

impl<P: DatagramPort> ModbusTransport for UdpTransport<P> {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError> {
        let (header, pdu) = self.read_adu()?;
        decode_request(header, &pdu)
    }

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError> {
        let (header, pdu) = self.read_adu()?;
        decode_response(header, &pdu)
    }

    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError> {
        let mut datagram = [0u8; tcp::MAX_ADU_LEN];
        let mut w = Writer::new(&mut datagram);
        tcp::encode_frame(&mut w, header.transaction_id, header.unit_id, pdu)?;

        trace!(
            transaction_id = header.transaction_id,
            unit_id = header.unit_id,
            pdu_len = pdu.len(),
            "sending modbus udp datagram"
        );
        self.port.send_datagram(w.as_written())?;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), LinkError> {
        Ok(self.port.set_timeout(timeout)?)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}
