//! Frame transports: one Modbus encoding over one channel.

mod ascii;
mod bin;
mod rtu;
mod tcp;
mod udp;

use std::time::Duration;

use tracing::{trace, warn};
use wiremod_core::codec::{Symbol, SymbolRead};
use wiremod_core::frame::MAX_PDU_LEN;
use wiremod_core::pdu::{Request, Response};
use wiremod_core::DecodeError;

use crate::{AduHeader, LinkError, RequestAdu, ResponseAdu};

pub use ascii::AsciiTransport;
pub use bin::BinTransport;
pub use rtu::RtuTransport;
pub use tcp::TcpTransport;
pub use udp::{parse_datagram, DatagramPort, UdpTransport};

/// Reads and writes whole application data units.
///
/// Master-side code writes requests and reads responses; slave-side code
/// does the opposite. Both directions share one transport instance.
pub trait ModbusTransport: Send {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError>;

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError>;

    /// Frames and sends one PDU.
    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError>;

    fn write_request(&mut self, adu: &RequestAdu) -> Result<(), LinkError> {
        let pdu = adu.request.to_pdu()?;
        self.write_message(adu.header, &pdu)
    }

    fn write_response(&mut self, adu: &ResponseAdu) -> Result<(), LinkError> {
        let pdu = adu.response.to_pdu()?;
        self.write_message(adu.header, &pdu)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), LinkError>;

    /// Restrict slave-side reads to one unit id (broadcasts still pass).
    fn set_unit_filter(&mut self, _unit_id: Option<u8>) {}

    /// Whether unit id 0 requests get a reply. Serial buses treat unit 0 as
    /// broadcast and stay silent.
    fn replies_to_broadcast(&self) -> bool {
        true
    }

    fn close(&mut self) -> Result<(), LinkError>;
}

impl<T: ModbusTransport + ?Sized> ModbusTransport for Box<T> {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError> {
        (**self).read_request()
    }

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError> {
        (**self).read_response()
    }

    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError> {
        (**self).write_message(header, pdu)
    }

    fn write_request(&mut self, adu: &RequestAdu) -> Result<(), LinkError> {
        (**self).write_request(adu)
    }

    fn write_response(&mut self, adu: &ResponseAdu) -> Result<(), LinkError> {
        (**self).write_response(adu)
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), LinkError> {
        (**self).set_timeout(timeout)
    }

    fn set_unit_filter(&mut self, unit_id: Option<u8>) {
        (**self).set_unit_filter(unit_id)
    }

    fn replies_to_broadcast(&self) -> bool {
        (**self).replies_to_broadcast()
    }

    fn close(&mut self) -> Result<(), LinkError> {
        (**self).close()
    }
}

/// Which end of the exchange is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Master,
    Slave,
}

pub(crate) fn accepts_unit(filter: Option<u8>, unit_id: u8) -> bool {
    match filter {
        Some(expected) => unit_id == expected || unit_id == 0,
        None => true,
    }
}

pub(crate) fn decode_request(header: AduHeader, pdu: &[u8]) -> Result<RequestAdu, LinkError> {
    match Request::decode(pdu) {
        Ok(request) => Ok(RequestAdu { header, request }),
        Err(source) => Err(LinkError::InvalidRequest {
            header,
            function: pdu.first().copied().unwrap_or(0) & 0x7F,
            source,
        }),
    }
}

pub(crate) fn decode_response(header: AduHeader, pdu: &[u8]) -> Result<ResponseAdu, LinkError> {
    Ok(ResponseAdu {
        header,
        response: Response::decode(pdu)?,
    })
}

/// Unit id, PDU and checksum of the longest delimited frame.
const MAX_DELIMITED_PAYLOAD: usize = MAX_PDU_LEN + 3;

/// Skips to the next frame start and collects data bytes up to the frame end.
fn read_delimited<R: SymbolRead>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), LinkError> {
    buf.clear();
    loop {
        match reader.read_symbol() {
            Ok(Some(Symbol::FrameStart)) => break,
            Ok(Some(_)) => continue,
            Ok(None) => return Err(LinkError::ConnectionClosed),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => continue,
            Err(err) => return Err(err.into()),
        }
    }

    loop {
        match reader.read_symbol()? {
            Some(Symbol::Byte(byte)) => {
                if buf.len() >= MAX_DELIMITED_PAYLOAD {
                    return Err(DecodeError::InvalidLength.into());
                }
                buf.push(byte);
            }
            Some(Symbol::FrameStart) => buf.clear(),
            Some(Symbol::FrameEnd) => return Ok(()),
            None => return Err(DecodeError::UnexpectedEof.into()),
        }
    }
}

/// Checks the frame's trailer and splits it into unit id and PDU.
pub(crate) type Verify = fn(&[u8]) -> Result<(u8, &[u8]), DecodeError>;

/// Reads delimited frames until one passes its check and, on the slave
/// side, is addressed to us. Slave reads resynchronize on corrupt frames;
/// master reads surface them.
pub(crate) fn read_checked_frame<R: SymbolRead>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    verify: Verify,
    side: Side,
    unit_filter: Option<u8>,
) -> Result<(u8, Vec<u8>), LinkError> {
    loop {
        let checked = match read_delimited(reader, buf) {
            Ok(()) => verify(buf).map_err(LinkError::from),
            Err(err) => Err(err),
        };
        match checked {
            Ok((unit_id, pdu)) => {
                if side == Side::Slave && !accepts_unit(unit_filter, unit_id) {
                    trace!(unit_id, "ignoring frame for another unit");
                    continue;
                }
                if pdu.is_empty() {
                    return Err(DecodeError::InvalidLength.into());
                }
                return Ok((unit_id, pdu.to_vec()));
            }
            Err(LinkError::Decode(err)) if side == Side::Slave => {
                warn!(error = %err, "discarding corrupt frame");
                reader.discard_buffered();
            }
            Err(err) => return Err(err),
        }
    }
}
