use std::io;
use std::time::Duration;

use tracing::{trace, warn};
use wiremod_core::encoding::Writer;
use wiremod_core::frame::rtu::{self as rtu_frame, FrameKind, FrameProgress};

use super::{accepts_unit, decode_request, decode_response, ModbusTransport, Side};
use crate::{AduHeader, Channel, LinkError, RequestAdu, ResponseAdu};

/// Modbus RTU over a serial line (or anything else that carries bytes).
///
/// Frame boundaries come from the function code length table rather than
/// from inter-character timing.
#[derive(Debug)]
pub struct RtuTransport<C> {
    channel: C,
    echo: bool,
    unit_filter: Option<u8>,
    buf: Vec<u8>,
}

impl<C: Channel> RtuTransport<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel,
            echo: false,
            unit_filter: None,
            buf: Vec::with_capacity(rtu_frame::MAX_FRAME_LEN),
        }
    }

    /// The line reflects every transmitted byte back to the receiver.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    fn fill_to(&mut self, len: usize) -> Result<(), LinkError> {
        let start = self.buf.len();
        if start < len {
            self.buf.resize(len, 0);
            self.channel.read_exact(&mut self.buf[start..])?;
        }
        Ok(())
    }

    fn read_frame(&mut self, kind: FrameKind, side: Side) -> Result<(u8, Vec<u8>), LinkError> {
        loop {
            self.buf.clear();
            let framed = loop {
                match rtu_frame::expected_frame_len(&self.buf, kind) {
                    Ok(FrameProgress::NeedMore(len)) => self.fill_to(len)?,
                    Ok(FrameProgress::Complete(total)) => {
                        self.fill_to(total)?;
                        break rtu_frame::decode_frame(&self.buf);
                    }
                    Err(err) => break Err(err),
                }
            };

            match framed {
                Ok((unit_id, pdu)) => {
                    if side == Side::Slave && !accepts_unit(self.unit_filter, unit_id) {
                        trace!(unit_id, "ignoring rtu frame for another unit");
                        continue;
                    }
                    trace!(unit_id, pdu_len = pdu.len(), "received modbus rtu frame");
                    return Ok((unit_id, pdu.to_vec()));
                }
                Err(err) => {
                    self.channel.clear_input()?;
                    if side == Side::Master {
                        return Err(err.into());
                    }
                    warn!(error = %err, "discarding corrupt rtu frame");
                }
            }
        }
    }

    fn read_echo(&mut self, sent: &[u8]) -> Result<(), LinkError> {
        let mut echoed = vec![0u8; sent.len()];
        let mut received = 0;
        while received < sent.len() {
            match self.channel.read(&mut echoed[received..]) {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    break
                }
                Err(err) => return Err(err.into()),
            }
        }
        if received < sent.len() || echoed != sent {
            return Err(LinkError::Echo {
                expected: sent.len(),
                received,
            });
        }
        Ok(())
    }
}

impl<C: Channel> ModbusTransport for RtuTransport<C> {
    fn read_request(&mut self) -> Result<RequestAdu, LinkError> {
        let (unit_id, pdu) = self.read_frame(FrameKind::Request, Side::Slave)?;
        decode_request(AduHeader::serial(unit_id), &pdu)
    }

    fn read_response(&mut self) -> Result<ResponseAdu, LinkError> {
        let (unit_id, pdu) = self.read_frame(FrameKind::Response, Side::Master)?;
        decode_response(AduHeader::serial(unit_id), &pdu)
    }

    fn write_message(&mut self, header: AduHeader, pdu: &[u8]) -> Result<(), LinkError> {
        let mut frame = [0u8; rtu_frame::MAX_FRAME_LEN];
        let mut w = Writer::new(&mut frame);
        rtu_frame::encode_frame(&mut w, header.unit_id, pdu)?;
        let written = w.as_written();

        trace!(
            unit_id = header.unit_id,
            pdu_len = pdu.len(),
            "sending modbus rtu frame"
        );
        self.channel.send(written)?;
        if self.echo {
            self.read_echo(written)?;
        }
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), LinkError> {
        Ok(self.channel.set_timeout(timeout)?)
    }

    fn set_unit_filter(&mut self, unit_id: Option<u8>) {
        self.unit_filter = unit_id;
    }

    fn replies_to_broadcast(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(self.channel.shutdown()?)
    }
}

#[cfg(test)]
mod tests {
    use super::RtuTransport;
    use crate::transport::ModbusTransport;
    use crate::{AduHeader, LinkError, MemoryChannel, RequestAdu};
    use wiremod_core::pdu::Request;
    use wiremod_core::DecodeError;

    const REQUEST: [u8; 8] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
    const RESPONSE: [u8; 9] = [0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B, 0x9B, 0xE4];

    fn read_two() -> RequestAdu {
        RequestAdu::new(
            1,
            Request::ReadHoldingRegisters {
                start_address: 0,
                quantity: 2,
            },
        )
    }

    #[test]
    fn master_exchange() {
        let channel = MemoryChannel::new();
        channel.push_input(RESPONSE.to_vec());
        let mut transport = RtuTransport::new(channel.clone());

        transport.write_request(&read_two()).unwrap();
        assert_eq!(channel.written(), vec![REQUEST.to_vec()]);

        let response = transport.read_response().unwrap();
        assert_eq!(response.header, AduHeader::serial(1));
        assert_eq!(response.response.registers(), Some(&[42, 43][..]));
    }

    #[test]
    fn response_split_across_bursts() {
        let channel = MemoryChannel::new();
        channel.push_input(RESPONSE[..2].to_vec());
        channel.push_input(RESPONSE[2..5].to_vec());
        channel.push_input(RESPONSE[5..].to_vec());
        let mut transport = RtuTransport::new(channel);
        let response = transport.read_response().unwrap();
        assert_eq!(response.response.registers(), Some(&[42, 43][..]));
    }

    #[test]
    fn master_surfaces_crc_error_and_drains() {
        let channel = MemoryChannel::new();
        let mut corrupted = RESPONSE.to_vec();
        corrupted[8] ^= 0xFF;
        channel.push_input(corrupted);
        let mut transport = RtuTransport::new(channel.clone());

        let err = transport.read_response().unwrap_err();
        assert!(matches!(err, LinkError::Decode(DecodeError::InvalidCrc)));
        assert_eq!(channel.clear_count(), 1);
    }

    #[test]
    fn slave_skips_corrupt_and_foreign_frames() {
        let channel = MemoryChannel::new();
        let mut corrupted = REQUEST.to_vec();
        corrupted[7] = 0x00;
        channel.push_input(corrupted);
        // Read holding registers for unit 2.
        channel.push_input(vec![0x02, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x38]);
        channel.push_input(REQUEST.to_vec());

        let mut transport = RtuTransport::new(channel);
        transport.set_unit_filter(Some(1));
        let request = transport.read_request().unwrap();
        assert_eq!(request, read_two());
    }

    #[test]
    fn echo_is_consumed() {
        let channel = MemoryChannel::new().with_echo();
        channel.push_input(RESPONSE.to_vec());
        let mut transport = RtuTransport::new(channel).with_echo(true);

        transport.write_request(&read_two()).unwrap();
        let response = transport.read_response().unwrap();
        assert_eq!(response.response.registers(), Some(&[42, 43][..]));
    }

    #[test]
    fn missing_echo_is_an_error() {
        let mut transport = RtuTransport::new(MemoryChannel::new()).with_echo(true);
        let err = transport.write_request(&read_two()).unwrap_err();
        assert!(matches!(
            err,
            LinkError::Echo {
                expected: 8,
                received: 0
            }
        ));
    }

    #[test]
    fn timeout_surfaces() {
        let mut transport = RtuTransport::new(MemoryChannel::new());
        assert!(matches!(
            transport.read_response().unwrap_err(),
            LinkError::Timeout
        ));
    }
}
