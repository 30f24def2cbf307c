use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::{finish, lock_connection, validate_pairing, Connection, ModbusTransaction, TransactionConfig};
use crate::transport::ModbusTransport;
use crate::{LinkError, RequestAdu, ResponseAdu};

/// Master transaction on a serial line (RTU, ASCII or BIN).
///
/// Serial frames carry no transaction id, so pairing relies on the bus
/// being half duplex: one outstanding request at a time, guarded by the
/// connection lock.
pub struct SerialTransaction<C> {
    connection: Arc<Mutex<C>>,
    config: TransactionConfig,
    request: Option<RequestAdu>,
    response: Option<ResponseAdu>,
}

impl<C: Connection> SerialTransaction<C> {
    pub fn new(connection: Arc<Mutex<C>>) -> Self {
        Self {
            connection,
            config: TransactionConfig::default(),
            request: None,
            response: None,
        }
    }

    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection(&self) -> &Arc<Mutex<C>> {
        &self.connection
    }
}

impl<C: Connection> ModbusTransaction for SerialTransaction<C> {
    fn set_request(&mut self, request: RequestAdu) {
        self.request = Some(request);
        self.response = None;
    }

    fn request(&self) -> Option<&RequestAdu> {
        self.request.as_ref()
    }

    fn response(&self) -> Option<&ResponseAdu> {
        self.response.as_ref()
    }

    fn take_response(&mut self) -> Option<ResponseAdu> {
        self.response.take()
    }

    fn config(&self) -> &TransactionConfig {
        &self.config
    }

    fn execute(&mut self) -> Result<(), LinkError> {
        let request = self
            .request
            .as_mut()
            .ok_or(LinkError::InvalidState("no request set"))?;
        request.header.transaction_id = 0;
        self.response = None;

        let mut connection = lock_connection(&self.connection)?;
        if !connection.is_open() {
            return Err(LinkError::InvalidState("connection is not open"));
        }
        let transport = connection.transport()?;

        let attempts = self.config.attempts();
        let mut last_err = None;
        for attempt in 1..=attempts {
            match exchange(transport, request, self.config.delay) {
                Ok(None) => {
                    debug!(unit_id = 0, function = request.request.function_code().as_u8(), "broadcast sent");
                    return Ok(());
                }
                Ok(Some(response)) => {
                    debug!(
                        unit_id = request.header.unit_id,
                        function = response.response.function(),
                        attempt,
                        "serial transaction complete"
                    );
                    return finish(&mut self.response, response);
                }
                Err(err) if err.is_retryable() => {
                    warn!(
                        unit_id = request.header.unit_id,
                        attempt,
                        error = %err,
                        "serial transaction attempt failed"
                    );
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(LinkError::RetriesExhausted {
            attempts,
            source: Box::new(last_err.unwrap_or(LinkError::Timeout)),
        })
    }
}

/// One write and, unless broadcasting, one read.
fn exchange<T: ModbusTransport + ?Sized>(
    transport: &mut T,
    request: &RequestAdu,
    delay: Duration,
) -> Result<Option<ResponseAdu>, LinkError> {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
    transport.write_request(request)?;
    if request.header.unit_id == 0 {
        return Ok(None);
    }
    let response = transport.read_response()?;
    validate_pairing(request, &response)?;
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use wiremod_core::pdu::{ExceptionCode, Request};

    use super::SerialTransaction;
    use crate::transaction::{ModbusTransaction, TransactionConfig};
    use crate::{LinkError, MemoryChannel, RequestAdu, RtuTransport, TransportConnection};

    fn rtu_transaction(
        channel: &MemoryChannel,
        retries: usize,
    ) -> SerialTransaction<TransportConnection<RtuTransport<MemoryChannel>>> {
        let connection = TransportConnection::from_transport(RtuTransport::new(channel.clone()));
        SerialTransaction::new(Arc::new(Mutex::new(connection)))
            .with_config(TransactionConfig::default().with_retries(retries))
    }

    fn read_two(unit_id: u8) -> RequestAdu {
        RequestAdu::new(
            unit_id,
            Request::ReadHoldingRegisters {
                start_address: 0,
                quantity: 2,
            },
        )
    }

    #[test]
    fn execute_without_request_is_invalid_state() {
        let channel = MemoryChannel::new();
        let mut transaction = rtu_transaction(&channel, 1);
        assert!(matches!(
            transaction.execute(),
            Err(LinkError::InvalidState(_))
        ));
        assert!(channel.written().is_empty());
    }

    #[test]
    fn reads_holding_registers() {
        let channel = MemoryChannel::new();
        channel.push_input(vec![0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B, 0x9B, 0xE4]);
        let mut transaction = rtu_transaction(&channel, 3);
        transaction.set_request(read_two(1));
        transaction.execute().unwrap();

        assert_eq!(
            channel.written(),
            vec![vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]]
        );
        let response = transaction.response().unwrap();
        assert_eq!(response.header.transaction_id, 0);
        assert_eq!(response.response.registers(), Some(&[42u16, 43][..]));
    }

    #[test]
    fn exhausts_after_every_attempt() {
        let channel = MemoryChannel::new();
        let mut transaction = rtu_transaction(&channel, 3);
        transaction.set_request(read_two(1));
        match transaction.execute() {
            Err(LinkError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, LinkError::Timeout));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(channel.written().len(), 3);
    }

    #[test]
    fn zero_retries_still_attempts_once() {
        let channel = MemoryChannel::new();
        let mut transaction = rtu_transaction(&channel, 0);
        transaction.set_request(read_two(1));
        assert!(matches!(
            transaction.execute(),
            Err(LinkError::RetriesExhausted { attempts: 1, .. })
        ));
        assert_eq!(channel.written().len(), 1);
    }

    #[test]
    fn broadcast_does_not_wait() {
        let channel = MemoryChannel::new();
        let mut transaction = rtu_transaction(&channel, 3);
        transaction.set_request(RequestAdu::new(
            0,
            Request::WriteSingleRegister {
                address: 1,
                value: 3,
            },
        ));
        transaction.execute().unwrap();
        assert_eq!(channel.written().len(), 1);
        assert!(transaction.response().is_none());
    }

    #[test]
    fn response_from_other_unit_is_retried() {
        let channel = MemoryChannel::new();
        let mut frame = vec![0x02, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x2B];
        let crc = wiremod_core::checksum::crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        channel.push_input(frame);

        let mut transaction = rtu_transaction(&channel, 2);
        transaction.set_request(read_two(1));
        match transaction.execute() {
            Err(LinkError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*source, LinkError::Timeout));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(channel.written().len(), 2);
    }

    #[test]
    fn exception_is_stored_and_reported() {
        let channel = MemoryChannel::new();
        let mut frame = vec![0x01, 0x83, 0x02];
        let crc = wiremod_core::checksum::crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        channel.push_input(frame);

        let mut transaction = rtu_transaction(&channel, 3);
        transaction.set_request(read_two(1));
        match transaction.execute() {
            Err(LinkError::Exception(exception)) => {
                assert_eq!(exception.exception_code, ExceptionCode::IllegalDataAddress);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(transaction.response().unwrap().response.is_exception());
        assert_eq!(channel.written().len(), 1);
    }
}
