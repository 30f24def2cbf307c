use std::sync::{Arc, Mutex};

use super::tcp::execute_tagged;
use super::{Connection, ModbusTransaction, TransactionConfig};
use crate::{LinkError, RequestAdu, ResponseAdu, TransactionIdSequence};

/// Master transaction over MBAP/UDP. Same id handling as TCP, but a
/// datagram socket has no connection to re-establish.
pub struct UdpTransaction<C> {
    connection: Arc<Mutex<C>>,
    sequence: Arc<TransactionIdSequence>,
    config: TransactionConfig,
    request: Option<RequestAdu>,
    response: Option<ResponseAdu>,
}

impl<C: Connection> UdpTransaction<C> {
    pub fn new(connection: Arc<Mutex<C>>, sequence: Arc<TransactionIdSequence>) -> Self {
        Self {
            connection,
            sequence,
            config: TransactionConfig::default(),
            request: None,
            response: None,
        }
    }

    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }
}

impl<C: Connection> ModbusTransaction for UdpTransaction<C> {
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
        self.response = None;
        execute_tagged(
            &self.connection,
            &self.sequence,
            &self.config,
            request,
            &mut self.response,
            false,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use wiremod_core::pdu::Request;

    use super::UdpTransaction;
    use crate::transaction::{ModbusTransaction, TransactionConfig};
    use crate::{DatagramPort, LinkError, RequestAdu, TransactionIdSequence, TransportConnection, UdpTransport};

    #[derive(Clone, Default)]
    struct Loopback {
        inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl DatagramPort for Loopback {
        fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let datagram = self
                .inbound
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "idle"))?;
            buf[..datagram.len()].copy_from_slice(&datagram);
            Ok(datagram.len())
        }

        fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(datagram.to_vec());
            Ok(())
        }

        fn set_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stale_datagram_is_skipped_and_timeouts_exhaust() {
        let port = Loopback::default();
        port.inbound.lock().unwrap().extend([
            vec![0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03],
            vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x01, 0x00, 0x03],
        ]);
        let sequence = Arc::new(TransactionIdSequence::new());
        let connection = TransportConnection::from_transport(UdpTransport::new(port.clone()));
        let mut transaction = UdpTransaction::new(Arc::new(Mutex::new(connection)), Arc::clone(&sequence))
            .with_config(TransactionConfig::default().with_retries(3));

        let request = RequestAdu::new(
            1,
            Request::WriteSingleRegister {
                address: 1,
                value: 3,
            },
        );
        transaction.set_request(request.clone());
        transaction.execute().unwrap();
        assert_eq!(port.sent.lock().unwrap().len(), 1);
        assert_eq!(sequence.current(), 2);

        transaction.set_request(request);
        match transaction.execute() {
            Err(LinkError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, LinkError::Timeout));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(port.sent.lock().unwrap().len(), 4);
    }
}
