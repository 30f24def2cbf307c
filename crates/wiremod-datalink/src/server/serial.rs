use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::{serve_transport, ListenerHandle, ModbusService};
use crate::transaction::Connection;
use crate::transport::ModbusTransport;
use crate::{LinkError, SerialConnection};

/// Modbus slave on a serial line, served from one thread.
///
/// The connection's receive timeout bounds how long a stop waits.
pub struct ModbusSerialListener<S, C = SerialConnection> {
    connection: C,
    service: Arc<S>,
    unit_id: Option<u8>,
}

impl<S: ModbusService, C: Connection + 'static> ModbusSerialListener<S, C> {
    pub fn new(connection: C, service: S) -> Self {
        Self {
            connection,
            service: Arc::new(service),
            unit_id: None,
        }
    }

    /// Answer only this unit id (and broadcasts). Without a filter every
    /// request is answered.
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    pub fn spawn(mut self) -> Result<ListenerHandle, LinkError> {
        if !self.connection.is_open() {
            self.connection.open()?;
        }
        self.connection.transport()?.set_unit_filter(self.unit_id);

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("modbus-serial-listener".into())
            .spawn(move || self.run(&thread_stop))?;
        Ok(ListenerHandle::new(stop, vec![thread]))
    }

    fn run(mut self, stop: &AtomicBool) {
        debug!(unit_id = ?self.unit_id, "modbus serial listener started");
        let served = self
            .connection
            .transport()
            .and_then(|transport| serve_transport(transport, &*self.service, stop));
        if let Err(err) = served {
            warn!(error = %err, "modbus serial listener stopped with error");
        }
        if let Err(err) = self.connection.close() {
            warn!(error = %err, "closing modbus serial connection failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::ModbusSerialListener;
    use crate::channel::Channel;
    use crate::{InMemoryModbusService, MemoryChannel, RtuTransport, TransportConnection};

    fn wait_for_writes(channel: &MemoryChannel, count: usize) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while channel.written().len() < count && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        channel.written()
    }

    #[test]
    fn answers_only_its_unit() {
        let mut channel = MemoryChannel::new();
        channel.set_timeout(Some(Duration::from_millis(10))).unwrap();
        let connection = TransportConnection::from_transport(RtuTransport::new(channel.clone()));
        let service = InMemoryModbusService::new(0, 0, 4, 0);
        service.set_holding_register(0, 42).unwrap();

        let handle = ModbusSerialListener::new(connection, service)
            .with_unit_id(1)
            .spawn()
            .unwrap();

        // Unit 2 is ignored, unit 1 is answered.
        channel.push_input(vec![0x02, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x38]);
        channel.push_input(vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]);
        let written = wait_for_writes(&channel, 1);
        handle.stop();

        assert_eq!(written.len(), 1);
        let mut expected = vec![0x01, 0x03, 0x02, 0x00, 0x2A];
        let crc = wiremod_core::checksum::crc16(&expected);
        expected.extend_from_slice(&crc.to_le_bytes());
        assert_eq!(written[0], expected);
    }
}
