use crate::transaction::Connection;
use crate::transport::ModbusTransport;
use crate::LinkError;

type Factory<T> = Box<dyn FnMut() -> Result<T, LinkError> + Send>;

/// A connection around any transport, opened through a factory closure.
///
/// Useful for custom channels and in-memory tests where there is no socket
/// or serial port to manage.
pub struct TransportConnection<T> {
    factory: Factory<T>,
    transport: Option<T>,
    reconnecting: bool,
}

impl<T: ModbusTransport> TransportConnection<T> {
    /// Starts closed; [`Connection::open`] calls `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: FnMut() -> Result<T, LinkError> + Send + 'static,
    {
        Self {
            factory: Box::new(factory),
            transport: None,
            reconnecting: false,
        }
    }

    /// Starts open with `transport`. Once closed it cannot be reopened.
    pub fn from_transport(transport: T) -> Self {
        Self {
            factory: Box::new(|| Err(LinkError::InvalidState("transport cannot be reopened"))),
            transport: Some(transport),
            reconnecting: false,
        }
    }

    pub fn with_reconnecting(mut self, reconnecting: bool) -> Self {
        self.reconnecting = reconnecting;
        self
    }
}

impl<T: ModbusTransport> Connection for TransportConnection<T> {
    type Transport = T;

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if self.transport.is_none() {
            self.transport = Some((self.factory)()?);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        }
    }

    fn transport(&mut self) -> Result<&mut T, LinkError> {
        self.transport
            .as_mut()
            .ok_or(LinkError::InvalidState("connection is not open"))
    }

    fn reconnecting(&self) -> bool {
        self.reconnecting
    }
}
