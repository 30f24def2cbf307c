//! Request/response transactions over a shared connection.

mod serial;
mod tcp;
mod udp;

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::transport::ModbusTransport;
use crate::{LinkError, RequestAdu, ResponseAdu};

pub use serial::SerialTransaction;
pub use tcp::TcpTransaction;
pub use udp::UdpTransaction;

/// Owns a physical resource and the transport built on top of it.
pub trait Connection: Send {
    type Transport: ModbusTransport;

    fn is_open(&self) -> bool;

    fn open(&mut self) -> Result<(), LinkError>;

    fn close(&mut self) -> Result<(), LinkError>;

    /// The open transport; `InvalidState` when the connection is closed.
    fn transport(&mut self) -> Result<&mut Self::Transport, LinkError>;

    /// Open on demand before each transaction and close after it.
    fn reconnecting(&self) -> bool {
        false
    }

    /// Was opened, but the peer has since gone away.
    fn is_stale(&self) -> bool {
        false
    }
}

pub const DEFAULT_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Attempts per execute; zero still makes one attempt.
    pub retries: usize,
    /// Tag requests with transaction ids and reject responses that carry
    /// another id.
    pub validity_check: bool,
    /// Pause before every write, for slow serial devices.
    pub delay: Duration,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            validity_check: true,
            delay: Duration::ZERO,
        }
    }
}

impl TransactionConfig {
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_validity_check(mut self, validity_check: bool) -> Self {
        self.validity_check = validity_check;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn attempts(&self) -> usize {
        self.retries.max(1)
    }
}

/// One request bound to at most one response, reusable across executes.
pub trait ModbusTransaction: Send {
    fn set_request(&mut self, request: RequestAdu);

    fn request(&self) -> Option<&RequestAdu>;

    /// Response of the last successful execute. Exception responses are
    /// stored here as well.
    fn response(&self) -> Option<&ResponseAdu>;

    fn take_response(&mut self) -> Option<ResponseAdu>;

    fn config(&self) -> &TransactionConfig;

    /// Writes the request and waits for its response.
    ///
    /// Broadcast requests on serial lines complete without a response.
    fn execute(&mut self) -> Result<(), LinkError>;
}

impl<T: ModbusTransaction + ?Sized> ModbusTransaction for Box<T> {
    fn set_request(&mut self, request: RequestAdu) {
        (**self).set_request(request)
    }

    fn request(&self) -> Option<&RequestAdu> {
        (**self).request()
    }

    fn response(&self) -> Option<&ResponseAdu> {
        (**self).response()
    }

    fn take_response(&mut self) -> Option<ResponseAdu> {
        (**self).take_response()
    }

    fn config(&self) -> &TransactionConfig {
        (**self).config()
    }

    fn execute(&mut self) -> Result<(), LinkError> {
        (**self).execute()
    }
}

pub(crate) fn lock_connection<C>(connection: &Mutex<C>) -> Result<MutexGuard<'_, C>, LinkError> {
    connection
        .lock()
        .map_err(|_| LinkError::InvalidState("connection lock poisoned"))
}

/// The response must answer the request's function for the request's unit.
pub(crate) fn validate_pairing(request: &RequestAdu, response: &ResponseAdu) -> Result<(), LinkError> {
    if response.response.function() != request.request.function_code().as_u8() {
        return Err(LinkError::InvalidResponse("function code mismatch"));
    }
    if response.header.unit_id != request.header.unit_id {
        return Err(LinkError::InvalidResponse("unit id mismatch"));
    }
    Ok(())
}

/// Zero on either side matches anything.
pub(crate) fn ids_match(expected: u16, got: u16) -> bool {
    expected == 0 || got == 0 || expected == got
}

/// Completes an execute: exception responses are stored and then reported.
pub(crate) fn finish(
    slot: &mut Option<ResponseAdu>,
    response: ResponseAdu,
) -> Result<(), LinkError> {
    let exception = response.response.exception().copied();
    *slot = Some(response);
    match exception {
        Some(exception) => Err(LinkError::Exception(exception)),
        None => Ok(()),
    }
}
