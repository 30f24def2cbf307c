//! Slave side: listeners that read requests and answer them through a
//! [`ModbusService`].

mod serial;
mod tcp;
mod udp;

use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use wiremod_core::pdu::{ExceptionCode, Request, Response};
use wiremod_core::DecodeError;

use crate::transport::ModbusTransport;
use crate::{LinkError, RequestAdu};

pub use serial::ModbusSerialListener;
pub use tcp::ModbusTcpListener;
pub use udp::ModbusUdpListener;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("modbus exception: {0}")]
    Exception(ExceptionCode),
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("internal error: {0}")]
    Internal(&'static str),
}

impl ServiceError {
    /// The exception code sent back to the master.
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::Exception(code) => *code,
            Self::InvalidRequest(_) => ExceptionCode::IllegalDataValue,
            Self::Internal(_) => ExceptionCode::ServerDeviceFailure,
        }
    }
}

pub trait ModbusService: Send + Sync + 'static {
    /// Answer one decoded request addressed to `unit_id`.
    ///
    /// Errors are turned into exception responses.
    fn handle(&self, unit_id: u8, request: &Request) -> Result<Response, ServiceError>;
}

impl<T> ModbusService for Arc<T>
where
    T: ModbusService + ?Sized,
{
    fn handle(&self, unit_id: u8, request: &Request) -> Result<Response, ServiceError> {
        (**self).handle(unit_id, request)
    }
}

pub const DEFAULT_MAX_CONNECTIONS: usize = 16;
pub const DEFAULT_LISTENER_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Concurrent TCP connections; further connections are closed on accept.
    pub max_connections: usize,
    /// Read timeout on listener resources. Bounds how long a stop request
    /// waits for a blocked read.
    pub timeout: Duration,
    /// SO_REUSEADDR on the TCP listening socket, so a restarted slave can
    /// bind while old connections sit in TIME_WAIT.
    pub reuse_address: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            timeout: DEFAULT_LISTENER_TIMEOUT,
            reuse_address: true,
        }
    }
}

impl ListenerConfig {
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reuse_address(mut self, reuse_address: bool) -> Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.max_connections == 0 {
            return Err(LinkError::Config("max_connections must be positive".into()));
        }
        if self.timeout.is_zero() {
            return Err(LinkError::Config("listener timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Running listener threads. Dropping the handle stops them.
#[derive(Debug)]
pub struct ListenerHandle {
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    /// Connecting here unblocks a pending TCP accept.
    wake_addr: Option<SocketAddr>,
}

impl ListenerHandle {
    pub(crate) fn new(stop: Arc<AtomicBool>, threads: Vec<JoinHandle<()>>) -> Self {
        Self {
            stop,
            threads,
            local_addr: None,
            wake_addr: None,
        }
    }

    pub(crate) fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self
    }

    pub(crate) fn with_wake_addr(mut self, wake_addr: SocketAddr) -> Self {
        self.wake_addr = Some(wake_addr);
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.threads.iter().all(JoinHandle::is_finished)
    }

    /// Signals every thread and waits for them to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.stop.store(true, Ordering::Release);
        if let Some(addr) = self.wake_addr {
            // The accept loop sees the flag on the next connection.
            let _ = TcpStream::connect_timeout(&addr, Duration::from_secs(1));
        }
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                warn!("modbus listener thread panicked");
            }
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Address a listener bound to `local` can be reached at from this host.
pub(crate) fn loopback_for(local: SocketAddr) -> SocketAddr {
    let mut addr = local;
    if addr.ip().is_unspecified() {
        addr.set_ip(match local {
            SocketAddr::V4(_) => std::net::Ipv4Addr::LOCALHOST.into(),
            SocketAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.into(),
        });
    }
    addr
}

pub(crate) fn map_decode_error_to_exception(err: DecodeError) -> ExceptionCode {
    match err {
        DecodeError::InvalidFunctionCode | DecodeError::Unsupported => {
            ExceptionCode::IllegalFunction
        }
        DecodeError::InvalidLength | DecodeError::InvalidValue | DecodeError::UnexpectedEof => {
            ExceptionCode::IllegalDataValue
        }
        DecodeError::InvalidCrc
        | DecodeError::InvalidLrc
        | DecodeError::InvalidFrame
        | DecodeError::Message(_) => ExceptionCode::ServerDeviceFailure,
    }
}

/// Runs the service for one request and encodes its answer.
pub(crate) fn respond<S: ModbusService + ?Sized>(service: &S, adu: &RequestAdu) -> Vec<u8> {
    let function = adu.request.function_code().as_u8();
    let exception_code = match service.handle(adu.header.unit_id, &adu.request) {
        Ok(response) => match response.to_pdu() {
            Ok(pdu) => return pdu,
            Err(err) => {
                warn!(function, error = %err, "service response could not be encoded");
                ExceptionCode::ServerDeviceFailure
            }
        },
        Err(err) => {
            debug!(unit_id = adu.header.unit_id, function, error = %err, "request answered with exception");
            err.exception_code()
        }
    };
    exception_pdu(function, exception_code)
}

fn exception_pdu(function: u8, exception_code: ExceptionCode) -> Vec<u8> {
    vec![function | 0x80, exception_code.as_u8()]
}

/// Reads and answers requests until the peer goes away or `stop` is set.
///
/// Read timeouts only serve to poll `stop`. Requests that arrive intact but
/// fail to decode are answered with an exception.
pub(crate) fn serve_transport<T, S>(
    transport: &mut T,
    service: &S,
    stop: &AtomicBool,
) -> Result<(), LinkError>
where
    T: ModbusTransport + ?Sized,
    S: ModbusService + ?Sized,
{
    while !stop.load(Ordering::Acquire) {
        let (header, pdu) = match transport.read_request() {
            Ok(adu) => {
                debug!(
                    transaction_id = adu.header.transaction_id,
                    unit_id = adu.header.unit_id,
                    function = adu.request.function_code().as_u8(),
                    "received modbus request"
                );
                (adu.header, respond(service, &adu))
            }
            Err(LinkError::Timeout) => continue,
            Err(LinkError::ConnectionClosed) => return Ok(()),
            Err(LinkError::InvalidRequest {
                header,
                function,
                source,
            }) => {
                warn!(unit_id = header.unit_id, function, error = %source, "undecodable request");
                (
                    header,
                    exception_pdu(function, map_decode_error_to_exception(source)),
                )
            }
            Err(err) => return Err(err),
        };

        if header.unit_id == 0 && !transport.replies_to_broadcast() {
            continue;
        }
        transport.write_message(header, &pdu)?;
    }
    Ok(())
}
