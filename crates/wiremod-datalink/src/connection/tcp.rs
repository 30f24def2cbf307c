use std::io;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use super::{resolve, DEFAULT_PORT};
use crate::transaction::Connection;
use crate::transport::ModbusTransport;
use crate::{LinkError, TcpTransport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Connect, read and write timeout.
    pub timeout: Duration,
    pub nodelay: bool,
    /// SO_KEEPALIVE.
    pub keepalive: bool,
    /// SO_LINGER; `None` leaves it off.
    pub linger: Option<Duration>,
    /// SO_REUSEADDR on the local end.
    pub reuse_address: bool,
    /// Connect before and disconnect after every transaction.
    pub reconnecting: bool,
    /// Peek the socket in [`TcpMasterConnection::is_connected`] to notice a
    /// peer that went away.
    pub probe: bool,
}

impl TcpConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            timeout: DEFAULT_TIMEOUT,
            nodelay: true,
            keepalive: true,
            linger: None,
            reuse_address: false,
            reconnecting: false,
            probe: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    pub fn with_keepalive(mut self, keepalive: bool) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    pub fn with_reuse_address(mut self, reuse_address: bool) -> Self {
        self.reuse_address = reuse_address;
        self
    }

    pub fn with_reconnecting(mut self, reconnecting: bool) -> Self {
        self.reconnecting = reconnecting;
        self
    }

    pub fn with_probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.host.trim().is_empty() {
            return Err(LinkError::Config("host is empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(LinkError::Config("timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Master side of a Modbus TCP connection.
#[derive(Debug)]
pub struct TcpMasterConnection {
    config: TcpConnectionConfig,
    transport: Option<TcpTransport<TcpStream>>,
}

impl TcpMasterConnection {
    pub fn new(config: TcpConnectionConfig) -> Result<Self, LinkError> {
        config.validate()?;
        Ok(Self {
            config,
            transport: None,
        })
    }

    pub fn config(&self) -> &TcpConnectionConfig {
        &self.config
    }

    /// Connects to the first resolved address that accepts within the
    /// timeout. A no-op while connected.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        if self.transport.is_some() {
            return Ok(());
        }

        let mut last_err = None;
        for addr in resolve(&self.config.host, self.config.port)? {
            match open_stream(&self.config, addr) {
                Ok(stream) => {
                    debug!(%addr, "modbus tcp connection established");
                    self.transport = Some(TcpTransport::new(stream));
                    return Ok(());
                }
                Err(err) => {
                    debug!(%addr, error = %err, "modbus tcp connect attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .map(LinkError::from)
            .unwrap_or(LinkError::ConnectionClosed))
    }

    pub fn close(&mut self) -> Result<(), LinkError> {
        match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        }
    }

    /// With probing enabled, also checks that the peer has not closed its
    /// end.
    pub fn is_connected(&self) -> bool {
        let Some(transport) = &self.transport else {
            return false;
        };
        if !self.config.probe {
            return true;
        }
        match probe(transport.channel()) {
            Ok(alive) => alive,
            Err(err) => {
                warn!(error = %err, "modbus tcp liveness probe failed");
                false
            }
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.transport
            .as_ref()
            .and_then(|transport| transport.channel().peer_addr().ok())
    }
}

/// Applies the socket options, then connects within the timeout.
fn open_stream(config: &TcpConnectionConfig, addr: SocketAddr) -> io::Result<TcpStream> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nodelay(config.nodelay)?;
    socket.set_keepalive(config.keepalive)?;
    socket.set_linger(config.linger)?;
    socket.set_reuse_address(config.reuse_address)?;
    socket.connect_timeout(&SockAddr::from(addr), config.timeout)?;
    socket.set_read_timeout(Some(config.timeout))?;
    socket.set_write_timeout(Some(config.timeout))?;
    Ok(socket.into())
}

/// A zero byte peek means orderly shutdown by the peer; no data yet means
/// the connection is idle but alive.
fn probe(stream: &TcpStream) -> io::Result<bool> {
    stream.set_nonblocking(true)?;
    let mut byte = [0u8; 1];
    let alive = match stream.peek(&mut byte) {
        Ok(0) => Ok(false),
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(true),
        Err(err) => Err(err),
    };
    stream.set_nonblocking(false)?;
    alive
}

impl Connection for TcpMasterConnection {
    type Transport = TcpTransport<TcpStream>;

    fn is_open(&self) -> bool {
        self.is_connected()
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if self.transport.is_some() && !self.is_connected() {
            self.close()?;
        }
        self.connect()
    }

    fn close(&mut self) -> Result<(), LinkError> {
        TcpMasterConnection::close(self)
    }

    fn transport(&mut self) -> Result<&mut Self::Transport, LinkError> {
        self.transport
            .as_mut()
            .ok_or(LinkError::InvalidState("tcp connection is not open"))
    }

    fn reconnecting(&self) -> bool {
        self.config.reconnecting
    }

    fn is_stale(&self) -> bool {
        self.transport.is_some() && !self.is_connected()
    }
}
