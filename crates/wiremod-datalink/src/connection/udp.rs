use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use tracing::debug;

use super::{resolve, DEFAULT_PORT};
use crate::transaction::Connection;
use crate::transport::ModbusTransport;
use crate::{LinkError, UdpTransport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpConnectionConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl UdpConnectionConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            timeout: super::tcp::DEFAULT_TIMEOUT,
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

/// Master side of Modbus UDP: an ephemeral socket connected to one slave.
#[derive(Debug)]
pub struct UdpMasterConnection {
    config: UdpConnectionConfig,
    transport: Option<UdpTransport<UdpSocket>>,
}

impl UdpMasterConnection {
    pub fn new(config: UdpConnectionConfig) -> Result<Self, LinkError> {
        config.validate()?;
        Ok(Self {
            config,
            transport: None,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport
            .as_ref()
            .and_then(|transport| transport.port().local_addr().ok())
    }
}

impl Connection for UdpMasterConnection {
    type Transport = UdpTransport<UdpSocket>;

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if self.transport.is_some() {
            return Ok(());
        }
        let addrs = resolve(&self.config.host, self.config.port)?;
        let remote = addrs[0];
        let local: SocketAddr = if remote.is_ipv4() {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local)?;
        socket.connect(remote)?;
        socket.set_read_timeout(Some(self.config.timeout))?;
        debug!(%remote, "modbus udp socket connected");
        self.transport = Some(UdpTransport::new(socket));
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        }
    }

    fn transport(&mut self) -> Result<&mut Self::Transport, LinkError> {
        self.transport
            .as_mut()
            .ok_or(LinkError::InvalidState("udp connection is not open"))
    }
}
