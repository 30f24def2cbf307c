//! Connections own the physical resource and the transport built on it.

mod serial;
mod tcp;
mod transport;
mod udp;

use std::net::{SocketAddr, ToSocketAddrs};

pub use serial::{SerialConnection, SerialEncoding, SerialParameters};
pub use tcp::{TcpConnectionConfig, TcpMasterConnection};
pub use transport::TransportConnection;
pub use udp::{UdpConnectionConfig, UdpMasterConnection};

use crate::LinkError;

pub const DEFAULT_PORT: u16 = 502;

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, LinkError> {
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs()?.collect();
    if addrs.is_empty() {
        return Err(LinkError::Config(format!("{host}:{port} did not resolve")));
    }
    Ok(addrs)
}
