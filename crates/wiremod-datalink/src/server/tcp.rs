use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, warn};

use super::{loopback_for, serve_transport, ListenerConfig, ListenerHandle, ModbusService};
use crate::transport::ModbusTransport;
use crate::{LinkError, TcpTransport};

/// Modbus TCP slave: one thread per accepted connection.
pub struct ModbusTcpListener<S> {
    listener: TcpListener,
    service: Arc<S>,
    config: ListenerConfig,
}

impl<S: ModbusService> ModbusTcpListener<S> {
    pub fn bind<A: ToSocketAddrs>(addr: A, service: S) -> Result<Self, LinkError> {
        Self::bind_with_config(addr, service, ListenerConfig::default())
    }

    /// Binds the first resolved address that accepts, applying the
    /// config's socket options.
    pub fn bind_with_config<A: ToSocketAddrs>(
        addr: A,
        service: S,
        config: ListenerConfig,
    ) -> Result<Self, LinkError> {
        let mut last_err = None;
        for addr in addr.to_socket_addrs()? {
            match bind_listener(addr, config.reuse_address) {
                Ok(listener) => {
                    return Ok(Self::from_listener(listener, service).with_config(config))
                }
                Err(err) => {
                    debug!(%addr, error = %err, "modbus tcp bind attempt failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.map(LinkError::from).unwrap_or_else(|| {
            LinkError::Config("listen address did not resolve".into())
        }))
    }

    pub fn from_listener(listener: TcpListener, service: S) -> Self {
        Self {
            listener,
            service: Arc::new(service),
            config: ListenerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections on a background thread until the handle is
    /// stopped.
    pub fn spawn(self) -> Result<ListenerHandle, LinkError> {
        self.config.validate()?;
        let local_addr = self.listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let accept_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("modbus-tcp-accept".into())
            .spawn(move || self.accept_loop(accept_stop))?;
        Ok(ListenerHandle::new(stop, vec![thread])
            .with_local_addr(local_addr)
            .with_wake_addr(loopback_for(local_addr)))
    }

    fn accept_loop(self, stop: Arc<AtomicBool>) {
        let active = Arc::new(AtomicUsize::new(0));
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        for incoming in self.listener.incoming() {
            if stop.load(Ordering::Acquire) {
                break;
            }
            workers.retain(|worker| !worker.is_finished());

            let stream = match incoming {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "modbus tcp accept failed");
                    continue;
                }
            };
            let peer = stream.peer_addr().ok();
            if active.load(Ordering::Acquire) >= self.config.max_connections {
                warn!(?peer, limit = self.config.max_connections, "rejecting modbus tcp connection");
                continue;
            }

            let slot = ConnectionSlot::acquire(&active);
            let service = Arc::clone(&self.service);
            let stop = Arc::clone(&stop);
            let timeout = self.config.timeout;
            let spawned = thread::Builder::new()
                .name("modbus-tcp-conn".into())
                .spawn(move || {
                    let _slot = slot;
                    debug!(?peer, "modbus tcp connection accepted");
                    if let Err(err) = serve_connection(stream, &*service, timeout, &stop) {
                        warn!(?peer, error = %err, "modbus tcp server connection ended with error");
                    }
                });
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => warn!(?peer, error = %err, "could not spawn modbus tcp connection thread"),
            }
        }

        for worker in workers {
            if worker.join().is_err() {
                warn!("modbus tcp connection thread panicked");
            }
        }
    }
}

fn serve_connection<S: ModbusService + ?Sized>(
    stream: TcpStream,
    service: &S,
    timeout: Duration,
    stop: &AtomicBool,
) -> Result<(), LinkError> {
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(timeout))?;
    let mut transport = TcpTransport::new(stream);
    let served = serve_transport(&mut transport, service, stop);
    let closed = transport.close();
    served.and(closed)
}

/// Counts a live connection until dropped.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(active))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

const LISTEN_BACKLOG: i32 = 128;

fn bind_listener(addr: SocketAddr, reuse_address: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(reuse_address)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
