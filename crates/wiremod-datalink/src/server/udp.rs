use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, trace, warn};

use super::{serve_transport, ListenerConfig, ListenerHandle, ModbusService};
use crate::transport::parse_datagram;
use crate::{DatagramPort, LinkError, UdpTransport};

const QUEUE_DEPTH: usize = 64;
const RECV_BUFFER_LEN: usize = 512;
/// Requests left unanswered this long are forgotten.
const PENDING_EXPIRY: Duration = Duration::from_secs(30);

/// Requests waiting for an answer, by peer and transaction id.
type PendingMap = HashMap<(SocketAddr, u16), Instant>;

/// A datagram and the peer it came from or goes to.
type Addressed = (SocketAddr, Vec<u8>);

fn lock_pending(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Modbus UDP slave.
///
/// A receiver thread queues datagrams for the handler thread, which answers
/// them through the service; a sender thread returns each answer to the peer
/// whose request it answers. Two peers may use the same transaction id.
pub struct ModbusUdpListener<S> {
    socket: UdpSocket,
    service: Arc<S>,
    config: ListenerConfig,
}

impl<S: ModbusService> ModbusUdpListener<S> {
    pub fn bind<A: ToSocketAddrs>(addr: A, service: S) -> Result<Self, LinkError> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self::from_socket(socket, service))
    }

    pub fn from_socket(socket: UdpSocket, service: S) -> Self {
        Self {
            socket,
            service: Arc::new(service),
            config: ListenerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ListenerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, LinkError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn spawn(self) -> Result<ListenerHandle, LinkError> {
        self.config.validate()?;
        let local_addr = self.socket.local_addr()?;
        self.socket.set_read_timeout(Some(self.config.timeout))?;
        let socket = Arc::new(self.socket);
        let stop = Arc::new(AtomicBool::new(false));
        let pending = Arc::new(Mutex::new(PendingMap::new()));
        let (request_tx, request_rx) = channel::bounded(QUEUE_DEPTH);
        let (response_tx, response_rx) = channel::bounded(QUEUE_DEPTH);

        let receiver = {
            let socket = Arc::clone(&socket);
            let pending = Arc::clone(&pending);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("modbus-udp-recv".into())
                .spawn(move || receive_loop(&socket, &pending, &request_tx, &stop))?
        };

        let handler = {
            let service = Arc::clone(&self.service);
            let stop = Arc::clone(&stop);
            let terminal = UdpTerminal {
                requests: request_rx,
                responses: response_tx,
                peer: None,
                timeout: Some(self.config.timeout),
            };
            thread::Builder::new()
                .name("modbus-udp-handler".into())
                .spawn(move || {
                    let mut transport = UdpTransport::new(terminal);
                    if let Err(err) = serve_transport(&mut transport, &*service, &stop) {
                        warn!(error = %err, "modbus udp handler stopped with error");
                    }
                })?
        };

        let sender = thread::Builder::new()
            .name("modbus-udp-send".into())
            .spawn(move || send_loop(&socket, &pending, &response_rx))?;

        Ok(ListenerHandle::new(stop, vec![receiver, handler, sender]).with_local_addr(local_addr))
    }
}

fn receive_loop(
    socket: &UdpSocket,
    pending: &Mutex<PendingMap>,
    requests: &Sender<Addressed>,
    stop: &AtomicBool,
) {
    let mut buf = [0u8; RECV_BUFFER_LEN];
    while !stop.load(Ordering::Acquire) {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue
            }
            Err(err) => {
                warn!(error = %err, "modbus udp receive failed");
                continue;
            }
        };

        let datagram = &buf[..len];
        let transaction_id = match parse_datagram(datagram) {
            Ok((header, _)) => header.transaction_id,
            Err(err) => {
                warn!(%peer, len, error = %err, "dropping malformed modbus udp datagram");
                continue;
            }
        };
        trace!(%peer, transaction_id, "queued modbus udp request");
        {
            let mut pending = lock_pending(pending);
            pending.retain(|_, queued| queued.elapsed() < PENDING_EXPIRY);
            pending.insert((peer, transaction_id), Instant::now());
        }
        if requests.send((peer, datagram.to_vec())).is_err() {
            break;
        }
    }
}

fn send_loop(
    socket: &UdpSocket,
    pending: &Mutex<PendingMap>,
    responses: &Receiver<Addressed>,
) {
    // Ends once the handler thread drops its sender.
    for (peer, datagram) in responses.iter() {
        let Some(transaction_id) = datagram
            .get(..2)
            .map(|id| u16::from_be_bytes([id[0], id[1]]))
        else {
            continue;
        };
        let Some(queued) = lock_pending(pending).remove(&(peer, transaction_id)) else {
            warn!(%peer, transaction_id, "no pending modbus udp request for response");
            continue;
        };
        match socket.send_to(&datagram, peer) {
            Ok(_) => debug!(
                %peer,
                transaction_id,
                elapsed_ms = queued.elapsed().as_millis() as u64,
                "sent modbus udp response"
            ),
            Err(err) => warn!(%peer, transaction_id, error = %err, "modbus udp send failed"),
        }
    }
}

/// The handler's view of the socket: datagrams arrive and leave through
/// queues. An answer goes to the peer of the last request received.
struct UdpTerminal {
    requests: Receiver<Addressed>,
    responses: Sender<Addressed>,
    peer: Option<SocketAddr>,
    timeout: Option<Duration>,
}

impl DatagramPort for UdpTerminal {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (peer, datagram) = match self.timeout {
            Some(timeout) => self.requests.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => io::Error::new(io::ErrorKind::TimedOut, "no request queued"),
                RecvTimeoutError::Disconnected => {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "receiver stopped")
                }
            })?,
            None => self
                .requests
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "receiver stopped"))?,
        };
        self.peer = Some(peer);
        let len = datagram.len().min(buf.len());
        buf[..len].copy_from_slice(&datagram[..len]);
        Ok(len)
    }

    fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        let peer = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no request to answer"))?;
        self.responses
            .send((peer, datagram.to_vec()))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "sender stopped"))
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.timeout = timeout.filter(|t| !t.is_zero());
        Ok(())
    }
}
