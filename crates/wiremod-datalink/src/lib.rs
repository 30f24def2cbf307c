//! Blocking Modbus transports, transactions, connections and listeners.
//!
//! Layers, bottom up:
//!
//! - [`channel`]: byte pipes (serial port, TCP stream, in-memory double)
//! - [`transport`]: one encoding (RTU, ASCII, BIN, MBAP over TCP or UDP)
//!   reading and writing whole ADUs over a channel
//! - [`connection`]: owns the physical resource and builds its transport
//! - [`transaction`]: pairs one request with its response, with retries
//!   and transaction id validation
//! - [`server`]: listeners that dispatch incoming requests to a
//!   [`ModbusService`]

#![forbid(unsafe_code)]

use std::io;

use thiserror::Error;
use wiremod_core::pdu::ExceptionResponse;
use wiremod_core::{DecodeError, EncodeError};

mod adu;
pub mod channel;
pub mod connection;
pub mod sequence;
pub mod server;
pub mod sim;
pub mod transaction;
pub mod transport;

pub use adu::{AduHeader, RequestAdu, ResponseAdu};
pub use channel::{Channel, MemoryChannel, SerialChannel};
pub use connection::{
    SerialConnection, SerialEncoding, SerialParameters, TcpConnectionConfig, TcpMasterConnection,
    TransportConnection, UdpConnectionConfig, UdpMasterConnection,
};
pub use sequence::TransactionIdSequence;
pub use server::{
    ListenerConfig, ListenerHandle, ModbusSerialListener, ModbusService, ModbusTcpListener,
    ModbusUdpListener, ServiceError,
};
pub use sim::{CoilBank, InMemoryModbusService, InMemoryPointModel, RegisterBank};
pub use transaction::{
    Connection, ModbusTransaction, SerialTransaction, TcpTransaction, TransactionConfig,
    UdpTransaction,
};
pub use transport::{
    AsciiTransport, BinTransport, DatagramPort, ModbusTransport, RtuTransport, TcpTransport,
    UdpTransport,
};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("io error: {0}")]
    Io(io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    /// A request frame arrived intact but its payload could not be decoded.
    #[error("invalid request from unit {}: {source}", .header.unit_id)]
    InvalidRequest {
        header: AduHeader,
        function: u8,
        source: DecodeError,
    },
    #[error("transaction id mismatch: expected {expected}, got {got}")]
    MismatchedTransactionId { expected: u16, got: u16 },
    #[error("echo mismatch: wrote {expected} bytes, read back {received}")]
    Echo { expected: usize, received: usize },
    #[error("no valid response after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        source: Box<LinkError>,
    },
    #[error("connection lost and could not be re-established: {0}")]
    ConnectionLost(#[source] Box<LinkError>),
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("modbus exception: {0}")]
    Exception(ExceptionResponse),
}

impl LinkError {
    /// Failures a transaction may recover from by trying the exchange again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Decode(_)
                | Self::ConnectionClosed
                | Self::Timeout
                | Self::InvalidResponse(_)
                | Self::MismatchedTransactionId { .. }
                | Self::Echo { .. }
        )
    }

    /// The peer went away; the connection has to be reopened.
    pub fn is_connection_loss(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Self::Timeout,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => Self::ConnectionClosed,
            io::ErrorKind::InvalidData => Self::Decode(DecodeError::InvalidFrame),
            _ => Self::Io(err),
        }
    }
}

impl From<serialport::Error> for LinkError {
    fn from(err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::InvalidInput => Self::Config(err.description),
            _ => Self::from(io::Error::from(err)),
        }
    }
}
