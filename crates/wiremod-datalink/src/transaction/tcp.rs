use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use super::{
    finish, ids_match, lock_connection, validate_pairing, Connection, ModbusTransaction,
    TransactionConfig,
};
use crate::transport::ModbusTransport;
use crate::{LinkError, RequestAdu, ResponseAdu, TransactionIdSequence};

/// Master transaction over MBAP/TCP.
///
/// Requests are tagged from a shared [`TransactionIdSequence`]; responses
/// carrying another id are discarded and reading continues.
pub struct TcpTransaction<C> {
    connection: Arc<Mutex<C>>,
    sequence: Arc<TransactionIdSequence>,
    config: TransactionConfig,
    request: Option<RequestAdu>,
    response: Option<ResponseAdu>,
}

impl<C: Connection> TcpTransaction<C> {
    pub fn new(connection: Arc<Mutex<C>>, sequence: Arc<TransactionIdSequence>) -> Self {
        Self {
            connection,
            sequence,
            config: TransactionConfig::default(),
            request: None,
            response: None,
        }
    }

    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn connection(&self) -> &Arc<Mutex<C>> {
        &self.connection
    }

    pub fn sequence(&self) -> &Arc<TransactionIdSequence> {
        &self.sequence
    }
}

impl<C: Connection> ModbusTransaction for TcpTransaction<C> {
    fn set_request(&mut self, request: RequestAdu) {
        self.request = Some(request);
        self.response = None;
    }

    fn request(&self) -> Option<&RequestAdu> {
        self.request.as_ref()
    }

    fn response(&self) -> Option<&ResponseAdu> {
        self.response.as_ref()
    }

    fn take_response(&mut self) -> Option<ResponseAdu> {
        self.response.take()
    }

    fn config(&self) -> &TransactionConfig {
        &self.config
    }

    fn execute(&mut self) -> Result<(), LinkError> {
        let request = self
            .request
            .as_mut()
            .ok_or(LinkError::InvalidState("no request set"))?;
        self.response = None;
        execute_tagged(
            &self.connection,
            &self.sequence,
            &self.config,
            request,
            &mut self.response,
            true,
        )
    }
}

/// Runs one tagged exchange. Shared by TCP and UDP; only TCP may reopen a
/// lost connection.
pub(super) fn execute_tagged<C: Connection>(
    connection: &Mutex<C>,
    sequence: &TransactionIdSequence,
    config: &TransactionConfig,
    request: &mut RequestAdu,
    slot: &mut Option<ResponseAdu>,
    allow_reconnect: bool,
) -> Result<(), LinkError> {
    let mut connection = lock_connection(connection)?;
    let reconnecting = allow_reconnect && connection.reconnecting();
    let mut reconnected = false;
    if !connection.is_open() {
        if reconnecting {
            connection.open()?;
        } else if allow_reconnect && connection.is_stale() {
            warn!(
                unit_id = request.header.unit_id,
                "peer closed idle connection, reconnecting"
            );
            reconnected = true;
            reopen(&mut *connection)?;
        } else {
            return Err(LinkError::InvalidState("connection is not open"));
        }
    }

    let transaction_id = if config.validity_check {
        sequence.current()
    } else {
        0
    };
    request.header.transaction_id = transaction_id;
    let unit_id = request.header.unit_id;

    let attempts = config.attempts();
    let mut attempt = 0;
    let mut write_needed = true;
    let mut last_err = None;

    while attempt < attempts {
        attempt += 1;
        let response = match exchange(&mut *connection, request, write_needed) {
            Ok(response) => response,
            Err(err) if allow_reconnect && !reconnected && err.is_connection_loss() => {
                warn!(unit_id, transaction_id, error = %err, "connection lost, reconnecting");
                reconnected = true;
                attempt -= 1;
                write_needed = true;
                reopen(&mut *connection)?;
                continue;
            }
            Err(err) if err.is_retryable() => {
                warn!(unit_id, transaction_id, attempt, error = %err, "transaction attempt failed");
                last_err = Some(err);
                write_needed = true;
                continue;
            }
            Err(err) => return Err(err),
        };

        let got = response.header.transaction_id;
        if config.validity_check && !ids_match(transaction_id, got) {
            warn!(
                unit_id,
                expected = transaction_id,
                got,
                attempt,
                "discarding response with stale transaction id"
            );
            last_err = Some(LinkError::MismatchedTransactionId {
                expected: transaction_id,
                got,
            });
            write_needed = false;
            continue;
        }

        if let Err(err) = validate_pairing(request, &response) {
            warn!(unit_id, transaction_id, attempt, error = %err, "transaction attempt failed");
            last_err = Some(err);
            write_needed = true;
            continue;
        }

        if config.validity_check {
            sequence.advance();
        }
        if reconnecting {
            if let Err(err) = connection.close() {
                warn!(error = %err, "closing connection after transaction failed");
            }
        }
        debug!(
            unit_id,
            transaction_id,
            function = response.response.function(),
            attempt,
            "transaction complete"
        );
        return finish(slot, response);
    }

    match last_err {
        Some(err @ LinkError::MismatchedTransactionId { .. }) => Err(err),
        last => Err(LinkError::RetriesExhausted {
            attempts,
            source: Box::new(last.unwrap_or(LinkError::Timeout)),
        }),
    }
}

/// Drops a lost connection and opens a fresh one.
fn reopen<C: Connection + ?Sized>(connection: &mut C) -> Result<(), LinkError> {
    if let Err(err) = connection.close() {
        debug!(error = %err, "closing lost connection failed");
    }
    connection
        .open()
        .map_err(|err| LinkError::ConnectionLost(Box::new(err)))
}

fn exchange<C: Connection + ?Sized>(
    connection: &mut C,
    request: &RequestAdu,
    write: bool,
) -> Result<ResponseAdu, LinkError> {
    let transport = connection.transport()?;
    if write {
        transport.write_request(request)?;
    }
    transport.read_response()
}
