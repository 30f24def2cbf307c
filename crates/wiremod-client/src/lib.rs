//! Typed Modbus master.
//!
//! [`ModbusMaster`] turns the typed operations (read coils, write registers,
//! mask write, ...) into requests, runs them through any
//! [`ModbusTransaction`] and checks that the response answers what was
//! asked.

#![forbid(unsafe_code)]

pub mod points;

pub use points::{CoilPoints, PointBlock, RegisterPoints};

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;
use wiremod_core::pdu::{ExceptionResponse, FunctionCode, Request, Response};
use wiremod_core::EncodeError;
use wiremod_datalink::{
    Connection, LinkError, ModbusTransaction, RequestAdu, SerialConnection, SerialParameters,
    SerialTransaction, TcpConnectionConfig, TcpMasterConnection, TcpTransaction,
    TransactionConfig, TransactionIdSequence, UdpConnectionConfig, UdpMasterConnection,
    UdpTransaction,
};

const REPORT_SERVER_ID: u8 = 0x11;
const ENCAPSULATED_INTERFACE: u8 = 0x2B;
const MEI_READ_DEVICE_ID: u8 = 0x0E;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("modbus exception: {0}")]
    Exception(ExceptionResponse),
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("no response from unit {0}")]
    NoResponse(u8),
    #[error("address {0} outside the point block")]
    AddressOutOfRange(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportServerIdResponse {
    pub server_id: u8,
    pub run_indicator_status: bool,
    pub additional_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentificationObject {
    pub object_id: u8,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadDeviceIdentificationResponse {
    pub read_device_id_code: u8,
    pub conformity_level: u8,
    pub more_follows: bool,
    pub next_object_id: u8,
    pub objects: Vec<DeviceIdentificationObject>,
}

/// A Modbus master driving one transaction.
///
/// The transaction is locked for the duration of each call, so a master can
/// be shared between threads.
#[derive(Debug)]
pub struct ModbusMaster<T> {
    transaction: Mutex<T>,
}

impl ModbusMaster<TcpTransaction<TcpMasterConnection>> {
    /// Connects to a TCP slave. A reconnecting configuration defers the
    /// connect to the first request.
    pub fn tcp(
        config: TcpConnectionConfig,
        transaction: TransactionConfig,
    ) -> Result<Self, ClientError> {
        Self::tcp_with_sequence(config, transaction, Arc::new(TransactionIdSequence::new()))
    }

    /// Like [`ModbusMaster::tcp`], drawing transaction ids from a sequence
    /// shared with other masters.
    pub fn tcp_with_sequence(
        config: TcpConnectionConfig,
        transaction: TransactionConfig,
        sequence: Arc<TransactionIdSequence>,
    ) -> Result<Self, ClientError> {
        let mut connection = TcpMasterConnection::new(config)?;
        if !connection.reconnecting() {
            connection.connect()?;
        }
        let transaction = TcpTransaction::new(Arc::new(Mutex::new(connection)), sequence)
            .with_config(transaction);
        Ok(Self::new(transaction))
    }
}

impl ModbusMaster<UdpTransaction<UdpMasterConnection>> {
    pub fn udp(
        config: UdpConnectionConfig,
        transaction: TransactionConfig,
    ) -> Result<Self, ClientError> {
        let mut connection = UdpMasterConnection::new(config)?;
        connection.open()?;
        let transaction = UdpTransaction::new(
            Arc::new(Mutex::new(connection)),
            Arc::new(TransactionIdSequence::new()),
        )
        .with_config(transaction);
        Ok(Self::new(transaction))
    }
}

impl ModbusMaster<SerialTransaction<SerialConnection>> {
    /// Opens the serial port described by `params`.
    pub fn serial(
        params: SerialParameters,
        transaction: TransactionConfig,
    ) -> Result<Self, ClientError> {
        let mut connection = SerialConnection::new(params)?;
        connection.open()?;
        let transaction =
            SerialTransaction::new(Arc::new(Mutex::new(connection))).with_config(transaction);
        Ok(Self::new(transaction))
    }
}

impl<T: ModbusTransaction> ModbusMaster<T> {
    pub fn new(transaction: T) -> Self {
        Self {
            transaction: Mutex::new(transaction),
        }
    }

    pub fn into_inner(self) -> Result<T, ClientError> {
        self.transaction
            .into_inner()
            .map_err(|_| LinkError::InvalidState("transaction lock poisoned").into())
    }

    /// Erases the transaction type, for callers that pick the transport at
    /// run time.
    pub fn boxed(self) -> Result<ModbusMaster<Box<dyn ModbusTransaction>>, ClientError>
    where
        T: 'static,
    {
        let transaction: Box<dyn ModbusTransaction> = Box::new(self.into_inner()?);
        Ok(ModbusMaster::new(transaction))
    }

    /// Runs one request. `None` when the slave is not expected to answer
    /// (serial broadcast).
    pub fn send(&self, unit_id: u8, request: Request) -> Result<Option<Response>, ClientError> {
        let function = request.function_code().as_u8();
        let mut transaction = self
            .transaction
            .lock()
            .map_err(|_| LinkError::InvalidState("transaction lock poisoned"))?;

        debug!(unit_id, function, "dispatching modbus request");
        transaction.set_request(RequestAdu::new(unit_id, request));
        match transaction.execute() {
            Ok(()) => {}
            Err(LinkError::Exception(exception)) => {
                debug!(unit_id, function, %exception, "modbus exception response");
                return Err(ClientError::Exception(exception));
            }
            Err(err) => return Err(err.into()),
        }

        Ok(transaction.take_response().map(|adu| adu.response))
    }

    fn send_expecting_reply(&self, unit_id: u8, request: Request) -> Result<Response, ClientError> {
        self.send(unit_id, request)?
            .ok_or(ClientError::NoResponse(unit_id))
    }

    /// Writes accept a missing reply only for broadcasts.
    fn send_write(&self, unit_id: u8, request: Request) -> Result<Option<Response>, ClientError> {
        match self.send(unit_id, request)? {
            Some(response) => Ok(Some(response)),
            None if unit_id == 0 => Ok(None),
            None => Err(ClientError::NoResponse(unit_id)),
        }
    }

    pub fn read_coils(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        let response = self.send_expecting_reply(
            unit_id,
            Request::ReadCoils {
                start_address: start,
                quantity,
            },
        )?;
        read_bits(&response, quantity, "coil payload shorter than requested")
    }

    pub fn read_discrete_inputs(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        let response = self.send_expecting_reply(
            unit_id,
            Request::ReadDiscreteInputs {
                start_address: start,
                quantity,
            },
        )?;
        read_bits(
            &response,
            quantity,
            "discrete input payload shorter than requested",
        )
    }

    pub fn read_holding_registers(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let response = self.send_expecting_reply(
            unit_id,
            Request::ReadHoldingRegisters {
                start_address: start,
                quantity,
            },
        )?;
        read_registers(&response, quantity)
    }

    pub fn read_input_registers(
        &self,
        unit_id: u8,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let response = self.send_expecting_reply(
            unit_id,
            Request::ReadInputRegisters {
                start_address: start,
                quantity,
            },
        )?;
        read_registers(&response, quantity)
    }

    pub fn write_single_coil(
        &self,
        unit_id: u8,
        address: u16,
        value: bool,
    ) -> Result<(), ClientError> {
        let response = self.send_write(unit_id, Request::WriteSingleCoil { address, value })?;
        let expected = if value { 0xFF00 } else { 0x0000 };
        match response {
            None => Ok(()),
            Some(Response::WriteSingle {
                function: FunctionCode::WriteSingleCoil,
                address: echoed,
                value: echoed_value,
            }) if echoed == address && echoed_value == expected => Ok(()),
            Some(Response::WriteSingle { .. }) => {
                Err(ClientError::InvalidResponse("write single coil echo mismatch"))
            }
            Some(_) => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    pub fn write_single_register(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<(), ClientError> {
        let response = self.send_write(unit_id, Request::WriteSingleRegister { address, value })?;
        match response {
            None => Ok(()),
            Some(Response::WriteSingle {
                function: FunctionCode::WriteSingleRegister,
                address: echoed,
                value: echoed_value,
            }) if echoed == address && echoed_value == value => Ok(()),
            Some(Response::WriteSingle { .. }) => Err(ClientError::InvalidResponse(
                "write single register echo mismatch",
            )),
            Some(_) => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    pub fn write_multiple_coils(
        &self,
        unit_id: u8,
        start: u16,
        values: &[bool],
    ) -> Result<(), ClientError> {
        let quantity = u16::try_from(values.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        let response = self.send_write(
            unit_id,
            Request::WriteMultipleCoils {
                start_address: start,
                values: values.to_vec(),
            },
        )?;
        check_write_multiple(
            response,
            start,
            quantity,
            "write multiple coils echo mismatch",
        )
    }

    pub fn write_multiple_registers(
        &self,
        unit_id: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError> {
        let quantity = u16::try_from(values.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
        let response = self.send_write(
            unit_id,
            Request::WriteMultipleRegisters {
                start_address: start,
                values: values.to_vec(),
            },
        )?;
        check_write_multiple(
            response,
            start,
            quantity,
            "write multiple registers echo mismatch",
        )
    }

    pub fn mask_write_register(
        &self,
        unit_id: u8,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    ) -> Result<(), ClientError> {
        let response = self.send_write(
            unit_id,
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            },
        )?;
        match response {
            None => Ok(()),
            Some(Response::MaskWriteRegister {
                address: echoed,
                and_mask: echoed_and,
                or_mask: echoed_or,
            }) if echoed == address && echoed_and == and_mask && echoed_or == or_mask => Ok(()),
            Some(Response::MaskWriteRegister { .. }) => Err(ClientError::InvalidResponse(
                "mask write register echo mismatch",
            )),
            Some(_) => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    /// Writes `values` at `write_start`, then reads `read_quantity` registers
    /// from `read_start`, in one request.
    pub fn read_write_multiple_registers(
        &self,
        unit_id: u8,
        read_start: u16,
        read_quantity: u16,
        write_start: u16,
        values: &[u16],
    ) -> Result<Vec<u16>, ClientError> {
        let response = self.send_expecting_reply(
            unit_id,
            Request::ReadWriteMultipleRegisters {
                read_start,
                read_quantity,
                write_start,
                values: values.to_vec(),
            },
        )?;
        read_registers(&response, read_quantity)
    }

    /// Sends a function code without a typed request and returns the
    /// response payload after the function code.
    pub fn custom_request(
        &self,
        unit_id: u8,
        function_code: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let response = self.send_expecting_reply(
            unit_id,
            Request::Raw {
                function: function_code,
                data: payload.to_vec(),
            },
        )?;
        match response {
            Response::Raw { function, data } if function == function_code => Ok(data),
            Response::Raw { .. } => Err(ClientError::InvalidResponse(
                "custom response function mismatch",
            )),
            _ => Err(ClientError::InvalidResponse("unexpected function response")),
        }
    }

    pub fn report_server_id(&self, unit_id: u8) -> Result<ReportServerIdResponse, ClientError> {
        let payload = self.custom_request(unit_id, REPORT_SERVER_ID, &[])?;
        parse_report_server_id(&payload)
    }

    pub fn read_device_identification(
        &self,
        unit_id: u8,
        read_device_id_code: u8,
        object_id: u8,
    ) -> Result<ReadDeviceIdentificationResponse, ClientError> {
        let payload = self.custom_request(
            unit_id,
            ENCAPSULATED_INTERFACE,
            &[MEI_READ_DEVICE_ID, read_device_id_code, object_id],
        )?;
        parse_device_identification(&payload)
    }

    /// Re-reads every coil of `points` from the slave.
    pub fn refresh_coils(&self, unit_id: u8, points: &mut CoilPoints) -> Result<(), ClientError> {
        let values = self.read_coils(unit_id, points.start_address(), points.quantity()?)?;
        points.apply_read(points.start_address(), &values)
    }

    /// Re-reads every holding register of `points` from the slave.
    pub fn refresh_holding_registers(
        &self,
        unit_id: u8,
        points: &mut RegisterPoints,
    ) -> Result<(), ClientError> {
        let values =
            self.read_holding_registers(unit_id, points.start_address(), points.quantity()?)?;
        points.apply_read(points.start_address(), &values)
    }
}

fn read_bits(
    response: &Response,
    quantity: u16,
    short_payload: &'static str,
) -> Result<Vec<bool>, ClientError> {
    match response {
        Response::ReadBits { .. } => response
            .bits(usize::from(quantity))
            .ok_or(ClientError::InvalidResponse(short_payload)),
        _ => Err(ClientError::InvalidResponse("unexpected function response")),
    }
}

fn read_registers(response: &Response, quantity: u16) -> Result<Vec<u16>, ClientError> {
    match response.registers() {
        Some(values) if values.len() >= usize::from(quantity) => {
            Ok(values[..usize::from(quantity)].to_vec())
        }
        Some(_) => Err(ClientError::InvalidResponse(
            "register payload shorter than requested",
        )),
        None => Err(ClientError::InvalidResponse("unexpected function response")),
    }
}

fn check_write_multiple(
    response: Option<Response>,
    start: u16,
    quantity: u16,
    mismatch: &'static str,
) -> Result<(), ClientError> {
    match response {
        None => Ok(()),
        Some(Response::WriteMultiple {
            start_address,
            quantity: echoed,
            ..
        }) if start_address == start && echoed == quantity => Ok(()),
        Some(Response::WriteMultiple { .. }) => Err(ClientError::InvalidResponse(mismatch)),
        Some(_) => Err(ClientError::InvalidResponse("unexpected function response")),
    }
}

fn parse_report_server_id(payload: &[u8]) -> Result<ReportServerIdResponse, ClientError> {
    let Some((&byte_count, data)) = payload.split_first() else {
        return Err(ClientError::InvalidResponse(
            "report server id payload missing byte count",
        ));
    };
    let byte_count = usize::from(byte_count);
    if data.len() != byte_count || byte_count < 2 {
        return Err(ClientError::InvalidResponse(
            "report server id payload length mismatch",
        ));
    }

    Ok(ReportServerIdResponse {
        server_id: data[0],
        run_indicator_status: data[1] != 0,
        additional_data: data[2..].to_vec(),
    })
}

fn parse_device_identification(
    payload: &[u8],
) -> Result<ReadDeviceIdentificationResponse, ClientError> {
    let [mei_type, read_device_id_code, conformity_level, more_follows, next_object_id, object_count, rest @ ..] =
        payload
    else {
        return Err(ClientError::InvalidResponse(
            "read device identification payload too short",
        ));
    };
    if *mei_type != MEI_READ_DEVICE_ID {
        return Err(ClientError::InvalidResponse(
            "read device identification MEI type mismatch",
        ));
    }

    let mut rest = rest;
    let mut objects = Vec::with_capacity(usize::from(*object_count));
    for _ in 0..*object_count {
        let [object_id, len, tail @ ..] = rest else {
            return Err(ClientError::InvalidResponse(
                "read device identification object header truncated",
            ));
        };
        let len = usize::from(*len);
        if tail.len() < len {
            return Err(ClientError::InvalidResponse(
                "read device identification object data truncated",
            ));
        }
        let (value, tail) = tail.split_at(len);
        objects.push(DeviceIdentificationObject {
            object_id: *object_id,
            value: value.to_vec(),
        });
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(ClientError::InvalidResponse(
            "read device identification trailing data",
        ));
    }

    Ok(ReadDeviceIdentificationResponse {
        read_device_id_code: *read_device_id_code,
        conformity_level: *conformity_level,
        more_follows: *more_follows != 0,
        next_object_id: *next_object_id,
        objects,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::{ClientError, CoilPoints, ModbusMaster, RegisterPoints};
    use wiremod_core::pdu::{ExceptionCode, ExceptionResponse, FunctionCode, Request, Response};
    use wiremod_datalink::{
        AduHeader, LinkError, ModbusTransaction, RequestAdu, ResponseAdu, TransactionConfig,
    };

    /// Answers each execute with the next queued outcome.
    struct MockTransaction {
        outcomes: VecDeque<Result<Option<Response>, LinkError>>,
        config: TransactionConfig,
        request: Option<RequestAdu>,
        response: Option<ResponseAdu>,
        sent: Arc<std::sync::Mutex<Vec<RequestAdu>>>,
        calls: Arc<AtomicUsize>,
    }

    impl MockTransaction {
        fn with_outcomes(outcomes: Vec<Result<Option<Response>, LinkError>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                config: TransactionConfig::default(),
                request: None,
                response: None,
                sent: Arc::default(),
                calls: Arc::default(),
            }
        }

        fn replying(responses: Vec<Response>) -> Self {
            Self::with_outcomes(responses.into_iter().map(|r| Ok(Some(r))).collect())
        }
    }

    impl ModbusTransaction for MockTransaction {
        fn set_request(&mut self, request: RequestAdu) {
            self.request = Some(request);
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
            self.calls.fetch_add(1, Ordering::Relaxed);
            let request = self
                .request
                .clone()
                .ok_or(LinkError::InvalidState("no request"))?;
            self.sent.lock().unwrap().push(request.clone());
            let outcome = self
                .outcomes
                .pop_front()
                .ok_or(LinkError::InvalidResponse("no mock response"))?;
            self.response = None;
            match outcome? {
                Some(Response::Exception(exception)) => {
                    self.response = Some(ResponseAdu {
                        header: request.header,
                        response: Response::Exception(exception),
                    });
                    Err(LinkError::Exception(exception))
                }
                Some(response) => {
                    self.response = Some(ResponseAdu {
                        header: AduHeader::serial(request.header.unit_id),
                        response,
                    });
                    Ok(())
                }
                None => Ok(()),
            }
        }
    }

    fn registers(function: FunctionCode, values: &[u16]) -> Response {
        Response::ReadRegisters {
            function,
            values: values.to_vec(),
        }
    }

    #[test]
    fn read_holding_registers_success() {
        let transaction = MockTransaction::replying(vec![registers(
            FunctionCode::ReadHoldingRegisters,
            &[0x1234, 0xABCD],
        )]);
        let sent = Arc::clone(&transaction.sent);
        let master = ModbusMaster::new(transaction);

        let values = master.read_holding_registers(7, 0x10, 2).unwrap();
        assert_eq!(values, vec![0x1234, 0xABCD]);

        let sent = sent.lock().unwrap();
        assert_eq!(sent[0].header.unit_id, 7);
        assert_eq!(
            sent[0].request,
            Request::ReadHoldingRegisters {
                start_address: 0x10,
                quantity: 2
            }
        );
    }

    #[test]
    fn exception_is_mapped() {
        let transaction = MockTransaction::replying(vec![Response::Exception(ExceptionResponse {
            function_code: 0x03,
            exception_code: ExceptionCode::IllegalDataAddress,
        })]);
        let master = ModbusMaster::new(transaction);

        let err = master.read_holding_registers(1, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Exception(ExceptionResponse {
                exception_code: ExceptionCode::IllegalDataAddress,
                ..
            })
        ));
    }

    #[test]
    fn link_errors_pass_through() {
        let transaction = MockTransaction::with_outcomes(vec![Err(LinkError::RetriesExhausted {
            attempts: 3,
            source: Box::new(LinkError::Timeout),
        })]);
        let master = ModbusMaster::new(transaction);

        let err = master.read_input_registers(1, 0, 1).unwrap_err();
        assert!(matches!(
            err,
            ClientError::Link(LinkError::RetriesExhausted { attempts: 3, .. })
        ));
    }

    #[test]
    fn read_registers_rejects_short_payload() {
        let transaction = MockTransaction::replying(vec![registers(
            FunctionCode::ReadInputRegisters,
            &[1],
        )]);
        let master = ModbusMaster::new(transaction);
        let err = master.read_input_registers(1, 0, 2).unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("register payload shorter than requested")
        ));
    }

    #[test]
    fn read_coils_rejects_truncated_payload() {
        let transaction = MockTransaction::replying(vec![Response::ReadBits {
            function: FunctionCode::ReadCoils,
            status: vec![0b0000_1111],
        }]);
        let master = ModbusMaster::new(transaction);
        let err = master.read_coils(1, 0, 9).unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("coil payload shorter than requested")
        ));
    }

    #[test]
    fn read_discrete_inputs_unpacks_lsb_first() {
        let transaction = MockTransaction::replying(vec![Response::ReadBits {
            function: FunctionCode::ReadDiscreteInputs,
            status: vec![0b0000_0101],
        }]);
        let master = ModbusMaster::new(transaction);
        let bits = master.read_discrete_inputs(1, 0, 3).unwrap();
        assert_eq!(bits, vec![true, false, true]);
    }

    #[test]
    fn write_single_coil_checks_echo() {
        let transaction = MockTransaction::replying(vec![
            Response::WriteSingle {
                function: FunctionCode::WriteSingleCoil,
                address: 4,
                value: 0xFF00,
            },
            Response::WriteSingle {
                function: FunctionCode::WriteSingleCoil,
                address: 4,
                value: 0x0000,
            },
        ]);
        let master = ModbusMaster::new(transaction);
        master.write_single_coil(1, 4, true).unwrap();
        let err = master.write_single_coil(1, 4, true).unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("write single coil echo mismatch")
        ));
    }

    #[test]
    fn write_multiple_registers_checks_quantity() {
        let transaction = MockTransaction::replying(vec![Response::WriteMultiple {
            function: FunctionCode::WriteMultipleRegisters,
            start_address: 8,
            quantity: 1,
        }]);
        let master = ModbusMaster::new(transaction);
        let err = master.write_multiple_registers(1, 8, &[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("write multiple registers echo mismatch")
        ));
    }

    #[test]
    fn broadcast_write_completes_without_reply() {
        let master = ModbusMaster::new(MockTransaction::with_outcomes(vec![Ok(None), Ok(None)]));
        master.write_multiple_coils(0, 0, &[true, false]).unwrap();

        let err = master.write_single_register(3, 0, 1).unwrap_err();
        assert!(matches!(err, ClientError::NoResponse(3)));
    }

    #[test]
    fn broadcast_read_has_nothing_to_return() {
        let master = ModbusMaster::new(MockTransaction::with_outcomes(vec![Ok(None)]));
        let err = master.read_coils(0, 0, 1).unwrap_err();
        assert!(matches!(err, ClientError::NoResponse(0)));
    }

    #[test]
    fn mask_write_register_success() {
        let transaction = MockTransaction::replying(vec![Response::MaskWriteRegister {
            address: 0x0004,
            and_mask: 0xFF00,
            or_mask: 0x0012,
        }]);
        let master = ModbusMaster::new(transaction);
        master.mask_write_register(1, 0x0004, 0xFF00, 0x0012).unwrap();
    }

    #[test]
    fn read_write_multiple_registers_success() {
        let transaction = MockTransaction::replying(vec![registers(
            FunctionCode::ReadWriteMultipleRegisters,
            &[0x1234, 0xABCD],
        )]);
        let sent = Arc::clone(&transaction.sent);
        let master = ModbusMaster::new(transaction);

        let values = master
            .read_write_multiple_registers(1, 0x0010, 2, 0x0020, &[0x0102, 0x0304])
            .unwrap();
        assert_eq!(values, vec![0x1234, 0xABCD]);
        assert_eq!(
            sent.lock().unwrap()[0].request,
            Request::ReadWriteMultipleRegisters {
                read_start: 0x0010,
                read_quantity: 2,
                write_start: 0x0020,
                values: vec![0x0102, 0x0304],
            }
        );
    }

    #[test]
    fn custom_request_roundtrip() {
        let transaction = MockTransaction::replying(vec![Response::Raw {
            function: 0x41,
            data: vec![0x12, 0x34],
        }]);
        let master = ModbusMaster::new(transaction);

        let payload = master.custom_request(1, 0x41, &[0xAA]).unwrap();
        assert_eq!(payload, vec![0x12, 0x34]);
    }

    #[test]
    fn report_server_id_parses_payload() {
        let transaction = MockTransaction::replying(vec![Response::Raw {
            function: 0x11,
            data: vec![0x03, 0x2A, 0xFF, 0x10],
        }]);
        let master = ModbusMaster::new(transaction);

        let report = master.report_server_id(1).unwrap();
        assert_eq!(report.server_id, 0x2A);
        assert!(report.run_indicator_status);
        assert_eq!(report.additional_data, vec![0x10]);
    }

    #[test]
    fn read_device_identification_parses_objects() {
        let transaction = MockTransaction::replying(vec![Response::Raw {
            function: 0x2B,
            data: vec![
                0x0E, 0x01, 0x01, 0x00, 0x00, 0x02, 0x00, 0x07, b'w', b'i', b'r', b'e', b'm',
                b'o', b'd', 0x01, 0x03, b'0', b'.', b'1',
            ],
        }]);
        let master = ModbusMaster::new(transaction);

        let response = master.read_device_identification(1, 0x01, 0x00).unwrap();
        assert_eq!(response.read_device_id_code, 0x01);
        assert_eq!(response.conformity_level, 0x01);
        assert!(!response.more_follows);
        assert_eq!(response.objects.len(), 2);
        assert_eq!(response.objects[0].value, b"wiremod".to_vec());
        assert_eq!(response.objects[1].object_id, 0x01);
        assert_eq!(response.objects[1].value, b"0.1".to_vec());
    }

    #[test]
    fn read_device_identification_rejects_wrong_mei_type() {
        let transaction = MockTransaction::replying(vec![Response::Raw {
            function: 0x2B,
            data: vec![0x0D, 0x01, 0x01, 0x00, 0x00, 0x00],
        }]);
        let master = ModbusMaster::new(transaction);

        let err = master.read_device_identification(1, 0x01, 0x00).unwrap_err();
        assert!(matches!(
            err,
            ClientError::InvalidResponse("read device identification MEI type mismatch")
        ));
    }

    #[test]
    fn refresh_updates_point_blocks() {
        let transaction = MockTransaction::replying(vec![
            Response::ReadBits {
                function: FunctionCode::ReadCoils,
                status: vec![0b0000_0010],
            },
            registers(FunctionCode::ReadHoldingRegisters, &[5, 6, 7]),
        ]);
        let calls = Arc::clone(&transaction.calls);
        let master = ModbusMaster::new(transaction);

        let mut coils = CoilPoints::new(20, 2);
        master.refresh_coils(1, &mut coils).unwrap();
        assert_eq!(coils.values(), &[false, true]);

        let mut holding = RegisterPoints::new(100, 3);
        master.refresh_holding_registers(1, &mut holding).unwrap();
        assert_eq!(holding.get(102), Some(7));
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    proptest::proptest! {
        #[test]
        fn response_payload_parsers_never_panic(
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..64)
        ) {
            let _ = super::parse_report_server_id(&payload);
            let _ = super::parse_device_identification(&payload);
        }
    }
}
