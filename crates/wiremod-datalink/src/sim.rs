//! A small in-memory process image that answers requests.

use std::ops::Range;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use wiremod_core::pdu::{ExceptionCode, FunctionCode, Request, Response};

use crate::{ModbusService, ServiceError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoilBank {
    values: Vec<bool>,
}

impl CoilBank {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![false; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: bool) -> Result<(), ServiceError> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?;
        *slot = value;
        Ok(())
    }

    fn read(&self, range: Range<usize>) -> Vec<bool> {
        self.values[range].to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBank {
    values: Vec<u16>,
}

impl RegisterBank {
    pub fn new(size: usize) -> Self {
        Self {
            values: vec![0u16; size],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.values.get(index).copied()
    }

    pub fn set(&mut self, index: usize, value: u16) -> Result<(), ServiceError> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?;
        *slot = value;
        Ok(())
    }

    fn read(&self, range: Range<usize>) -> Vec<u16> {
        self.values[range].to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryPointModel {
    pub coils: CoilBank,
    pub discrete_inputs: CoilBank,
    pub holding_registers: RegisterBank,
    pub input_registers: RegisterBank,
}

impl InMemoryPointModel {
    pub fn new(
        coil_count: usize,
        discrete_input_count: usize,
        holding_register_count: usize,
        input_register_count: usize,
    ) -> Self {
        Self {
            coils: CoilBank::new(coil_count),
            discrete_inputs: CoilBank::new(discrete_input_count),
            holding_registers: RegisterBank::new(holding_register_count),
            input_registers: RegisterBank::new(input_register_count),
        }
    }
}

/// [`ModbusService`] over an [`InMemoryPointModel`], shared across
/// listener threads.
#[derive(Debug)]
pub struct InMemoryModbusService {
    model: RwLock<InMemoryPointModel>,
}

impl InMemoryModbusService {
    pub fn new(
        coil_count: usize,
        discrete_input_count: usize,
        holding_register_count: usize,
        input_register_count: usize,
    ) -> Self {
        Self::with_model(InMemoryPointModel::new(
            coil_count,
            discrete_input_count,
            holding_register_count,
            input_register_count,
        ))
    }

    pub fn with_model(model: InMemoryPointModel) -> Self {
        Self {
            model: RwLock::new(model),
        }
    }

    fn read_model(&self) -> Result<RwLockReadGuard<'_, InMemoryPointModel>, ServiceError> {
        self.model
            .read()
            .map_err(|_| ServiceError::Internal("point model lock poisoned"))
    }

    fn write_model(&self) -> Result<RwLockWriteGuard<'_, InMemoryPointModel>, ServiceError> {
        self.model
            .write()
            .map_err(|_| ServiceError::Internal("point model lock poisoned"))
    }

    pub fn snapshot(&self) -> Result<InMemoryPointModel, ServiceError> {
        Ok(self.read_model()?.clone())
    }

    pub fn set_coil(&self, address: u16, value: bool) -> Result<(), ServiceError> {
        self.write_model()?.coils.set(usize::from(address), value)
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> Result<(), ServiceError> {
        self.write_model()?
            .discrete_inputs
            .set(usize::from(address), value)
    }

    pub fn set_holding_register(&self, address: u16, value: u16) -> Result<(), ServiceError> {
        self.write_model()?
            .holding_registers
            .set(usize::from(address), value)
    }

    pub fn set_input_register(&self, address: u16, value: u16) -> Result<(), ServiceError> {
        self.write_model()?
            .input_registers
            .set(usize::from(address), value)
    }

    pub fn coil(&self, address: u16) -> Option<bool> {
        self.read_model().ok()?.coils.get(usize::from(address))
    }

    pub fn holding_register(&self, address: u16) -> Option<u16> {
        self.read_model()
            .ok()?
            .holding_registers
            .get(usize::from(address))
    }
}

impl ModbusService for InMemoryModbusService {
    fn handle(&self, unit_id: u8, request: &Request) -> Result<Response, ServiceError> {
        let mut model = self.write_model()?;

        let response = match request {
            Request::ReadCoils {
                start_address,
                quantity,
            } => {
                let range = checked_range(*start_address, *quantity, model.coils.len())?;
                Response::read_bits(FunctionCode::ReadCoils, &model.coils.read(range))
            }
            Request::ReadDiscreteInputs {
                start_address,
                quantity,
            } => {
                let range = checked_range(*start_address, *quantity, model.discrete_inputs.len())?;
                Response::read_bits(
                    FunctionCode::ReadDiscreteInputs,
                    &model.discrete_inputs.read(range),
                )
            }
            Request::ReadHoldingRegisters {
                start_address,
                quantity,
            } => {
                let range =
                    checked_range(*start_address, *quantity, model.holding_registers.len())?;
                Response::ReadRegisters {
                    function: FunctionCode::ReadHoldingRegisters,
                    values: model.holding_registers.read(range),
                }
            }
            Request::ReadInputRegisters {
                start_address,
                quantity,
            } => {
                let range = checked_range(*start_address, *quantity, model.input_registers.len())?;
                Response::ReadRegisters {
                    function: FunctionCode::ReadInputRegisters,
                    values: model.input_registers.read(range),
                }
            }
            Request::WriteSingleCoil { address, value } => {
                model.coils.set(usize::from(*address), *value)?;
                Response::WriteSingle {
                    function: FunctionCode::WriteSingleCoil,
                    address: *address,
                    value: if *value { 0xFF00 } else { 0x0000 },
                }
            }
            Request::WriteSingleRegister { address, value } => {
                model.holding_registers.set(usize::from(*address), *value)?;
                Response::WriteSingle {
                    function: FunctionCode::WriteSingleRegister,
                    address: *address,
                    value: *value,
                }
            }
            Request::WriteMultipleCoils {
                start_address,
                values,
            } => {
                let quantity = quantity_of(values.len())?;
                let range = checked_range(*start_address, quantity, model.coils.len())?;
                for (address, value) in range.zip(values) {
                    model.coils.set(address, *value)?;
                }
                Response::WriteMultiple {
                    function: FunctionCode::WriteMultipleCoils,
                    start_address: *start_address,
                    quantity,
                }
            }
            Request::WriteMultipleRegisters {
                start_address,
                values,
            } => {
                let quantity = quantity_of(values.len())?;
                let range = checked_range(*start_address, quantity, model.holding_registers.len())?;
                for (address, value) in range.zip(values) {
                    model.holding_registers.set(address, *value)?;
                }
                Response::WriteMultiple {
                    function: FunctionCode::WriteMultipleRegisters,
                    start_address: *start_address,
                    quantity,
                }
            }
            Request::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                let index = usize::from(*address);
                let current = model
                    .holding_registers
                    .get(index)
                    .ok_or(ServiceError::Exception(ExceptionCode::IllegalDataAddress))?;
                let next = (current & *and_mask) | (*or_mask & !*and_mask);
                model.holding_registers.set(index, next)?;
                Response::MaskWriteRegister {
                    address: *address,
                    and_mask: *and_mask,
                    or_mask: *or_mask,
                }
            }
            Request::ReadWriteMultipleRegisters {
                read_start,
                read_quantity,
                write_start,
                values,
            } => {
                // Writes land before the read is taken.
                let write_quantity = quantity_of(values.len())?;
                let write_range =
                    checked_range(*write_start, write_quantity, model.holding_registers.len())?;
                let read_range =
                    checked_range(*read_start, *read_quantity, model.holding_registers.len())?;
                for (address, value) in write_range.zip(values) {
                    model.holding_registers.set(address, *value)?;
                }
                Response::ReadRegisters {
                    function: FunctionCode::ReadWriteMultipleRegisters,
                    values: model.holding_registers.read(read_range),
                }
            }
            Request::Raw { function: 0x11, data } if data.is_empty() => {
                // Report server id: byte count, server id, run indicator.
                Response::Raw {
                    function: 0x11,
                    data: vec![0x02, unit_id, 0xFF],
                }
            }
            Request::Raw { function: 0x2B, data } => read_device_identification(data)?,
            Request::Raw { .. } => {
                return Err(ServiceError::Exception(ExceptionCode::IllegalFunction));
            }
        };

        Ok(response)
    }
}

/// Basic device identification (MEI type 0x0E), answered in one piece.
fn read_device_identification(data: &[u8]) -> Result<Response, ServiceError> {
    let [0x0E, read_code, _object_id] = *data else {
        return Err(ServiceError::Exception(ExceptionCode::IllegalDataValue));
    };
    let objects: [(u8, &[u8]); 3] = [
        (0x00, b"wiremod"),
        (0x01, b"in-memory"),
        (0x02, env!("CARGO_PKG_VERSION").as_bytes()),
    ];

    // MEI type, read code, conformity level, more follows, next object, count
    let mut out = vec![0x0E, read_code, 0x01, 0x00, 0x00, objects.len() as u8];
    for (id, value) in objects {
        let len = u8::try_from(value.len())
            .map_err(|_| ServiceError::Internal("device identification object too large"))?;
        out.push(id);
        out.push(len);
        out.extend_from_slice(value);
    }
    Ok(Response::Raw {
        function: 0x2B,
        data: out,
    })
}

fn quantity_of(len: usize) -> Result<u16, ServiceError> {
    u16::try_from(len).map_err(|_| ServiceError::InvalidRequest("quantity too large"))
}

fn checked_range(start: u16, quantity: u16, len: usize) -> Result<Range<usize>, ServiceError> {
    let start = usize::from(start);
    let end = start + usize::from(quantity);
    if quantity == 0 || end > len {
        return Err(ServiceError::Exception(ExceptionCode::IllegalDataAddress));
    }
    Ok(start..end)
}
