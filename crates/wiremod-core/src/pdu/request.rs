use alloc::vec::Vec;

use super::{
    pack_bits, unpack_bits, COIL_OFF, COIL_ON, MAX_READ_BITS, MAX_READ_REGISTERS,
    MAX_RW_WRITE_REGISTERS, MAX_WRITE_COILS, MAX_WRITE_REGISTERS,
};
use crate::encoding::{Reader, Writer};
use crate::frame::MAX_PDU_LEN;
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};

fn validate_quantity(quantity: u16, max: u16) -> Result<(), EncodeError> {
    if quantity == 0 || quantity > max {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(())
}

fn validate_quantity_decode(quantity: u16, max: u16) -> Result<(), DecodeError> {
    if quantity == 0 || quantity > max {
        return Err(DecodeError::InvalidValue);
    }
    Ok(())
}

fn checked_quantity(len: usize, max: u16) -> Result<u16, EncodeError> {
    let quantity = u16::try_from(len).map_err(|_| EncodeError::ValueOutOfRange)?;
    validate_quantity(quantity, max)?;
    Ok(quantity)
}

fn read_registers(r: &mut Reader<'_>, quantity: u16) -> Result<Vec<u16>, DecodeError> {
    (0..quantity).map(|_| r.read_be_u16()).collect()
}

/// A request PDU with owned payload.
///
/// Function codes without a dedicated variant travel as [`Request::Raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Request {
    ReadCoils {
        start_address: u16,
        quantity: u16,
    },
    ReadDiscreteInputs {
        start_address: u16,
        quantity: u16,
    },
    ReadHoldingRegisters {
        start_address: u16,
        quantity: u16,
    },
    ReadInputRegisters {
        start_address: u16,
        quantity: u16,
    },
    WriteSingleCoil {
        address: u16,
        value: bool,
    },
    WriteSingleRegister {
        address: u16,
        value: u16,
    },
    WriteMultipleCoils {
        start_address: u16,
        values: Vec<bool>,
    },
    WriteMultipleRegisters {
        start_address: u16,
        values: Vec<u16>,
    },
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    ReadWriteMultipleRegisters {
        read_start: u16,
        read_quantity: u16,
        write_start: u16,
        values: Vec<u16>,
    },
    Raw {
        function: u8,
        data: Vec<u8>,
    },
}

impl Request {
    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils { .. } => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs { .. } => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister { .. } => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils { .. } => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters { .. } => FunctionCode::WriteMultipleRegisters,
            Self::MaskWriteRegister { .. } => FunctionCode::MaskWriteRegister,
            Self::ReadWriteMultipleRegisters { .. } => FunctionCode::ReadWriteMultipleRegisters,
            Self::Raw { function, .. } => {
                FunctionCode::from_u8(*function).unwrap_or(FunctionCode::Custom(*function))
            }
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(self.function_code().as_u8())?;
        match self {
            Self::ReadCoils {
                start_address,
                quantity,
            }
            | Self::ReadDiscreteInputs {
                start_address,
                quantity,
            } => {
                validate_quantity(*quantity, MAX_READ_BITS)?;
                w.write_be_u16(*start_address)?;
                w.write_be_u16(*quantity)
            }
            Self::ReadHoldingRegisters {
                start_address,
                quantity,
            }
            | Self::ReadInputRegisters {
                start_address,
                quantity,
            } => {
                validate_quantity(*quantity, MAX_READ_REGISTERS)?;
                w.write_be_u16(*start_address)?;
                w.write_be_u16(*quantity)
            }
            Self::WriteSingleCoil { address, value } => {
                w.write_be_u16(*address)?;
                w.write_be_u16(if *value { COIL_ON } else { COIL_OFF })
            }
            Self::WriteSingleRegister { address, value } => {
                w.write_be_u16(*address)?;
                w.write_be_u16(*value)
            }
            Self::WriteMultipleCoils {
                start_address,
                values,
            } => {
                let quantity = checked_quantity(values.len(), MAX_WRITE_COILS)?;
                let packed = pack_bits(values);
                w.write_be_u16(*start_address)?;
                w.write_be_u16(quantity)?;
                w.write_u8(packed.len() as u8)?;
                w.write_all(&packed)
            }
            Self::WriteMultipleRegisters {
                start_address,
                values,
            } => {
                let quantity = checked_quantity(values.len(), MAX_WRITE_REGISTERS)?;
                w.write_be_u16(*start_address)?;
                w.write_be_u16(quantity)?;
                w.write_u8((quantity * 2) as u8)?;
                values.iter().try_for_each(|value| w.write_be_u16(*value))
            }
            Self::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                w.write_be_u16(*address)?;
                w.write_be_u16(*and_mask)?;
                w.write_be_u16(*or_mask)
            }
            Self::ReadWriteMultipleRegisters {
                read_start,
                read_quantity,
                write_start,
                values,
            } => {
                validate_quantity(*read_quantity, MAX_READ_REGISTERS)?;
                let write_quantity = checked_quantity(values.len(), MAX_RW_WRITE_REGISTERS)?;
                w.write_be_u16(*read_start)?;
                w.write_be_u16(*read_quantity)?;
                w.write_be_u16(*write_start)?;
                w.write_be_u16(write_quantity)?;
                w.write_u8((write_quantity * 2) as u8)?;
                values.iter().try_for_each(|value| w.write_be_u16(*value))
            }
            Self::Raw { function, data } => {
                if FunctionCode::is_exception(*function) || *function == 0 {
                    return Err(EncodeError::ValueOutOfRange);
                }
                w.write_all(data)
            }
        }
    }

    /// Decodes a complete request PDU, function code first.
    pub fn decode(pdu: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(pdu);
        let function_byte = r.read_u8()?;
        let function = FunctionCode::from_u8(function_byte)?;

        let request = match function {
            FunctionCode::ReadCoils
            | FunctionCode::ReadDiscreteInputs
            | FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                match function {
                    FunctionCode::ReadCoils => {
                        validate_quantity_decode(quantity, MAX_READ_BITS)?;
                        Self::ReadCoils {
                            start_address,
                            quantity,
                        }
                    }
                    FunctionCode::ReadDiscreteInputs => {
                        validate_quantity_decode(quantity, MAX_READ_BITS)?;
                        Self::ReadDiscreteInputs {
                            start_address,
                            quantity,
                        }
                    }
                    FunctionCode::ReadHoldingRegisters => {
                        validate_quantity_decode(quantity, MAX_READ_REGISTERS)?;
                        Self::ReadHoldingRegisters {
                            start_address,
                            quantity,
                        }
                    }
                    _ => {
                        validate_quantity_decode(quantity, MAX_READ_REGISTERS)?;
                        Self::ReadInputRegisters {
                            start_address,
                            quantity,
                        }
                    }
                }
            }
            FunctionCode::WriteSingleCoil => {
                let address = r.read_be_u16()?;
                let value = match r.read_be_u16()? {
                    COIL_ON => true,
                    COIL_OFF => false,
                    _ => return Err(DecodeError::InvalidValue),
                };
                Self::WriteSingleCoil { address, value }
            }
            FunctionCode::WriteSingleRegister => Self::WriteSingleRegister {
                address: r.read_be_u16()?,
                value: r.read_be_u16()?,
            },
            FunctionCode::WriteMultipleCoils => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity_decode(quantity, MAX_WRITE_COILS)?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != usize::from(quantity).div_ceil(8) {
                    return Err(DecodeError::InvalidLength);
                }
                let packed = r.read_exact(byte_count)?;
                Self::WriteMultipleCoils {
                    start_address,
                    values: unpack_bits(packed, usize::from(quantity)),
                }
            }
            FunctionCode::WriteMultipleRegisters => {
                let start_address = r.read_be_u16()?;
                let quantity = r.read_be_u16()?;
                validate_quantity_decode(quantity, MAX_WRITE_REGISTERS)?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != usize::from(quantity) * 2 {
                    return Err(DecodeError::InvalidLength);
                }
                Self::WriteMultipleRegisters {
                    start_address,
                    values: read_registers(&mut r, quantity)?,
                }
            }
            FunctionCode::MaskWriteRegister => Self::MaskWriteRegister {
                address: r.read_be_u16()?,
                and_mask: r.read_be_u16()?,
                or_mask: r.read_be_u16()?,
            },
            FunctionCode::ReadWriteMultipleRegisters => {
                let read_start = r.read_be_u16()?;
                let read_quantity = r.read_be_u16()?;
                validate_quantity_decode(read_quantity, MAX_READ_REGISTERS)?;
                let write_start = r.read_be_u16()?;
                let write_quantity = r.read_be_u16()?;
                validate_quantity_decode(write_quantity, MAX_RW_WRITE_REGISTERS)?;
                let byte_count = usize::from(r.read_u8()?);
                if byte_count != usize::from(write_quantity) * 2 {
                    return Err(DecodeError::InvalidLength);
                }
                Self::ReadWriteMultipleRegisters {
                    read_start,
                    read_quantity,
                    write_start,
                    values: read_registers(&mut r, write_quantity)?,
                }
            }
            _ => Self::Raw {
                function: function_byte,
                data: r.read_rest().to_vec(),
            },
        };

        r.finish()?;
        Ok(request)
    }

    pub fn to_pdu(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; MAX_PDU_LEN];
        let mut w = Writer::new(&mut buf);
        self.encode(&mut w)?;
        Ok(w.as_written().to_vec())
    }
}
