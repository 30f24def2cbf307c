use alloc::vec::Vec;

use super::{pack_bits, unpack_bits, ExceptionResponse, MAX_READ_REGISTERS};
use crate::encoding::{Reader, Writer};
use crate::frame::MAX_PDU_LEN;
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};

/// A response PDU with owned payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Response {
    /// Read coils or read discrete inputs; bits packed LSB first.
    ReadBits {
        function: FunctionCode,
        status: Vec<u8>,
    },
    /// Read holding, read input or read/write multiple registers.
    ReadRegisters {
        function: FunctionCode,
        values: Vec<u16>,
    },
    /// Echo of a single coil or single register write.
    WriteSingle {
        function: FunctionCode,
        address: u16,
        value: u16,
    },
    WriteMultiple {
        function: FunctionCode,
        start_address: u16,
        quantity: u16,
    },
    MaskWriteRegister {
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    Raw {
        function: u8,
        data: Vec<u8>,
    },
    Exception(ExceptionResponse),
}

impl Response {
    pub fn read_bits(function: FunctionCode, bits: &[bool]) -> Self {
        Self::ReadBits {
            function,
            status: pack_bits(bits),
        }
    }

    /// Function code of the request this answers, without the exception bit.
    pub fn function(&self) -> u8 {
        match self {
            Self::ReadBits { function, .. }
            | Self::ReadRegisters { function, .. }
            | Self::WriteSingle { function, .. }
            | Self::WriteMultiple { function, .. } => function.as_u8(),
            Self::MaskWriteRegister { .. } => FunctionCode::MaskWriteRegister.as_u8(),
            Self::Raw { function, .. } => *function,
            Self::Exception(exception) => exception.function_code,
        }
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    pub fn exception(&self) -> Option<&ExceptionResponse> {
        match self {
            Self::Exception(exception) => Some(exception),
            _ => None,
        }
    }

    pub fn registers(&self) -> Option<&[u16]> {
        match self {
            Self::ReadRegisters { values, .. } => Some(values),
            _ => None,
        }
    }

    /// The first `count` bits of a bit read.
    pub fn bits(&self, count: usize) -> Option<Vec<bool>> {
        match self {
            Self::ReadBits { status, .. } if status.len() * 8 >= count => {
                Some(unpack_bits(status, count))
            }
            _ => None,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadBits { function, status } => {
                let byte_count =
                    u8::try_from(status.len()).map_err(|_| EncodeError::ValueOutOfRange)?;
                w.write_u8(function.as_u8())?;
                w.write_u8(byte_count)?;
                w.write_all(status)
            }
            Self::ReadRegisters { function, values } => {
                if values.len() > usize::from(MAX_READ_REGISTERS) {
                    return Err(EncodeError::ValueOutOfRange);
                }
                w.write_u8(function.as_u8())?;
                w.write_u8((values.len() * 2) as u8)?;
                values.iter().try_for_each(|value| w.write_be_u16(*value))
            }
            Self::WriteSingle {
                function,
                address,
                value,
            } => {
                w.write_u8(function.as_u8())?;
                w.write_be_u16(*address)?;
                w.write_be_u16(*value)
            }
            Self::WriteMultiple {
                function,
                start_address,
                quantity,
            } => {
                w.write_u8(function.as_u8())?;
                w.write_be_u16(*start_address)?;
                w.write_be_u16(*quantity)
            }
            Self::MaskWriteRegister {
                address,
                and_mask,
                or_mask,
            } => {
                w.write_u8(FunctionCode::MaskWriteRegister.as_u8())?;
                w.write_be_u16(*address)?;
                w.write_be_u16(*and_mask)?;
                w.write_be_u16(*or_mask)
            }
            Self::Raw { function, data } => {
                if FunctionCode::is_exception(*function) {
                    return Err(EncodeError::ValueOutOfRange);
                }
                w.write_u8(*function)?;
                w.write_all(data)
            }
            Self::Exception(exception) => exception.encode(w),
        }
    }

    /// Decodes a complete response PDU, function code first.
    pub fn decode(pdu: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(pdu);
        let function_byte = r.read_u8()?;
        if FunctionCode::is_exception(function_byte) {
            let exception = ExceptionResponse::decode(function_byte, &mut r)?;
            r.finish()?;
            return Ok(Self::Exception(exception));
        }

        let function = FunctionCode::from_u8(function_byte)?;
        let response = match function {
            FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
                let byte_count = usize::from(r.read_u8()?);
                if byte_count == 0 {
                    return Err(DecodeError::InvalidLength);
                }
                Self::ReadBits {
                    function,
                    status: r.read_exact(byte_count)?.to_vec(),
                }
            }
            FunctionCode::ReadHoldingRegisters
            | FunctionCode::ReadInputRegisters
            | FunctionCode::ReadWriteMultipleRegisters => {
                let byte_count = usize::from(r.read_u8()?);
                if byte_count == 0
                    || byte_count % 2 != 0
                    || byte_count > usize::from(MAX_READ_REGISTERS) * 2
                {
                    return Err(DecodeError::InvalidLength);
                }
                let values = (0..byte_count / 2)
                    .map(|_| r.read_be_u16())
                    .collect::<Result<Vec<_>, _>>()?;
                Self::ReadRegisters { function, values }
            }
            FunctionCode::WriteSingleCoil | FunctionCode::WriteSingleRegister => {
                Self::WriteSingle {
                    function,
                    address: r.read_be_u16()?,
                    value: r.read_be_u16()?,
                }
            }
            FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => {
                Self::WriteMultiple {
                    function,
                    start_address: r.read_be_u16()?,
                    quantity: r.read_be_u16()?,
                }
            }
            FunctionCode::MaskWriteRegister => Self::MaskWriteRegister {
                address: r.read_be_u16()?,
                and_mask: r.read_be_u16()?,
                or_mask: r.read_be_u16()?,
            },
            _ => Self::Raw {
                function: function_byte,
                data: r.read_rest().to_vec(),
            },
        };

        r.finish()?;
        Ok(response)
    }

    pub fn to_pdu(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; MAX_PDU_LEN];
        let mut w = Writer::new(&mut buf);
        self.encode(&mut w)?;
        Ok(w.as_written().to_vec())
    }
}

impl From<ExceptionResponse> for Response {
    fn from(exception: ExceptionResponse) -> Self {
        Self::Exception(exception)
    }
}
