//! Protocol data units: function codes, exceptions and the owned
//! request/response payload codec.

mod exception;
mod function_code;
#[cfg(feature = "alloc")]
mod request;
#[cfg(feature = "alloc")]
mod response;

pub use exception::{ExceptionCode, ExceptionResponse};
pub use function_code::FunctionCode;
#[cfg(feature = "alloc")]
pub use request::Request;
#[cfg(feature = "alloc")]
pub use response::Response;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;
pub const MAX_RW_WRITE_REGISTERS: u16 = 121;

pub(crate) const COIL_ON: u16 = 0xFF00;
pub(crate) const COIL_OFF: u16 = 0x0000;

#[cfg(feature = "alloc")]
pub(crate) fn pack_bits(values: &[bool]) -> alloc::vec::Vec<u8> {
    let mut out = alloc::vec![0u8; values.len().div_ceil(8)];
    for (i, value) in values.iter().enumerate() {
        if *value {
            out[i / 8] |= 1u8 << (i % 8);
        }
    }
    out
}

#[cfg(feature = "alloc")]
pub(crate) fn unpack_bits(packed: &[u8], count: usize) -> alloc::vec::Vec<bool> {
    (0..count)
        .map(|i| packed.get(i / 8).is_some_and(|byte| byte & (1u8 << (i % 8)) != 0))
        .collect()
}
