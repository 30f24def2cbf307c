//! Application data unit framing for each Modbus encoding.

pub mod ascii;
pub mod bin;
pub mod rtu;
pub mod tcp;

/// Largest PDU (function code plus data) any encoding carries.
pub const MAX_PDU_LEN: usize = 253;
