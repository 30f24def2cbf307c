//! Modbus protocol encoding and framing in pure Rust.
//!
//! `wiremod-core` provides `no_std`-compatible encoding and decoding of Modbus
//! PDUs and of the RTU, ASCII, BIN and MBAP frame formats. With the `std`
//! feature it also provides the symbol codecs used to read the delimited
//! serial encodings from a byte stream.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod checksum;
#[cfg(feature = "std")]
pub mod codec;
pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;

pub use error::{DecodeError, EncodeError};
