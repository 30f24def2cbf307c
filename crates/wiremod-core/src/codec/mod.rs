//! Symbol streams for the delimited serial encodings.
//!
//! A delimited encoding maps frame boundaries and data bytes onto a byte
//! stream in its own way. The readers here turn that stream back into
//! [`Symbol`]s so the frame assembly logic can be shared between ASCII and
//! BIN. Malformed input surfaces as [`std::io::ErrorKind::InvalidData`].

mod ascii;
mod bin;

use std::io;

pub use ascii::{AsciiReader, AsciiWriter};
pub use bin::{BinReader, BinWriter};

/// One decoded element of a delimited stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    FrameStart,
    FrameEnd,
    Byte(u8),
}

pub trait SymbolRead {
    /// Next symbol, or `None` once the underlying stream reports end of file.
    fn read_symbol(&mut self) -> io::Result<Option<Symbol>>;

    /// Drops any byte held back by the decoder.
    fn discard_buffered(&mut self) {}
}

pub trait SymbolWrite {
    fn write_symbol(&mut self, symbol: Symbol) -> io::Result<()>;

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        for byte in bytes {
            self.write_symbol(Symbol::Byte(*byte))?;
        }
        Ok(())
    }
}

pub(crate) fn malformed(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Reads a single byte, retrying on `Interrupted`.
pub(crate) fn read_byte<R: io::Read>(reader: &mut R) -> io::Result<Option<u8>> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
