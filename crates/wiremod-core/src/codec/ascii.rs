use std::io::{self, Read, Write};

use super::{malformed, read_byte, Symbol, SymbolRead, SymbolWrite};
use crate::frame::ascii::{from_hex_digits, hex_digits, FRAME_END, FRAME_START};

/// Decodes `:`, CR LF and hex digit pairs from a byte stream.
#[derive(Debug)]
pub struct AsciiReader<R> {
    inner: R,
}

impl<R> AsciiReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> SymbolRead for AsciiReader<R> {
    fn read_symbol(&mut self) -> io::Result<Option<Symbol>> {
        let Some(first) = read_byte(&mut self.inner)? else {
            return Ok(None);
        };
        match first {
            FRAME_START => Ok(Some(Symbol::FrameStart)),
            b'\r' => match read_byte(&mut self.inner)? {
                Some(b'\n') => Ok(Some(Symbol::FrameEnd)),
                Some(_) => Err(malformed("carriage return not followed by line feed")),
                None => Ok(None),
            },
            high => {
                let Some(low) = read_byte(&mut self.inner)? else {
                    return Ok(None);
                };
                from_hex_digits(high, low)
                    .map(|byte| Some(Symbol::Byte(byte)))
                    .ok_or_else(|| malformed("invalid hex digit"))
            }
        }
    }
}

/// Encodes symbols as `:`, CR LF and uppercase hex digit pairs.
#[derive(Debug)]
pub struct AsciiWriter<W> {
    inner: W,
}

impl<W> AsciiWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> SymbolWrite for AsciiWriter<W> {
    fn write_symbol(&mut self, symbol: Symbol) -> io::Result<()> {
        match symbol {
            Symbol::FrameStart => self.inner.write_all(&[FRAME_START]),
            Symbol::FrameEnd => self.inner.write_all(&FRAME_END),
            Symbol::Byte(byte) => self.inner.write_all(&hex_digits(byte)),
        }
    }
}
