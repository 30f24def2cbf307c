use std::io::{self, Read, Write};

use super::{read_byte, Symbol, SymbolRead, SymbolWrite};
use crate::frame::bin::{is_sentinel, FRAME_END, FRAME_START};

/// Decodes BIN sentinels and doubled literal bytes from a byte stream.
///
/// Inside a frame a sentinel is only a token when the next byte differs from
/// it, so the reader looks one byte ahead and keeps that byte for the next
/// call. A read timeout or end of file while looking ahead also ends the
/// token. Outside a frame `{` always starts one.
#[derive(Debug)]
pub struct BinReader<R> {
    inner: R,
    lookahead: Option<u8>,
    in_frame: bool,
}

impl<R> BinReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            lookahead: None,
            in_frame: false,
        }
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

impl<R: Read> BinReader<R> {
    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        match self.lookahead.take() {
            Some(byte) => Ok(Some(byte)),
            None => read_byte(&mut self.inner),
        }
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        match read_byte(&mut self.inner) {
            Ok(byte) => Ok(byte),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

impl<R: Read> SymbolRead for BinReader<R> {
    fn read_symbol(&mut self) -> io::Result<Option<Symbol>> {
        let Some(byte) = self.next_byte()? else {
            return Ok(None);
        };
        if !self.in_frame {
            if byte == FRAME_START {
                self.in_frame = true;
                return Ok(Some(Symbol::FrameStart));
            }
            return Ok(Some(Symbol::Byte(byte)));
        }
        if !is_sentinel(byte) {
            return Ok(Some(Symbol::Byte(byte)));
        }

        match self.peek_byte()? {
            Some(next) if next == byte => return Ok(Some(Symbol::Byte(byte))),
            Some(next) => self.lookahead = Some(next),
            None => {}
        }
        if byte == FRAME_END {
            self.in_frame = false;
            Ok(Some(Symbol::FrameEnd))
        } else {
            Ok(Some(Symbol::FrameStart))
        }
    }

    fn discard_buffered(&mut self) {
        self.lookahead = None;
        self.in_frame = false;
    }
}

/// Encodes symbols as BIN sentinels, doubling data bytes that collide.
#[derive(Debug)]
pub struct BinWriter<W> {
    inner: W,
}

impl<W> BinWriter<W> {
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

impl<W: Write> SymbolWrite for BinWriter<W> {
    fn write_symbol(&mut self, symbol: Symbol) -> io::Result<()> {
        match symbol {
            Symbol::FrameStart => self.inner.write_all(&[FRAME_START]),
            Symbol::FrameEnd => self.inner.write_all(&[FRAME_END]),
            Symbol::Byte(byte) if is_sentinel(byte) => self.inner.write_all(&[byte, byte]),
            Symbol::Byte(byte) => self.inner.write_all(&[byte]),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io::{self, Read};

    use super::{BinReader, BinWriter};
    use crate::codec::{Symbol, SymbolRead, SymbolWrite};

    /// Yields its bytes, then fails every read with `TimedOut`.
    struct TimingOut(VecDeque<u8>);

    impl Read for TimingOut {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.pop_front() {
                Some(byte) => {
                    buf[0] = byte;
                    Ok(1)
                }
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    fn encode(symbols: &[Symbol]) -> Vec<u8> {
        let mut writer = BinWriter::new(Vec::new());
        for symbol in symbols {
            writer.write_symbol(*symbol).unwrap();
        }
        writer.into_inner()
    }

    #[test]
    fn writer_doubles_sentinels() {
        let bytes = encode(&[
            Symbol::FrameStart,
            Symbol::Byte(0x7B),
            Symbol::Byte(0x01),
            Symbol::Byte(0x7D),
            Symbol::FrameEnd,
        ]);
        assert_eq!(bytes, vec![b'{', b'{', b'{', 0x01, b'}', b'}', b'}']);
    }

    #[test]
    fn reader_restores_literals_and_tokens() {
        let mut reader = BinReader::new(&[b'{', b'{', b'{', 0x01, b'}', b'}', b'}', b'{'][..]);
        let mut out = Vec::new();
        while let Some(symbol) = reader.read_symbol().unwrap() {
            out.push(symbol);
        }
        assert_eq!(
            out,
            vec![
                Symbol::FrameStart,
                Symbol::Byte(0x7B),
                Symbol::Byte(0x01),
                Symbol::Byte(0x7D),
                Symbol::FrameEnd,
                Symbol::FrameStart,
            ]
        );
    }

    #[test]
    fn lookahead_byte_is_not_lost() {
        let mut reader = BinReader::new(&[b'{', 0x05, b'}', 0x09][..]);
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::FrameStart));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::Byte(0x05)));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::FrameEnd));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::Byte(0x09)));
        assert_eq!(reader.read_symbol().unwrap(), None);
    }

    #[test]
    fn timeout_after_sentinel_ends_frame() {
        let mut reader = BinReader::new(TimingOut(VecDeque::from(vec![b'{', 0x05, b'}'])));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::FrameStart));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::Byte(0x05)));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::FrameEnd));
        let err = reader.read_symbol().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn discard_buffered_drops_lookahead() {
        let mut reader = BinReader::new(&[b'{', b'}', 0x42][..]);
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::FrameStart));
        assert_eq!(reader.read_symbol().unwrap(), Some(Symbol::FrameEnd));
        reader.discard_buffered();
        assert_eq!(reader.read_symbol().unwrap(), None);
    }
}
