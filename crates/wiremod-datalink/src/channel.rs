//! Byte channels underneath the transports.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::trace;

/// A bidirectional byte pipe with read timeout control.
pub trait Channel: Read + Write + Send {
    /// `None` blocks reads indefinitely.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Discards bytes already received but not yet read.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Writes one complete frame.
    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        self.write_all(frame)?;
        self.flush()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<C: Channel + ?Sized> Channel for Box<C> {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        (**self).set_timeout(timeout)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        (**self).send(frame)
    }

    fn shutdown(&mut self) -> io::Result<()> {
        (**self).shutdown()
    }
}

impl Channel for TcpStream {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        // A zero duration is rejected by the socket API.
        self.set_read_timeout(timeout.filter(|t| !t.is_zero()))
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.set_nonblocking(true)?;
        let mut scratch = [0u8; 256];
        let drained = loop {
            match self.read(&mut scratch) {
                Ok(0) => break Ok(()),
                Ok(n) => trace!(discarded = n, "discarding buffered tcp input"),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => break Err(err),
            }
        };
        self.set_nonblocking(false)?;
        drained
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(err) if err.kind() != io::ErrorKind::NotConnected => Err(err),
            _ => Ok(()),
        }
    }
}

/// Read timeout applied when the caller asks for no timeout at all.
const IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// RS-485 half-duplex driver control around each transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rs485Control {
    pub delay_before_send: Duration,
    pub delay_after_send: Duration,
}

/// A serial port opened through `serialport`.
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
    rs485: Option<Rs485Control>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port, rs485: None }
    }

    /// Raise RTS while sending, with the given settle delays.
    pub fn with_rs485(mut self, control: Rs485Control) -> Self {
        self.rs485 = Some(control);
        self
    }

    pub fn port_name(&self) -> Option<String> {
        self.port.name()
    }
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("port", &self.port.name())
            .field("rs485", &self.rs485)
            .finish()
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Channel for SerialChannel {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.port
            .set_timeout(timeout.unwrap_or(IDLE_TIMEOUT))
            .map_err(io::Error::from)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(io::Error::from)
    }

    fn send(&mut self, frame: &[u8]) -> io::Result<()> {
        let Some(control) = self.rs485 else {
            self.port.write_all(frame)?;
            return self.port.flush();
        };

        self.port
            .write_request_to_send(true)
            .map_err(io::Error::from)?;
        thread::sleep(control.delay_before_send);
        let sent = self.port.write_all(frame).and_then(|_| self.port.flush());
        thread::sleep(control.delay_after_send);
        self.port
            .write_request_to_send(false)
            .map_err(io::Error::from)?;
        sent
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    input: VecDeque<VecDeque<u8>>,
    pending_write: Vec<u8>,
    written: Vec<Vec<u8>>,
    echo: bool,
    closed: bool,
    timeout: Option<Duration>,
    clears: usize,
}

/// An in-memory channel for exercising transports without hardware.
///
/// Input is queued as bursts; a read never crosses from one burst into the
/// next, and [`Channel::clear_input`] drops the burst being read. With no
/// input left a read times out after the configured timeout, or reports end
/// of file once [`MemoryChannel::close`] was called. Clones share state so a
/// test can keep a handle while a transport owns the channel.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every sent frame is read back first, like a two-wire bus echo.
    pub fn with_echo(self) -> Self {
        self.state().echo = true;
        self
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_input(&self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        if !bytes.is_empty() {
            self.state().input.push_back(bytes.into());
        }
    }

    /// Frames sent so far, one entry per flushed write.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state().written.clone()
    }

    pub fn pending_input(&self) -> usize {
        self.state().input.iter().map(VecDeque::len).sum()
    }

    pub fn clear_count(&self) -> usize {
        self.state().clears
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.state().timeout
    }

    pub fn close(&self) {
        self.state().closed = true;
    }
}

impl MemoryState {
    fn take_input(&mut self, buf: &mut [u8]) -> Option<usize> {
        while let Some(burst) = self.input.front_mut() {
            if burst.is_empty() {
                self.input.pop_front();
                continue;
            }
            let n = buf.len().min(burst.len());
            for (slot, byte) in buf.iter_mut().zip(burst.drain(..n)) {
                *slot = byte;
            }
            return Some(n);
        }
        None
    }
}

impl Read for MemoryChannel {
    /// An empty channel waits out the configured timeout once, so input
    /// pushed by another thread in the meantime is still seen.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = {
            let mut state = self.state();
            if let Some(n) = state.take_input(buf) {
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            state.timeout
        };

        if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
            thread::sleep(timeout);
            let mut state = self.state();
            if let Some(n) = state.take_input(buf) {
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
        }
        Err(io::Error::new(io::ErrorKind::TimedOut, "no input queued"))
    }
}

impl Write for MemoryChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"));
        }
        state.pending_write.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state();
        if state.pending_write.is_empty() {
            return Ok(());
        }
        let frame = std::mem::take(&mut state.pending_write);
        if state.echo {
            state.input.push_front(frame.iter().copied().collect());
        }
        state.written.push(frame);
        Ok(())
    }
}

impl Channel for MemoryChannel {
    fn set_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.state().timeout = timeout;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let mut state = self.state();
        state.input.pop_front();
        state.clears += 1;
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Channel, MemoryChannel};
    use std::io::{self, Read};

    #[test]
    fn reads_do_not_cross_bursts() {
        let mut channel = MemoryChannel::new();
        channel.push_input(vec![1, 2]);
        channel.push_input(vec![3]);

        let mut buf = [0u8; 8];
        assert_eq!(channel.read(&mut buf).unwrap(), 2);
        assert_eq!(channel.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 3);
        let err = channel.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn clear_input_drops_current_burst() {
        let mut channel = MemoryChannel::new();
        channel.push_input(vec![1, 2, 3]);
        channel.push_input(vec![4]);

        let mut one = [0u8; 1];
        channel.read_exact(&mut one).unwrap();
        channel.clear_input().unwrap();
        channel.read_exact(&mut one).unwrap();
        assert_eq!(one[0], 4);
        assert_eq!(channel.clear_count(), 1);
    }

    #[test]
    fn echo_is_read_before_queued_input() {
        let handle = MemoryChannel::new().with_echo();
        let mut channel = handle.clone();
        channel.push_input(vec![9]);
        channel.send(&[7, 8]).unwrap();

        let mut buf = [0u8; 3];
        channel.read_exact(&mut buf[..2]).unwrap();
        channel.read_exact(&mut buf[2..]).unwrap();
        assert_eq!(buf, [7, 8, 9]);
        assert_eq!(handle.written(), vec![vec![7, 8]]);
    }

    #[test]
    fn closed_channel_reports_eof() {
        let mut channel = MemoryChannel::new();
        channel.close();
        let mut buf = [0u8; 1];
        assert_eq!(channel.read(&mut buf).unwrap(), 0);
    }
}
