use std::fmt;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};
use tracing::debug;

use crate::channel::Rs485Control;
use crate::transaction::Connection;
use crate::transport::ModbusTransport;
use crate::{AsciiTransport, BinTransport, Channel, LinkError, RtuTransport, SerialChannel};

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Framing used on the serial line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SerialEncoding {
    #[default]
    Rtu,
    Ascii,
    Bin,
}

impl fmt::Display for SerialEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rtu => "rtu",
            Self::Ascii => "ascii",
            Self::Bin => "bin",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialParameters {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
    pub encoding: SerialEncoding,
    /// The line reflects transmitted bytes back (two-wire RS-485 without
    /// receiver disable). Only RTU framing strips the echo.
    pub echo: bool,
    pub receive_timeout: Duration,
    pub rs485: Option<Rs485Control>,
}

impl SerialParameters {
    /// 8 data bits, 1 stop bit, even parity, no flow control, RTU.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::Even,
            flow_control: FlowControl::None,
            encoding: SerialEncoding::Rtu,
            echo: false,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            rs485: None,
        }
    }

    pub fn with_data_bits(mut self, data_bits: DataBits) -> Self {
        self.data_bits = data_bits;
        self
    }

    pub fn with_stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }

    pub fn with_encoding(mut self, encoding: SerialEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Drive RTS around each transmission with the given settle delays.
    pub fn with_rs485(mut self, delay_before_send: Duration, delay_after_send: Duration) -> Self {
        self.rs485 = Some(Rs485Control {
            delay_before_send,
            delay_after_send,
        });
        self
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.port_name.trim().is_empty() {
            return Err(LinkError::Config("serial port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::Config("baud rate must be positive".into()));
        }
        if self.receive_timeout.is_zero() {
            return Err(LinkError::Config("receive timeout must be positive".into()));
        }
        if self.echo && self.encoding != SerialEncoding::Rtu {
            return Err(LinkError::Config(format!(
                "echo suppression is not supported for {} framing",
                self.encoding
            )));
        }
        Ok(())
    }
}

/// A serial port plus the transport for its configured encoding.
pub struct SerialConnection {
    params: SerialParameters,
    transport: Option<Box<dyn ModbusTransport>>,
}

impl SerialConnection {
    /// Checks the parameters; the port is opened by [`Connection::open`].
    pub fn new(params: SerialParameters) -> Result<Self, LinkError> {
        params.validate()?;
        Ok(Self {
            params,
            transport: None,
        })
    }

    /// Opens immediately over an existing channel. After a close the
    /// connection reopens the named port.
    pub fn from_channel<C: Channel + 'static>(
        params: SerialParameters,
        channel: C,
    ) -> Result<Self, LinkError> {
        params.validate()?;
        let transport = build_transport(&params, channel)?;
        Ok(Self {
            params,
            transport: Some(transport),
        })
    }

    pub fn parameters(&self) -> &SerialParameters {
        &self.params
    }
}

impl fmt::Debug for SerialConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialConnection")
            .field("params", &self.params)
            .field("open", &self.transport.is_some())
            .finish()
    }
}

fn build_transport<C: Channel + 'static>(
    params: &SerialParameters,
    channel: C,
) -> Result<Box<dyn ModbusTransport>, LinkError> {
    let mut transport: Box<dyn ModbusTransport> = match params.encoding {
        SerialEncoding::Rtu => Box::new(RtuTransport::new(channel).with_echo(params.echo)),
        SerialEncoding::Ascii => Box::new(AsciiTransport::new(channel)),
        SerialEncoding::Bin => Box::new(BinTransport::new(channel)),
    };
    transport.set_timeout(Some(params.receive_timeout))?;
    Ok(transport)
}

impl Connection for SerialConnection {
    type Transport = Box<dyn ModbusTransport>;

    fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    fn open(&mut self) -> Result<(), LinkError> {
        if self.transport.is_some() {
            return Ok(());
        }
        let params = &self.params;
        let port = serialport::new(params.port_name.as_str(), params.baud_rate)
            .data_bits(params.data_bits)
            .stop_bits(params.stop_bits)
            .parity(params.parity)
            .flow_control(params.flow_control)
            .timeout(params.receive_timeout)
            .open()?;

        let mut channel = SerialChannel::new(port);
        if let Some(control) = params.rs485 {
            channel = channel.with_rs485(control);
        }
        self.transport = Some(build_transport(params, channel)?);
        debug!(
            port = %params.port_name,
            baud_rate = params.baud_rate,
            encoding = %params.encoding,
            "opened serial connection"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        match self.transport.take() {
            Some(mut transport) => transport.close(),
            None => Ok(()),
        }
    }

    fn transport(&mut self) -> Result<&mut Self::Transport, LinkError> {
        self.transport
            .as_mut()
            .ok_or(LinkError::InvalidState("serial connection is not open"))
    }
}
