use std::time::Duration;

use clap::{Args, ValueEnum};
use serialport::{Parity, StopBits};
use wiremod_client::{ClientError, ModbusMaster};
use wiremod_datalink::{
    LinkError, ModbusTransaction, SerialEncoding, SerialParameters, TcpConnectionConfig,
    TransactionConfig, UdpConnectionConfig,
};

pub type DynMaster = ModbusMaster<Box<dyn ModbusTransaction>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Tcp,
    Udp,
    Rtu,
    Ascii,
    Bin,
}

impl Mode {
    pub fn serial_encoding(self) -> Option<SerialEncoding> {
        match self {
            Self::Tcp | Self::Udp => None,
            Self::Rtu => Some(SerialEncoding::Rtu),
            Self::Ascii => Some(SerialEncoding::Ascii),
            Self::Bin => Some(SerialEncoding::Bin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ParityArg {
    None,
    Odd,
    Even,
}

impl From<ParityArg> for Parity {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Parity::None,
            ParityArg::Odd => Parity::Odd,
            ParityArg::Even => Parity::Even,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    #[arg(long, value_enum, default_value_t = Mode::Tcp)]
    pub mode: Mode,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 502)]
    pub port: u16,
    /// Serial device, e.g. /dev/ttyUSB0 or COM3.
    #[arg(long)]
    pub device: Option<String>,
    #[arg(long, default_value_t = 19200)]
    pub baud: u32,
    #[arg(long, value_enum, default_value_t = ParityArg::Even)]
    pub parity: ParityArg,
    /// The serial line echoes transmitted bytes (RTU only).
    #[arg(long)]
    pub echo: bool,
    /// Response timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub timeout: u64,
    #[arg(long, default_value_t = 5)]
    pub retries: usize,
    /// Pause before every serial request, in milliseconds.
    #[arg(long, default_value_t = 0)]
    pub delay: u64,
    /// Open a new TCP connection for every request.
    #[arg(long)]
    pub reconnect: bool,
}

impl ConnectionArgs {
    fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn transaction_config(&self) -> TransactionConfig {
        TransactionConfig::default()
            .with_retries(self.retries)
            .with_delay(Duration::from_millis(self.delay))
    }

    pub fn tcp_config(&self) -> TcpConnectionConfig {
        TcpConnectionConfig::new(self.host.clone())
            .with_port(self.port)
            .with_timeout(self.timeout())
            .with_reconnecting(self.reconnect)
    }

    pub fn udp_config(&self) -> UdpConnectionConfig {
        UdpConnectionConfig::new(self.host.clone())
            .with_port(self.port)
            .with_timeout(self.timeout())
    }

    /// Serial line settings; `Config` error for network modes or a missing
    /// device.
    pub fn serial_parameters(&self) -> Result<SerialParameters, LinkError> {
        let encoding = self
            .mode
            .serial_encoding()
            .ok_or_else(|| LinkError::Config(format!("{:?} is not a serial mode", self.mode)))?;
        let device = self
            .device
            .as_deref()
            .ok_or_else(|| LinkError::Config("--device is required for serial modes".into()))?;
        // No parity means two stop bits.
        let stop_bits = match self.parity {
            ParityArg::None => StopBits::Two,
            ParityArg::Odd | ParityArg::Even => StopBits::One,
        };
        let params = SerialParameters::new(device, self.baud)
            .with_parity(self.parity.into())
            .with_stop_bits(stop_bits)
            .with_encoding(encoding)
            .with_echo(self.echo)
            .with_receive_timeout(self.timeout());
        params.validate()?;
        Ok(params)
    }
}

pub fn build_master(args: &ConnectionArgs) -> Result<DynMaster, ClientError> {
    let transaction = args.transaction_config();
    match args.mode {
        Mode::Tcp => ModbusMaster::tcp(args.tcp_config(), transaction)?.boxed(),
        Mode::Udp => ModbusMaster::udp(args.udp_config(), transaction)?.boxed(),
        Mode::Rtu | Mode::Ascii | Mode::Bin => {
            ModbusMaster::serial(args.serial_parameters()?, transaction)?.boxed()
        }
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

pub fn parse_bool(input: &str) -> Result<bool, String> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        _ => Err(format!("invalid bool value: {input}")),
    }
}
