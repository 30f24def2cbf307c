use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use wiremod_datalink::{
    InMemoryModbusService, ListenerConfig, ModbusSerialListener, ModbusTcpListener,
    ModbusUdpListener, SerialConnection,
};
use wiremod_tools::common::{init_tracing, ConnectionArgs, Mode};

#[derive(Debug, Parser)]
#[command(
    name = "serve",
    about = "Serve an in-memory process image as a Modbus slave"
)]
struct Args {
    /// Listen address (`--host`/`--port`) or serial line to serve on.
    #[command(flatten)]
    conn: ConnectionArgs,
    /// Serial modes answer only this unit id (and broadcasts).
    #[arg(long)]
    unit_id: Option<u8>,
    #[arg(long, default_value_t = 1024)]
    coils: usize,
    #[arg(long, default_value_t = 1024)]
    discrete_inputs: usize,
    #[arg(long, default_value_t = 1024)]
    holding_registers: usize,
    #[arg(long, default_value_t = 1024)]
    input_registers: usize,
    #[arg(long, default_value_t = 16)]
    max_connections: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let service = Arc::new(InMemoryModbusService::new(
        args.coils,
        args.discrete_inputs,
        args.holding_registers,
        args.input_registers,
    ));
    let config = ListenerConfig::default()
        .with_max_connections(args.max_connections)
        .with_timeout(Duration::from_millis(args.conn.timeout));
    let address = (args.conn.host.as_str(), args.conn.port);

    let handle = match args.conn.mode {
        Mode::Tcp => ModbusTcpListener::bind_with_config(address, service, config)?.spawn()?,
        Mode::Udp => ModbusUdpListener::bind(address, service)?
            .with_config(config)
            .spawn()?,
        Mode::Rtu | Mode::Ascii | Mode::Bin => {
            let connection = SerialConnection::new(args.conn.serial_parameters()?)?;
            let listener = ModbusSerialListener::new(connection, service);
            match args.unit_id {
                Some(unit_id) => listener.with_unit_id(unit_id).spawn()?,
                None => listener.spawn()?,
            }
        }
    };

    match handle.local_addr() {
        Some(addr) => info!(mode = ?args.conn.mode, %addr, "serving modbus"),
        None => info!(mode = ?args.conn.mode, "serving modbus"),
    }
    while !handle.is_finished() {
        thread::sleep(Duration::from_millis(500));
    }
    handle.stop();
    Ok(())
}
