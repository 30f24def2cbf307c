use clap::Parser;
use wiremod_tools::common::{build_master, init_tracing, parse_bool, ConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "writecoil", about = "Write a single coil (FC05)")]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,
    #[arg(long, default_value_t = 1)]
    unit_id: u8,
    #[arg(long)]
    address: u16,
    #[arg(long, value_parser = parse_bool)]
    value: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn)?;

    master.write_single_coil(args.unit_id, args.address, args.value)?;

    println!("wrote coil {} = {}", args.address, args.value);
    Ok(())
}
