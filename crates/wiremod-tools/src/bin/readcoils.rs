use clap::Parser;
use wiremod_tools::common::{build_master, init_tracing, ConnectionArgs};

#[derive(Debug, Parser)]
#[command(name = "readcoils", about = "Read coils (FC01)")]
struct Args {
    #[command(flatten)]
    conn: ConnectionArgs,
    #[arg(long, default_value_t = 1)]
    unit_id: u8,
    #[arg(long)]
    start: u16,
    #[arg(long)]
    quantity: u16,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();
    let master = build_master(&args.conn)?;

    let values = master.read_coils(args.unit_id, args.start, args.quantity)?;

    for (offset, value) in values.iter().enumerate() {
        let address = args.start.wrapping_add(offset as u16);
        println!("coil={address} value={value}");
    }
    Ok(())
}
