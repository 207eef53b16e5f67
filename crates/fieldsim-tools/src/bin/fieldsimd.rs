use clap::Parser;
use fieldsim_server::{spawn, StatePaths};
use fieldsim_tools::common::{init_tracing, parse_set_spec, render_event};
use std::path::PathBuf;
use tracing::info;

/// Multi-device Modbus RTU slave simulator daemon. Serves the persisted
/// device roster on a serial port and streams bus traffic and state
/// changes to the terminal.
#[derive(Debug, Parser)]
#[command(name = "fieldsimd", about = "Modbus RTU field-device simulator")]
struct Args {
    /// Serial device to serve, e.g. /dev/ttyUSB0 or COM18.
    #[arg(long)]
    port: String,
    #[arg(long, default_value_t = 9600)]
    baud: u32,
    /// Directory holding roster.json and registers.json.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
    /// Run from the built-in default roster without touching disk.
    #[arg(long)]
    no_persist: bool,
    /// Preseed a register before serving, repeatable: UNIT:ADDR=VALUE
    /// (e.g. --set 1:0x2000=1).
    #[arg(long, value_name = "UNIT:ADDR=VALUE", value_parser = parse_set_spec)]
    set: Vec<(u8, u16, u16)>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let args = Args::parse();

    let paths = (!args.no_persist).then(|| StatePaths::in_dir(&args.data_dir));
    let handle = spawn(paths);
    let mut events = handle.subscribe();

    for (unit_id, address, value) in &args.set {
        handle.set_register(*unit_id, *address, *value).await?;
    }

    handle.start(&args.port, args.baud).await?;
    info!(port = %args.port, baud = args.baud, "simulator running, ctrl-c to stop");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => println!("{}", render_event(&event)),
                    // Dropped events only mean the terminal fell behind.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                handle.stop().await?;
                break;
            }
        }
    }
    Ok(())
}
