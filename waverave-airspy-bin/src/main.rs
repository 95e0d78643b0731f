mod config;
mod info;
mod os_signal;
mod rx;

use clap::{ArgAction, Parser, Subcommand};
use color_eyre::eyre::Context;
use waverave_airspy::Airspy;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Open one specific receiver, chosen by its 64-bit serial number in hex
    #[arg(short = 'd', long)]
    serial: Option<String>,
    /// Log more detail to stderr. Repeat for even more.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Info(info::Cmd),
    Rx(rx::Cmd),
}

fn parse_serial(serial: &str) -> color_eyre::Result<u64> {
    let hex = serial
        .strip_prefix("0x")
        .or_else(|| serial.strip_prefix("0X"))
        .unwrap_or(serial);
    u64::from_str_radix(hex, 16).wrap_err_with(|| format!("Invalid serial number {serial:?}"))
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();

    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let _ = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .try_init();

    let serial = args.serial.as_deref().map(parse_serial).transpose()?;

    match args.command {
        Commands::Info(c) => c.cmd(serial),
        Commands::Rx(c) => c.cmd(open(serial)?).await,
    }
}

fn open(serial: Option<u64>) -> color_eyre::Result<Airspy> {
    match serial {
        Some(serial) => waverave_airspy::open_by_serial(serial)
            .wrap_err_with(|| format!("Couldn't open receiver with serial {serial:016X}")),
        None => waverave_airspy::open_first().wrap_err("Failed to open a receiver"),
    }
}
