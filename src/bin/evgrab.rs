//! evgrab - redirect device input events to stdout.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Redirect device input events to stdout.
///
/// Events stream out as raw kernel records, unbuffered, until the device
/// goes away. With --grab the device is captured exclusively, so nothing
/// else on the system sees its events.
#[derive(Debug, Parser)]
#[command(name = "evgrab", version)]
struct Args {
    /// Grab the device exclusively.
    #[arg(short, long)]
    grab: bool,

    /// Device node to capture events from.
    #[arg(value_name = "DEVNODE")]
    devnode: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let stdout = io::stdout();
    let mut sink = stdout.lock();
    match evpipe::capture(&args.devnode, args.grab, &mut sink) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("evgrab: {e}");
            ExitCode::FAILURE
        }
    }
}
