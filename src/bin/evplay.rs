//! evplay - redirect input events from stdin into a virtual device.

use clap::Parser;
use evpipe::describe::DeviceDescription;
use evpipe::error::{Error, Result};
use evpipe::replay::VirtualDevice;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Replay input events from stdin into a synthesized virtual device.
///
/// The virtual device is assembled by merging device descriptions: existing
/// devices referenced with -d first, then YAML files given with -c, later
/// sources overriding earlier ones. So a captured hardware description can
/// be tweaked by a small file on top.
#[derive(Debug, Parser)]
#[command(name = "evplay", version)]
struct Args {
    /// Print the description of the resulting virtual device and exit.
    #[arg(short, long)]
    print: bool,

    /// Merge the description of an existing device.
    #[arg(short, long, value_name = "DEVNODE")]
    device: Vec<PathBuf>,

    /// Merge a YAML device description file.
    #[arg(short, long, value_name = "FILE")]
    config: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("evplay: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut descriptions = Vec::new();
    for devnode in &args.device {
        let device = evdev::Device::open(devnode)?;
        descriptions.push(evpipe::describe(&device)?);
    }
    for path in &args.config {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        descriptions.push(DeviceDescription::from_yaml(&text)?);
    }
    if descriptions.is_empty() {
        return Err(Error::Config(
            "at least one -d device or -c description is required".into(),
        ));
    }

    let merged = evpipe::merge(descriptions);
    let mut device = VirtualDevice::create(&merged)?;

    if args.print {
        // Describe what the kernel actually created, not what was asked
        // for; this is what consumers of the device will see.
        let devnode = device.devnode()?;
        let created = evdev::Device::open(&devnode)?;
        print!("{}", evpipe::describe(&created)?.to_yaml()?);
        return Ok(());
    }

    let stdin = io::stdin();
    evpipe::replay(&mut device, &mut stdin.lock())
}
