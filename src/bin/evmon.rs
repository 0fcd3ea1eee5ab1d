//! evmon - monitor input devices and launch jobs for matches.

use clap::Parser;
use evpipe::error::{Error, Result};
use evpipe::supervisor::Supervisor;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Monitor input devices and launch jobs for matching devices.
///
/// Rules come from YAML configuration files: each entry pairs a JOB command
/// template with an optional DEVICE predicate. Matched jobs run with
/// DEVNODE as their entire environment and are torn down when their device
/// disappears or the supervisor is signalled.
#[derive(Debug, Parser)]
#[command(name = "evmon", version)]
struct Args {
    /// YAML configuration file.
    #[arg(short, long, value_name = "FILE", required = true)]
    config: Vec<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("evmon: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut rules = Vec::new();
    for path in &args.config {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        rules.extend(evpipe::parse_config(&text)?);
    }
    if rules.is_empty() {
        return Err(Error::Config("no rules configured".into()));
    }
    log::info!("supervising with {} rules", rules.len());

    let mut supervisor = Supervisor::new(rules);
    supervisor.run()
}
