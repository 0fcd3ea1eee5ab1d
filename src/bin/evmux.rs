//! evmux - mux streams of input events over named queues.

use clap::Parser;
use evpipe::error::{Error, Result};
use evpipe::mux::DEFAULT_CAPACITY;
use std::io;
use std::process::ExitCode;

/// Mux streams of input events over named persistent queues.
///
/// Runs in exactly one role per invocation: create queues (-c), read one
/// queue onto stdout (-i), fan stdin out to queues (-o), or steer stdin
/// between output groups driven by selector-queue activity (-o plus -s).
#[derive(Debug, Parser)]
#[command(name = "evmux", version)]
struct Args {
    /// Create a queue, removing any prior queue of the same name.
    #[arg(short, long, value_name = "NAME[:CAPACITY]")]
    create: Vec<String>,

    /// Read events from this queue onto stdout.
    #[arg(short, long, value_name = "NAME")]
    input: Option<String>,

    /// Write events from stdin to this queue. With -s, these queues form
    /// the default group.
    #[arg(short, long, value_name = "NAME")]
    output: Vec<String>,

    /// Add a switched output group: activity on SELECTOR steers events to
    /// its queues.
    #[arg(short, long, value_name = "SELECTOR:NAME[,NAME]...")]
    switch: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("evmux: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let roles = [
        !args.create.is_empty(),
        args.input.is_some(),
        !args.output.is_empty() || !args.switch.is_empty(),
    ];
    if roles.iter().filter(|&&selected| selected).count() != 1 {
        return Err(Error::Config(
            "exactly one role is required: -c, -i, or -o/-s".into(),
        ));
    }

    if !args.create.is_empty() {
        let queues = args
            .create
            .iter()
            .map(|spec| parse_create(spec))
            .collect::<Result<Vec<_>>>()?;
        return evpipe::run_create(&queues);
    }

    if let Some(name) = &args.input {
        let stdout = io::stdout();
        return evpipe::run_input(name, &mut stdout.lock());
    }

    let stdin = io::stdin();
    let mut source = stdin.lock();
    if args.switch.is_empty() {
        evpipe::run_output(&args.output, &mut source)
    } else {
        let switched = args
            .switch
            .iter()
            .map(|spec| parse_switch(spec))
            .collect::<Result<Vec<_>>>()?;
        evpipe::run_switch(&args.output, &switched, &mut source)
    }
}

fn parse_create(spec: &str) -> Result<(String, usize)> {
    match spec.split_once(':') {
        None => Ok((spec.to_owned(), DEFAULT_CAPACITY)),
        Some((name, capacity)) => {
            let capacity = capacity
                .parse()
                .map_err(|_| Error::Config(format!("bad capacity in {spec:?}")))?;
            Ok((name.to_owned(), capacity))
        }
    }
}

fn parse_switch(spec: &str) -> Result<(String, Vec<String>)> {
    let split = spec.split_once(':');
    let Some((selector, outputs)) = split else {
        return Err(Error::Config(format!(
            "switch group {spec:?} must be SELECTOR:NAME[,NAME]..."
        )));
    };
    let outputs: Vec<String> = outputs
        .split(',')
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect();
    if selector.is_empty() || outputs.is_empty() {
        return Err(Error::Config(format!(
            "switch group {spec:?} needs a selector and at least one output"
        )));
    }
    Ok((selector.to_owned(), outputs))
}
