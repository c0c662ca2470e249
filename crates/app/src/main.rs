mod cli;
mod readout;

use clap::Parser;

use crate::{cli::DepthSensingArgs, readout::ReadoutConfig};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let args = DepthSensingArgs::parse();
    let config = ReadoutConfig::try_from(args.readout)?;
    readout::run(config)
}
