mod bootstrap_helpers;
mod cli_args;
mod commands;
mod host_files;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let output = commands::execute(&cli)?;
    println!("{}", output.render(cli.json)?);
    Ok(())
}
