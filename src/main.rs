mod allocator;
mod cli;
mod config;
mod driver;
mod effector;
mod error;
mod lock;
mod logging;
mod model;
mod policy;
mod reconciler;
mod routing;
mod store;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    let code = cli::run(cli);
    ExitCode::from(code as u8)
}
