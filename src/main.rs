/*!
 * blockdb CLI - Command Line Interface
 */

use std::process;

use clap::Parser;

use blockdb::commands::{self, Command};
use blockdb::{error, logging, VERSION};

#[derive(Parser)]
#[command(name = "blockdb")]
#[command(version = VERSION)]
#[command(about = "Content-addressed block-hash database", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Err(err) = commands::run(cli.command) {
        eprintln!("Error: {err:#}");
        process::exit(error::exit_code(&err));
    }
}
