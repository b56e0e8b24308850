mod bootstrap;
mod cli;
mod db;

use clap::Parser;

fn main() {
    nirvana_core::logging::init();
    let cli = cli::Cli::parse();
    std::process::exit(cli::run(cli));
}
