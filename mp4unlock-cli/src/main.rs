mod args;
mod logger;

use args::Args;
use clap::{ColorChoice, Parser};
use kdam::{term, term::Colorizer};
use logger::Logger;
use std::{
    io::{IsTerminal, stderr},
    process,
};

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    term::init(match args.color {
        ColorChoice::Always => true,
        ColorChoice::Auto => stderr().is_terminal(),
        ColorChoice::Never => false,
    });

    Logger::init(args.log_level())?;
    args.execute()
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}: {}", "error".colorize("bold red"), e);
        process::exit(1);
    }
}
