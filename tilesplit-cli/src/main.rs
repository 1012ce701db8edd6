//! Entry point for the tile splitter.
#![forbid(unsafe_code)]

use clap::Parser;

fn main() {
    let cli = tilesplit_cli::Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(err) = tilesplit_cli::run(&cli) {
        eprintln!("tilesplit: {err}");
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }
        std::process::exit(1);
    }
}
