use std::process::ExitCode;

use clap::Parser;

use deckforge_server::cli::{self, Cli};
use deckforge_server::telemetry::init_tracing;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let env_file = cli::load_env_file(cli.env_file.as_deref());
    init_tracing(cli.json);

    log::info!("Starting deckforge v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = env_file {
        log::info!("Loaded environment from {}", path.display());
    }

    match cli::dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
