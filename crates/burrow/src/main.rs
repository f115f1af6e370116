//! Burrow CLI - file-based coordination for cooperating agents
//!
//! Binary name: `burrow`

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

use std::process;

mod cli;
mod output;

use cli::{build_cli, handlers::dispatch};
use output::format_error;

/// Exit code after Ctrl-C, following the shell convention of 128 + SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();

    // Lock waits block; let Ctrl-C end the process instead of waiting them out
    let cli_result = tokio::select! {
        result = dispatch(matches) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, abandoning command");
            #[allow(clippy::exit)]
            process::exit(INTERRUPTED_EXIT_CODE);
        }
    };

    match cli_result {
        Ok(code) => {
            #[allow(clippy::exit)]
            process::exit(code);
        }
        Err(err) => {
            let code = err
                .downcast_ref::<burrow_core::Error>()
                .map_or(1, burrow_core::Error::exit_code);

            #[allow(clippy::print_stderr)]
            {
                match err.downcast_ref::<burrow_core::Error>() {
                    Some(core) => eprintln!("Error [{}]: {}", core.code(), format_error(&err)),
                    None => eprintln!("Error: {}", format_error(&err)),
                }
            }

            #[allow(clippy::exit)]
            process::exit(code);
        }
    }
}
