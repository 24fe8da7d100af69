mod cli_args;
mod error;
mod local_tracing;
mod orchestrator;
mod routes;
mod state;

pub use cli_args::CliArgs;
pub use error::ServeError;
pub use orchestrator::Served;
pub use routes::router;
pub use state::{App, BuildState, InitAppError};

use clap::Parser;

pub async fn run_cli() -> miette::Result<()> {
    local_tracing::init();
    miette::set_panic_hook();
    CliArgs::parse().run().await
}
