use crate::routes::router;
use crate::state::App;
use clap::Parser;
use miette::IntoDiagnostic;
use modcdn_config::Settings;
use std::{env, net::Ipv4Addr, path::PathBuf};
use tokio::net::TcpListener;

/// On-demand ES module CDN for the npm ecosystem.
#[derive(Debug, Parser)]
#[clap(name = "modcdn")]
#[clap(bin_name = "modcdn")]
#[clap(version = "0.0.1")]
#[clap(about = "On-demand ES module CDN for the npm ecosystem")]
pub struct CliArgs {
    /// Override the configured TCP port.
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Override the configured state directory.
    #[clap(short = 'C', long)]
    pub dir: Option<PathBuf>,
}

impl CliArgs {
    /// Run the server until the process is terminated.
    pub async fn run(self) -> miette::Result<()> {
        let mut settings = Settings::current(env::current_dir, home::home_dir, Default::default);
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(dir) = self.dir {
            settings.root_dir = dir;
        }
        let settings = settings.leak();

        let app = App::init(settings).await?;

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, settings.port))
            .await
            .into_diagnostic()?;
        tracing::info!(
            target: "modcdn::serve",
            port = settings.port,
            root_dir = %settings.root_dir.display(),
            "Listening",
        );
        axum::serve(listener, router(app)).await.into_diagnostic()?;
        Ok(())
    }
}
