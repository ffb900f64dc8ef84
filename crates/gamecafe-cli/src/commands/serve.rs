use std::sync::Arc;

use clap::Args;
use gamecafe_core::quota::server;
use gamecafe_core::Config;
use tokio::net::TcpListener;
use tracing::info;

use super::{ledger_path, local_service, CliResult};

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on (defaults to `server.bind`)
    #[arg(long)]
    bind: Option<String>,
}

pub async fn run(args: ServeArgs, config: &Config) -> CliResult {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let service = Arc::new(local_service(config)?);
    info!(ledger = %ledger_path(config)?.display(), "ledger opened");

    let listener = TcpListener::bind(&bind).await?;
    println!("listening on {}", listener.local_addr()?);

    server::serve(listener, service, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
        }
    })
    .await?;
    Ok(())
}
