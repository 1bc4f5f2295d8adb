use baton_server::{AppState, ServerConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("baton_server=debug,tower_http=debug")),
        )
        .init();

    let config = ServerConfig::parse();
    let state = AppState::new(config.issuer());
    let listener = tokio::net::TcpListener::bind(config.listen).await?;

    println!("Press Ctrl+C to exit");

    baton_server::serve(listener, state, async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "unable to listen for shutdown signal");
        }
    })
    .await?;

    Ok(())
}
