mod cli;
mod pipeline;
mod web;

use anyhow::Result;
use cli::Args;
use tracing_subscriber::EnvFilter;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse_args();
    args.validate()?;

    run_server(args).await?;

    Ok(())
}
