//! Stdio bridge that lets an AI agent drive the documentation API.

use clap::Parser;
use tokio::io::{stdin, stdout, BufReader};
use tracing_subscriber::EnvFilter;

use collabdoc::mcp::{HttpApiClient, McpServer};

#[derive(Debug, Parser)]
#[command(name = "collabdoc-mcp", version, about)]
struct Args {
    /// Base URL of the documentation API.
    #[arg(long, env = "COLLAB_BASE_URL", default_value = "https://localhost")]
    base_url: String,

    /// Accept self-signed certificates (local development).
    #[arg(long, env = "COLLAB_INSECURE")]
    insecure: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing();

    tracing::info!(
        component = "mcp",
        base_url = %args.base_url,
        insecure = args.insecure,
        "starting stdio server"
    );
    let client = HttpApiClient::new(&args.base_url, args.insecure)?;
    let mut server = McpServer::new(client);
    server.run(BufReader::new(stdin()), stdout()).await?;
    Ok(())
}

// stdout carries the protocol, so logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
