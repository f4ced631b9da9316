use causeway_service::CausewayServer;
use clap::Parser;

/// External-data bridge server for parallel query engines.
#[derive(Parser, Debug)]
#[command(name = "causeway", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config/causeway.yaml")]
    config: String,

    /// Listen address override, e.g. 0.0.0.0:5888.
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server = CausewayServer::new().with_config(args.config);
    if let Some(listen) = args.listen {
        server = server.with_listen_addr(listen);
    }
    server.run().await
}
