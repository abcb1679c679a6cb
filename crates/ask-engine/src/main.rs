// crates/ask-engine/src/main.rs

#[cfg(feature = "cli")]
use ask_engine::{config::Config, run_server};
#[cfg(feature = "cli")]
use clap::Parser;

/// Command-line overrides on top of the environment configuration
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "ask-engine", version, about = "Answer natural-language questions over a SQLite database")]
struct Args {
    /// Query record database path (overrides ASK_DB_PATH)
    #[arg(long)]
    db_path: Option<String>,

    /// Data database the generated queries run against (overrides ASK_DATA_DB_PATH)
    #[arg(long)]
    data_db_path: Option<String>,

    /// Listen port (overrides API_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut cfg = Config::from_env()?;

    if let Some(path) = args.db_path {
        cfg.db_path = path;
    }
    if let Some(path) = args.data_db_path {
        cfg.data_db_path = path;
    }
    if let Some(port) = args.port {
        cfg.api_port = port;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
