use tracing_subscriber::{EnvFilter, fmt};
use tracing::info;

const USAGE: &str = "tileserver\n\nUSAGE:\n  tileserver [--port N] [--dir PATH]\n\nOPTIONS:\n  --port N     Listen port (PORT env takes precedence, default 8080)\n  --dir PATH   Asset root directory (DATA_DIR env takes precedence, default data)\n  -h, --help   Print this help\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let cfg = tileserver::config::Config::from_env_and_args()?;

    // Startup banner at info level so something always prints at default
    // verbosity; reports the resolved configuration, not the raw inputs.
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "tileserver",
        "tileserver starting: RUST_LOG='{}', port={}, root='{}'",
        rust_log, cfg.port, cfg.root.display()
    );

    tileserver::server::run_with_config(cfg).await
}
