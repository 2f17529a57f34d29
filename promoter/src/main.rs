//! Promote the images of one build.
//!
//! Reads a promotion request as JSON (from a file or stdin), runs it, and
//! prints the result as JSON on stdout. Logs go to stderr.

use camino::Utf8PathBuf;
use clap::Parser;
use eyre::WrapErr as _;
use tokio::io::AsyncReadExt as _;
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use promoter::{PromoterConfig, PromotionRequest};

#[derive(Parser, Debug)]
#[command(name = "promote", about = "Promote container images between registries")]
struct Args {
    /// Configuration file.
    #[arg(long, short)]
    config: Utf8PathBuf,

    /// Promotion request JSON, or `-` for stdin.
    #[arg(long, short, default_value = "-")]
    request: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default());

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn read_request(source: &str) -> eyre::Result<PromotionRequest> {
    let mut document = String::new();
    if source == "-" {
        tokio::io::stdin()
            .read_to_string(&mut document)
            .await
            .wrap_err("reading request from stdin")?;
    } else {
        document = tokio::fs::read_to_string(source)
            .await
            .wrap_err_with(|| format!("reading request {source}"))?;
    }

    serde_json::from_str(&document).wrap_err("decoding promotion request")
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = PromoterConfig::load(&args.config)
        .await
        .wrap_err_with(|| format!("loading {}", args.config))?;
    let coordinator = config.coordinator()?;

    let request = read_request(&args.request).await?;
    tracing::info!(
        env = %request.env,
        build = %request.build_id,
        account = request.target_account.as_deref().unwrap_or("same-account"),
        "starting promotion"
    );

    let result = coordinator.promote(&request).await?;
    println!("{}", serde_json::to_string(&result)?);

    Ok(())
}
