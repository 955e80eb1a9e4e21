use anyhow::Context;
use backend::{AssociationTable, Kernel, PositionRequest};
use clap::Parser;
use shared::BridgeConfig;
use std::path::{Path, PathBuf};
use tokio::io::{self, BufReader};

#[derive(Parser, Debug)]
#[command(name = "locus-kernel")]
#[command(about = "Serve association views to a locus plot over stdin/stdout")]
struct Cli {
    /// JSON array of association rows
    #[arg(long)]
    associations: PathBuf,

    /// TOML config with [widget], [retry] and [kernel] sections
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    chrom: Option<String>,

    #[arg(long, allow_negative_numbers = true)]
    start: Option<i64>,

    #[arg(long, allow_negative_numbers = true)]
    end: Option<i64>,

    /// Centre of the opening window; takes precedence over start/end
    #[arg(long)]
    position: Option<i64>,

    /// Width of windows centred on a position or top locus
    #[arg(long)]
    flank: Option<i64>,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<BridgeConfig> {
    let Some(path) = path else {
        log::debug!("no config file given, using defaults");
        return Ok(BridgeConfig::default());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = BridgeConfig::from_toml_str(&content)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    log::info!("loaded config from {}", path.display());
    Ok(config)
}

fn load_associations(path: &Path) -> anyhow::Result<AssociationTable> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read associations {}", path.display()))?;
    AssociationTable::from_json_str(&content)
        .with_context(|| format!("invalid associations in {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let table = load_associations(&cli.associations)?;
    if table.is_empty() {
        log::warn!("{} holds no associations", cli.associations.display());
    }

    let request = PositionRequest {
        chrom: cli.chrom,
        start: cli.start,
        end: cli.end,
        position: cli.position,
        flank: cli.flank.unwrap_or(config.kernel.flank),
    };
    let mut kernel = Kernel::new(table, &request, config.widget.build.clone())
        .context("failed to resolve initial position")?;

    kernel
        .run(BufReader::new(io::stdin()), io::stdout())
        .await
        .context("kernel loop failed")?;
    Ok(())
}
