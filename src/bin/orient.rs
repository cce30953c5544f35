//! CLI binary: report the orientation of a scanned page.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `OrientConfig` and prints `Orientation: <degrees>`.

use anyhow::{Context, Result};
use clap::Parser;
use pageorient::{FailurePolicy, ModelWeights, OrientConfig, Orienter, TileSelection};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Detect orientation with the model from the environment
  export PAGEORIENT_MODEL=models/orientation.onnx
  orient scan.png

  # Remove skew before voting (better on tilted phone captures)
  orient --straighten-first scan.jpg

  # Four parallel model sessions, JSON report
  orient --workers 4 --json scan.png > report.json

OUTPUT:
  Orientation: 0 | 90 | 180 | 270
  The number is how far the content is turned clockwise from upright.

ENVIRONMENT VARIABLES:
  PAGEORIENT_MODEL   Path to the ONNX orientation model
  RUST_LOG           Override log filtering (e.g. pageorient=debug)
"#;

/// Detect the orientation of a scanned document page.
#[derive(Parser, Debug)]
#[command(
    name = "orient",
    version,
    about = "Detect the orientation of a scanned document page",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page image (PNG or JPEG).
    input: PathBuf,

    /// ONNX orientation model.
    #[arg(long, env = "PAGEORIENT_MODEL")]
    model: PathBuf,

    /// Remove small-angle skew before classifying.
    #[arg(long, env = "PAGEORIENT_STRAIGHTEN_FIRST")]
    straighten_first: bool,

    /// Maximum number of tiles to classify.
    #[arg(long, env = "PAGEORIENT_TILES", default_value_t = 200)]
    tiles: usize,

    /// Parallel model sessions.
    #[arg(short, long, env = "PAGEORIENT_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Minimum margin between the top two class scores for a tile to vote.
    #[arg(long, env = "PAGEORIENT_THRESHOLD", default_value_t = 0.5)]
    threshold: f32,

    /// Seed for the shuffled tile draw.
    #[arg(long, env = "PAGEORIENT_SEED")]
    seed: Option<u64>,

    /// Take the highest-perplexity tiles instead of a shuffled draw.
    #[arg(long, conflicts_with = "seed")]
    top_k: bool,

    /// Skip tiles whose inference fails instead of aborting.
    #[arg(long)]
    skip_failed_tiles: bool,

    /// Print a JSON report instead of the plain line.
    #[arg(long, env = "PAGEORIENT_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEORIENT_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "PAGEORIENT_QUIET")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // stdout carries the answer; logs go to stderr and stay quiet unless
    // asked for.
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build pipeline ───────────────────────────────────────────────────
    let config = build_config(&cli)?;
    let weights = ModelWeights::from_file(&cli.model)
        .with_context(|| format!("Failed to load model {}", cli.model.display()))?;
    let mut orienter = Orienter::new(&weights, config).context("Failed to start model sessions")?;

    // ── Run ──────────────────────────────────────────────────────────────
    let report = orienter
        .orient_file(&cli.input, cli.straighten_first)
        .context("Orientation detection failed")?;
    orienter.release();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else {
        println!("{}", report.orientation_line());
        if report.is_fallback() && !cli.quiet {
            eprintln!("note: no tile was confident enough to vote; assumed upright");
        }
    }
    Ok(())
}

/// Map CLI args to `OrientConfig`.
fn build_config(cli: &Cli) -> Result<OrientConfig> {
    let selection = if cli.top_k {
        TileSelection::TopK
    } else {
        match (TileSelection::default(), cli.seed) {
            (TileSelection::ShuffledTop { pool_factor, .. }, Some(seed)) => {
                TileSelection::ShuffledTop { pool_factor, seed }
            }
            (default, _) => default,
        }
    };
    let policy = if cli.skip_failed_tiles {
        FailurePolicy::SkipTile
    } else {
        FailurePolicy::Abort
    };

    OrientConfig::builder()
        .tile_count(cli.tiles)
        .workers(cli.workers)
        .confidence_threshold(cli.threshold)
        .selection(selection)
        .failure_policy(policy)
        .build()
        .context("Invalid configuration")
}
