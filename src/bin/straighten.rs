//! CLI binary: write an upright, deskewed copy of a scanned page.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `OrientConfig`/`SkewParams`, writes the corrected image and prints
//! `Orientation: <degrees>` (`Orientation: not measured` in deskew mode).

use anyhow::{Context, Result};
use clap::Parser;
use pageorient::{
    deskew_file, CorrectionMode, ModelWeights, OrientConfig, Orienter, OutputOptions,
    SkewCorrector, SkewParams,
};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Deskew, classify and rotate upright (default)
  straighten --model models/orientation.onnx scan.jpg fixed.jpg

  # Only remove skew; no model needed
  straighten --mode deskew scan.png level.png

  # Only fix quarter turns
  straighten --mode upright scan.png upright.png

  # Search ±5° in 0.05° steps, never consider 90°
  straighten --min-angle -5 --max-angle 5 --step 0.05 --no-90 in.png out.png

MODES:
  full      skew removal, then orientation vote on the level page, then quarter turn
  deskew    skew removal only; orientation is reported as not measured
  upright   orientation vote, then quarter turn

ENVIRONMENT VARIABLES:
  PAGEORIENT_MODEL   Path to the ONNX orientation model
  RUST_LOG           Override log filtering (e.g. pageorient=debug)
"#;

/// Straighten a scanned document page and turn it upright.
#[derive(Parser, Debug)]
#[command(
    name = "straighten",
    version,
    about = "Straighten a scanned document page and turn it upright",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Page image (PNG or JPEG).
    input: PathBuf,

    /// Corrected image; format follows the extension.
    output: PathBuf,

    /// ONNX orientation model (not needed with `--mode deskew`).
    #[arg(long, env = "PAGEORIENT_MODEL")]
    model: Option<PathBuf>,

    /// Which corrections to apply.
    #[arg(long, env = "PAGEORIENT_MODE", value_enum, default_value = "full")]
    mode: ModeArg,

    /// Lower end of the skew search window, degrees.
    #[arg(long, env = "PAGEORIENT_MIN_ANGLE", default_value_t = -2.5, allow_negative_numbers = true)]
    min_angle: f32,

    /// Upper end of the skew search window, degrees.
    #[arg(long, env = "PAGEORIENT_MAX_ANGLE", default_value_t = 2.5, allow_negative_numbers = true)]
    max_angle: f32,

    /// Skew search step, degrees.
    #[arg(long, env = "PAGEORIENT_STEP", default_value_t = 0.1)]
    step: f32,

    /// Do not search the window around 90°.
    #[arg(long)]
    no_90: bool,

    /// JPEG quality (1–100).
    #[arg(long, env = "PAGEORIENT_QUALITY", default_value_t = 95,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Parallel model sessions.
    #[arg(short, long, env = "PAGEORIENT_WORKERS", default_value_t = 1)]
    workers: usize,

    /// Print a JSON report instead of the plain line.
    #[arg(long, env = "PAGEORIENT_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PAGEORIENT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result line.
    #[arg(short, long, env = "PAGEORIENT_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Full,
    Deskew,
    Upright,
}

impl From<ModeArg> for CorrectionMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Full => CorrectionMode::Full,
            ModeArg::Deskew => CorrectionMode::Deskew,
            ModeArg::Upright => CorrectionMode::Upright,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.json {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let skew = SkewParams {
        min_degrees: cli.min_angle,
        max_degrees: cli.max_angle,
        step_degrees: cli.step,
        include_90: !cli.no_90,
        ..SkewParams::default()
    };
    let config = OrientConfig::builder()
        .workers(cli.workers)
        .skew(skew)
        .build()
        .context("Invalid configuration")?;
    let options = OutputOptions {
        jpeg_quality: cli.quality,
        ..OutputOptions::default()
    };
    let mode = CorrectionMode::from(cli.mode);

    // ── Run ──────────────────────────────────────────────────────────────
    let report = match mode {
        CorrectionMode::Deskew => {
            deskew_file(&SkewCorrector::new(config.skew), &cli.input, &cli.output, &options)
                .context("Skew removal failed")?
        }
        _ => {
            let model = cli
                .model
                .as_ref()
                .context("--model (or PAGEORIENT_MODEL) is required unless --mode deskew")?;
            let weights = ModelWeights::from_file(model)
                .with_context(|| format!("Failed to load model {}", model.display()))?;
            let mut orienter =
                Orienter::new(&weights, config).context("Failed to start model sessions")?;
            let report = orienter
                .correct_file(&cli.input, &cli.output, mode, &options)
                .context("Correction failed")?;
            orienter.release();
            report
        }
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
        return Ok(());
    }

    println!("{}", report.orientation_line());
    if !cli.quiet {
        let skew = report
            .skew_degrees
            .map(|a| format!("skew {a:+.2}°"))
            .unwrap_or_else(|| "skew not measured".to_string());
        eprintln!(
            "{}  {}  {}ms  →  {}",
            green("✔"),
            dim(&skew),
            report.duration_ms,
            bold(&cli.output.display().to_string()),
        );
    }
    Ok(())
}
