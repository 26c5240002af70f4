//! word-puzzle-solver - find words in a word-search puzzle
//!
//! Reads the grid from an image or a text file and prints the solve report
//! as JSON on stdout. Logs go to stderr.

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use word_puzzle_solver::config::{self, RecognizerBackend};
use word_puzzle_solver::{PuzzleInput, Solver};

/// Word-search puzzle solver
#[derive(Parser, Debug)]
#[command(name = "word-puzzle-solver")]
#[command(about = "Find words in a word-search puzzle image or text grid")]
#[command(group(ArgGroup::new("puzzle").required(true).args(["image", "grid"])))]
struct Args {
    /// Puzzle image (PNG, JPEG, ...)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Text grid file, one row per line, `?` for unknown cells
    #[arg(short, long)]
    grid: Option<PathBuf>,

    /// Comma-separated words to find
    #[arg(short, long, value_delimiter = ',')]
    words: Vec<String>,

    /// File with one word per line (`#` starts a comment)
    #[arg(long)]
    words_file: Option<PathBuf>,

    /// Grid rows (needed for puzzles without grid lines)
    #[arg(long, requires = "cols")]
    rows: Option<usize>,

    /// Grid columns
    #[arg(long, requires = "rows")]
    cols: Option<usize>,

    /// Configuration file (default: the per-user config file if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// OCR backend
    #[arg(long, value_parser = parse_backend)]
    backend: Option<RecognizerBackend>,

    /// Directory with A.png .. Z.png letter templates
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Report only the first occurrence of each word
    #[arg(long)]
    first_only: bool,

    /// Skip diagonal directions
    #[arg(long)]
    no_diagonal: bool,

    /// Skip backwards directions (N, W, SW, NW)
    #[arg(long)]
    no_reversed: bool,

    /// Pretty-print the JSON report
    #[arg(long)]
    pretty: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_backend(value: &str) -> Result<RecognizerBackend, String> {
    match value.to_ascii_lowercase().as_str() {
        "template" => Ok(RecognizerBackend::Template),
        "tesseract" => Ok(RecognizerBackend::Tesseract),
        other => Err(format!("unknown backend {other:?} (expected template or tesseract)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides the default level
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = config::load_or_default(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        config.classification.backend = backend;
    }
    if let Some(dir) = &args.templates {
        config.classification.template_dir = Some(dir.clone());
    }

    let words = collect_words(&args)?;
    let input = read_input(&args).await?;

    let solver = Solver::from_config(config)?;
    let mut options = solver.default_options();
    options.allow_diagonal &= !args.no_diagonal;
    options.allow_reversed &= !args.no_reversed;
    options.return_all_occurrences &= !args.first_only;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling solve");
            on_ctrl_c.cancel();
        }
    });

    let report = match solver.solve(input, words.as_slice(), &options, &cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!("Solve failed ({}): {}", e.code(), e);
            return Err(e.into());
        }
    };

    let json = if args.pretty {
        report.to_json_pretty()?
    } else {
        report.to_json()?
    };
    println!("{json}");

    info!(
        "{} matches, {} words not found",
        report.found().len(),
        report.not_found().len()
    );
    Ok(())
}

/// Words from `--words` and `--words-file`, in that order
fn collect_words(args: &Args) -> Result<Vec<String>> {
    let mut words: Vec<String> = args
        .words
        .iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();

    if let Some(path) = &args.words_file {
        words.extend(read_word_file(path)?);
    }

    if words.is_empty() {
        bail!("No words given; use --words or --words-file");
    }
    Ok(words)
}

fn read_word_file(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read word list: {:?}", path))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn read_input(args: &Args) -> Result<PuzzleInput> {
    let dimensions = args.rows.zip(args.cols);

    if let Some(path) = &args.image {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image: {:?}", path))?;
        info!("Read {} bytes from {:?}", bytes.len(), path);
        return Ok(PuzzleInput::Image { bytes, dimensions });
    }

    if let Some(path) = &args.grid {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read grid: {:?}", path))?;
        if dimensions.is_some() {
            warn!("--rows/--cols are ignored for text grids");
        }
        return Ok(PuzzleInput::Text(text));
    }

    bail!("Either --image or --grid is required")
}
