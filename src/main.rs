//! epmigrate - Legacy display-asset bundle migration
//!
//! CLI entry point. The binary:
//! - initializes logging (daily-rotating file + console)
//! - creates a tokio runtime for subprocess execution
//! - discovers the resource directory and the external encoder
//! - runs the batch conversion with console progress callbacks
//!
//! There is no interactive frontend here: ambiguous fuzzy matches are
//! accepted best-effort. Embedders wanting a confirmation step wire a
//! [`epmigrate::ConfirmationBridge`] into the resolver instead.

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use epmigrate::services::batch::BatchCoordinator;
use epmigrate::services::convert::{ConversionOrchestrator, OverlayMode};
use epmigrate::services::resolver::Disambiguator;
use epmigrate::{APP_NAME, ResourceDirs, VERSION};

#[derive(Parser, Debug)]
#[command(
    name = "epmigrate",
    version,
    about = "Convert legacy material bundles to the current format"
)]
struct Args {
    /// Root directory containing legacy bundles (one per subfolder)
    src_root: Utf8PathBuf,

    /// Destination root for converted bundles
    dst_root: Utf8PathBuf,

    /// Overlay handling: auto (identify the subject), arknights (forced
    /// identity template) or image (keep the picture)
    #[arg(long, default_value = "auto", value_parser = parse_overlay_mode)]
    mode: OverlayMode,

    /// Disable subject recognition in arknights mode
    #[arg(long)]
    no_ocr: bool,

    /// Override the bundled resources directory (reference data, icons)
    #[arg(long)]
    resources: Option<Utf8PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

// clap needs a parser for the mode flag; reuse the library's FromStr.
fn parse_overlay_mode(value: &str) -> Result<OverlayMode, String> {
    value.parse()
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = epmigrate::logging::setup_logging("logs", APP_NAME, args.debug, false)?;
    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    // Subprocess execution (encoder, prober, recognition engine) runs on
    // tokio workers; the pipeline itself is sequential per bundle.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_name("epmigrate-worker")
        .build()?;

    let resources = args
        .resources
        .map(ResourceDirs::new)
        .unwrap_or_else(ResourceDirs::discover);
    tracing::info!("Using resources at {}", resources.root());

    let orchestrator = ConversionOrchestrator::new(resources);
    let coordinator = BatchCoordinator::new();

    let progress = |current: usize, total: usize, name: &str| {
        println!("[{current}/{total}] {name}");
    };
    let detail = |message: &str| {
        println!("    {message}");
    };

    let outcome = runtime.block_on(coordinator.run_batch(
        &orchestrator,
        &args.src_root,
        &args.dst_root,
        args.mode,
        !args.no_ocr,
        &Disambiguator::AcceptBest,
        Some(&progress),
        Some(&detail),
    ));

    println!("{}", outcome.summary());
    for result in &outcome.results {
        let status = if result.success { "ok" } else { "FAILED" };
        println!("  {status:6} {} - {}", result.src_path, result.message);
    }

    runtime.shutdown_timeout(std::time::Duration::from_secs(5));

    if !outcome.results.is_empty() && outcome.succeeded() == 0 {
        std::process::exit(1);
    }
    Ok(())
}
