//! Hotscript
//!
//! Watches a scripts directory, keeps every script built for both platforms
//! and logs build diagnostics as they are published.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hotscript_types::Platform;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hotscript::{DiagnosticReporter, RuntimeErrorRouter, ScriptRegistry, ScriptingConfig};
use hotscript_js_runtime::{QuickJsBackend, QuickJsEvaluator};

/// Hot-reloading script host
#[derive(Parser, Debug)]
#[command(name = "hotscript")]
#[command(about = "Live-rebuild a directory of JavaScript modules", long_about = None)]
struct Args {
    /// Scripts directory
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Platform whose artifacts local handles import
    #[arg(long)]
    target: Option<Platform>,

    /// Log per-build detail
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ScriptingConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.dir {
        config.dirname = Some(dir);
    }
    if let Some(target) = args.target {
        config.target = target;
    }
    config.verbose |= args.verbose;

    let default_filter = if config.verbose {
        "hotscript=debug,hotscript_js_runtime=debug"
    } else {
        "hotscript=info,hotscript_js_runtime=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting hotscript v{}", env!("CARGO_PKG_VERSION"));

    let router = RuntimeErrorRouter::new();
    router.init();

    let registry = ScriptRegistry::new(
        config,
        Arc::new(QuickJsBackend::new()),
        Arc::new(QuickJsEvaluator::new()),
        router.clone(),
    );

    // Report diagnostics the way an editor integration would see them
    let reporter = DiagnosticReporter::new();
    let _diagnostics = registry.on_collection_update(move |id, record| reporter.report(id, record));

    registry.start().await.context("Failed to start script registry")?;
    for name in registry.list() {
        info!("  - {}", name);
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    registry.stop().await?;
    router.shutdown();
    Ok(())
}
