use anyhow::{bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use docmind_session_index::{
    verify_session, IndexConfig, LoadOutcome, SessionStoreManager, StubEmbedder,
};
use serde_json::{json, Value};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

/// Pretty JSON on stdout. A closed pipe (`| head`) is not an error.
fn emit_report(report: &Value) -> Result<()> {
    let mut out = io::BufWriter::new(io::stdout().lock());
    let written = serde_json::to_writer_pretty(&mut out, report)
        .map_err(io::Error::from)
        .and_then(|()| writeln!(out))
        .and_then(|()| out.flush());
    match written {
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => Ok(other?),
    }
}

#[derive(Parser)]
#[command(name = "docmind-index")]
#[command(about = "Inspect and maintain DocMind session indexes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with index settings (defaults to DOCMIND_INDEX_* env vars)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Session store root (overrides the config file and DOCMIND_INDEX_PATH)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for JSON)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print stats and documents of a session as JSON, without repairing it
    Inspect(SessionArgs),

    /// Check a session's artifacts; exits non-zero when they are corrupt
    Verify(SessionArgs),

    /// Remove a document from a session and persist the change
    Remove(RemoveArgs),
}

#[derive(Args)]
struct SessionArgs {
    /// Session id
    session: String,
}

#[derive(Args)]
struct RemoveArgs {
    /// Session id
    session: String,

    /// Document to remove
    doc_id: String,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Inspect(args) => run_inspect(&config, &args.session).await,
        Commands::Verify(args) => run_verify(&config, &args.session).await,
        Commands::Remove(args) => run_remove(config, &args.session, &args.doc_id).await,
    }
}

fn load_config(cli: &Cli) -> Result<IndexConfig> {
    let mut config = match &cli.config {
        Some(path) => IndexConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => IndexConfig::from_env().context("Invalid DOCMIND_INDEX_* environment")?,
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    config.validate().context("Invalid index config")?;
    log::debug!("Using session store root {}", config.root.display());
    Ok(config)
}

fn outcome_report(session_id: &str, outcome: &LoadOutcome) -> Result<Value> {
    Ok(json!({
        "session_id": session_id,
        "stats": serde_json::to_value(outcome.session.stats())?,
        "documents": serde_json::to_value(outcome.session.metadata().documents())?,
        "warning": serde_json::to_value(&outcome.warning)?,
        "recovery": serde_json::to_value(&outcome.recovery)?,
    }))
}

async fn run_inspect(config: &IndexConfig, session_id: &str) -> Result<()> {
    let outcome = verify_session(config, session_id)
        .await
        .with_context(|| format!("Failed to read session '{session_id}'"))?;
    let report = outcome_report(session_id, &outcome)?;
    emit_report(&report)
}

async fn run_verify(config: &IndexConfig, session_id: &str) -> Result<()> {
    let outcome = verify_session(config, session_id)
        .await
        .with_context(|| format!("Failed to read session '{session_id}'"))?;
    let mut report = outcome_report(session_id, &outcome)?;
    let status = if outcome.warning.is_some() {
        "corrupt"
    } else if outcome.recovery.is_some() {
        "recoverable"
    } else {
        "ok"
    };
    report["status"] = json!(status);
    emit_report(&report)?;

    if let Some(warning) = outcome.warning {
        bail!("{warning}");
    }
    Ok(())
}

async fn run_remove(config: IndexConfig, session_id: &str, doc_id: &str) -> Result<()> {
    // Removal never embeds, so the stub stands in for the model.
    let manager = SessionStoreManager::new(config, Arc::new(StubEmbedder::default()))?;
    if let Some(warning) = manager.load_warning(session_id).await? {
        log::warn!("Session '{session_id}' was reset on load: {warning}");
    }
    let existed = manager
        .is_document_indexed(session_id, doc_id)
        .await
        .with_context(|| format!("Failed to open session '{session_id}'"))?;
    manager
        .remove_doc(session_id, doc_id)
        .await
        .with_context(|| format!("Failed to remove '{doc_id}' from session '{session_id}'"))?;

    let stats = manager.session_stats(session_id).await?;
    let report = json!({
        "session_id": session_id,
        "doc_id": doc_id,
        "removed": existed,
        "stats": serde_json::to_value(stats)?,
    });
    emit_report(&report)
}
