//! CLI command implementations.

use crate::chunking::{ChunkerConfig, DocumentFormat};
use crate::cli::output::{
    OutputFormat, format_daemon_status, format_delete_result, format_index_summaries,
    format_search_results, format_store_stats,
};
use crate::cli::parser::{Cli, Commands};
use crate::config::Config;
use crate::embedding::embedder_dimensions;
use crate::error::Result;
use crate::io::read_file;
use crate::rpc::client::{DaemonClient, DirectClient, SearchClient};
use crate::rpc::protocol::SearchParams;
use crate::rpc::server::Daemon;
use crate::search::SearchMode;
use crate::storage::SearchStore;
use std::path::Path;

/// Executes the parsed CLI command, returning the output to print.
///
/// # Errors
///
/// Returns an error if the command fails; the caller maps it to exit
/// code 1.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);
    let config = Config::load_or_default(cli.config.as_deref())?;
    let db_path = cli.resolved_db_path();
    init_logging(cli, &config);

    match &cli.command {
        Commands::Daemon => cmd_daemon(&config, cli),
        Commands::Init { dimension } => cmd_init(&config, &db_path, *dimension, format),
        Commands::Index {
            files,
            reindex,
            doc_format,
            chunk_size,
            overlap,
        } => cmd_index(
            &config,
            &db_path,
            files,
            *reindex,
            doc_format.as_deref(),
            *chunk_size,
            *overlap,
            format,
        ),
        Commands::Search {
            query,
            limit,
            mode,
            rerank,
            rerank_top_k,
        } => cmd_search(
            &config,
            &db_path,
            query,
            *limit,
            mode,
            *rerank,
            *rerank_top_k,
            format,
        ),
        Commands::Delete { source } => cmd_delete(&db_path, source, format),
        Commands::Status => cmd_status(&config, &db_path, format),
        Commands::Stop => cmd_stop(&config),
    }
}

/// Installs the tracing subscriber. The daemon command honors the
/// configured level; everything else stays quiet unless `--verbose`.
/// `RUST_LOG` wins when set. Repeated calls (tests) are no-ops.
fn init_logging(cli: &Cli, config: &Config) {
    use tracing_subscriber::EnvFilter;

    let default_level = if cli.verbose {
        "debug"
    } else if matches!(cli.command, Commands::Daemon) {
        config.daemon.log_level.as_filter()
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn cmd_daemon(config: &Config, cli: &Cli) -> Result<String> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| crate::Error::Io(format!("cannot start runtime: {e}")))?;

    let daemon = Daemon::new(config, cli.config.clone());
    runtime.block_on(daemon.run())?;
    Ok(String::new())
}

fn cmd_init(
    config: &Config,
    db_path: &Path,
    dimension: Option<usize>,
    format: OutputFormat,
) -> Result<String> {
    let dimension =
        dimension.unwrap_or_else(|| embedder_dimensions(&config.models.embedder.name));
    let store = SearchStore::open_or_create(db_path, dimension)?;
    let stats = store.stats()?;

    let mut output = format!(
        "Initialized store at {} (dimension {dimension}).\n",
        db_path.display()
    );
    if format == OutputFormat::Json {
        output = format_store_stats(&stats, format);
    }
    Ok(output)
}

#[allow(clippy::too_many_arguments)]
fn cmd_index(
    config: &Config,
    db_path: &Path,
    files: &[std::path::PathBuf],
    reindex: bool,
    doc_format: Option<&str>,
    chunk_size: usize,
    overlap: usize,
    format: OutputFormat,
) -> Result<String> {
    let chunker = ChunkerConfig::new(chunk_size, overlap)?;
    let forced_format = doc_format
        .map(|name| {
            DocumentFormat::parse(name).ok_or_else(|| {
                crate::Error::InvalidArgument(format!("unknown document format: {name}"))
            })
        })
        .transpose()?;

    let direct = DirectClient::new(config);
    let dimension = embedder_dimensions(&config.models.embedder.name);
    let store = direct.engine().open_or_create_store(db_path, dimension)?;

    let mut summaries = Vec::with_capacity(files.len());
    for file in files {
        let text = read_file(file)?;
        let doc_format = forced_format.unwrap_or_else(|| DocumentFormat::from_path(file));
        let source = file.to_string_lossy().to_string();
        summaries.push(direct.engine().index_document(
            &store,
            &source,
            &text,
            doc_format,
            reindex,
            &chunker,
        )?);
    }

    Ok(format_index_summaries(&summaries, format))
}

#[allow(clippy::too_many_arguments)]
fn cmd_search(
    config: &Config,
    db_path: &Path,
    query: &str,
    limit: usize,
    mode: &str,
    rerank: bool,
    rerank_top_k: usize,
    format: OutputFormat,
) -> Result<String> {
    let mode = SearchMode::parse(mode)
        .ok_or_else(|| crate::Error::InvalidArgument(format!("unknown search mode: {mode}")))?;

    let mut client = SearchClient::connect(config);
    let result = client.search(&SearchParams {
        query: query.to_string(),
        db_path: db_path.to_path_buf(),
        limit,
        mode,
        rerank,
        rerank_top_k,
    })?;

    Ok(format_search_results(
        &result.results,
        result.search_time_ms,
        format,
    ))
}

fn cmd_delete(db_path: &Path, source: &str, format: OutputFormat) -> Result<String> {
    let store = SearchStore::open(db_path)?;
    let removed = store.delete_source(source)?;
    Ok(format_delete_result(source, removed, format))
}

fn cmd_status(config: &Config, db_path: &Path, format: OutputFormat) -> Result<String> {
    let mut output = String::new();

    // Daemon status when one is reachable; store stats either way.
    if let Ok(mut client) = DaemonClient::connect(&config.daemon.socket_path) {
        let status = client.status()?;
        output.push_str(&format_daemon_status(&status, format));
        if format == OutputFormat::Text {
            output.push('\n');
        }
    }

    match SearchStore::open(db_path) {
        Ok(store) => output.push_str(&format_store_stats(&store.stats()?, format)),
        Err(_) if format == OutputFormat::Text => {
            output.push_str(&format!("No store at {}.\n", db_path.display()));
        }
        Err(_) => {}
    }

    Ok(output)
}

fn cmd_stop(config: &Config) -> Result<String> {
    let mut client = DaemonClient::connect(&config.daemon.socket_path)
        .map_err(|_| crate::Error::Io("no daemon is running".to_string()))?;
    client.shutdown()?;
    Ok("Daemon stopping.\n".to_string())
}
