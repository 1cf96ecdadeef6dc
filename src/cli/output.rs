//! Output formatting for CLI commands.
//!
//! Supports text and JSON output formats.

use crate::rpc::protocol::StatusResult;
use crate::search::{IndexSummary, SearchHit};
use crate::storage::StoreStats;
use serde::Serialize;
use std::fmt::Write;

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Parses format from string.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Text,
        }
    }
}

fn format_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
}

/// Formats an error for the chosen output format.
#[must_use]
pub fn format_error(error: &crate::Error, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => error.to_string(),
        OutputFormat::Json => {
            let payload = serde_json::json!({
                "error": error.to_string(),
                "kind": error.kind(),
            });
            format_json(&payload)
        }
    }
}

/// Formats search results.
#[must_use]
pub fn format_search_results(
    hits: &[SearchHit],
    search_time_ms: u64,
    format: OutputFormat,
) -> String {
    match format {
        OutputFormat::Text => format_search_results_text(hits, search_time_ms),
        OutputFormat::Json => format_json(&serde_json::json!({
            "results": hits,
            "count": hits.len(),
            "search_time_ms": search_time_ms,
        })),
    }
}

fn format_search_results_text(hits: &[SearchHit], search_time_ms: u64) -> String {
    if hits.is_empty() {
        return format!("No results. ({search_time_ms} ms)\n");
    }

    let mut output = String::new();
    for hit in hits {
        let _ = write!(output, "{:>3}. {}#{}", hit.rank, hit.source, hit.chunk_index);
        if let Some(section) = hit.metadata.get("section") {
            let _ = write!(output, "  [{section}]");
        }
        if let Some(score) = hit.rerank_score {
            let _ = write!(output, "  rerank={score:.4}");
        } else if let Some(score) = hit.rrf_score {
            let _ = write!(output, "  rrf={score:.4}");
        }
        output.push('\n');
        let _ = writeln!(output, "     {}", snippet(&hit.content, 160));
    }
    let _ = writeln!(output, "\n{} result(s) in {search_time_ms} ms", hits.len());
    output
}

/// Formats store statistics.
#[must_use]
pub fn format_store_stats(stats: &StoreStats, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = String::new();
            output.push_str("Store\n");
            output.push_str("=====\n");
            let _ = writeln!(output, "  Chunks:   {}", stats.chunk_count);
            let _ = writeln!(output, "  Sources:  {}", stats.source_count);
            let _ = writeln!(output, "  Size:     {} bytes", stats.bytes);
            if !stats.top_sources.is_empty() {
                output.push_str("  Top sources:\n");
                for entry in &stats.top_sources {
                    let _ = writeln!(output, "    {:>6}  {}", entry.chunks, entry.source);
                }
            }
            output
        }
        OutputFormat::Json => format_json(stats),
    }
}

/// Formats daemon status.
#[must_use]
pub fn format_daemon_status(status: &StatusResult, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = String::new();
            output.push_str("Daemon\n");
            output.push_str("======\n");
            let _ = writeln!(output, "  Socket:    {}", status.socket_path.display());
            let _ = writeln!(output, "  Uptime:    {} s", status.uptime_seconds);
            let _ = writeln!(output, "  Requests:  {}", status.request_count);
            let _ = writeln!(
                output,
                "  Memory:    {} / {} MB",
                status.total_memory_mb, status.max_memory_mb
            );
            if status.loaded_models.is_empty() {
                output.push_str("  Models:    none loaded\n");
            } else {
                output.push_str("  Models:\n");
                for (slot, info) in &status.loaded_models {
                    let model = info
                        .get("model")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or("?");
                    let idle = info
                        .get("idle_seconds")
                        .and_then(serde_json::Value::as_u64)
                        .unwrap_or(0);
                    let _ = writeln!(output, "    {slot}: {model} (idle {idle} s)");
                }
            }
            output
        }
        OutputFormat::Json => format_json(status),
    }
}

/// Formats indexing summaries.
#[must_use]
pub fn format_index_summaries(summaries: &[IndexSummary], format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            let mut output = String::new();
            let mut total = 0;
            for summary in summaries {
                if summary.skipped {
                    let _ = writeln!(output, "  skipped {} (already indexed)", summary.source);
                } else {
                    let _ = writeln!(output, "  indexed {} ({} chunks)", summary.source, summary.chunks);
                    total += summary.chunks;
                }
            }
            let _ = writeln!(
                output,
                "{} file(s), {total} chunk(s) written",
                summaries.len()
            );
            output
        }
        OutputFormat::Json => format_json(&summaries),
    }
}

/// Formats a deletion result.
#[must_use]
pub fn format_delete_result(source: &str, removed: usize, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => {
            if removed == 0 {
                format!("No chunks matched '{source}'.\n")
            } else {
                format!("Deleted {removed} chunk(s) for '{source}'.\n")
            }
        }
        OutputFormat::Json => format_json(&serde_json::json!({
            "source": source,
            "deleted": removed,
        })),
    }
}

/// Truncates content to a single-line snippet.
fn snippet(content: &str, max_chars: usize) -> String {
    let single_line = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let truncated: String = single_line.chars().take(max_chars).collect();
    format!("{truncated}…")
}
