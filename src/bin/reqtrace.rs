//! `reqtrace` command line front end.
//!
//! Reads children and parents from CSV, runs the trace pipeline, writes the
//! trace matrix as CSV and (optionally) the validation report as JSON.
//!
//! Usage:
//!   reqtrace --children legacy.csv --parents needs.csv \
//!     --lexicon lexicon.json \
//!     --parent-title-col Title \
//!     --child-extra Source --parent-extra Owner \
//!     --output trace.csv --report report.json
//!
//! Embedding provider selection (`--embeddings auto`): the `embedding`
//! section of `--config` when given, else an API provider from the
//! OPENAI_* / AZURE_OPENAI_* environment, else the local hashing provider.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tempfile::NamedTempFile;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use reqtrace::embed::{ApiProviderConfig, ProviderSpec};
use reqtrace::{
    ColumnMapping, DomainLexicon, EmbeddingSettings, ExtraColumns, Pipeline, RecordTable,
    RequirementRecord, TraceConfig, TraceOutput, filter_rows,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum EmbeddingMode {
    /// Config file, then environment API settings, then hashing
    Auto,
    /// Local hashing provider only
    Hashing,
    /// No embedding signal
    Off,
}

/// Trace legacy requirements to canonical needs
#[derive(Parser, Debug)]
#[command(name = "reqtrace")]
#[command(about = "Rank candidate parent requirements for every child requirement")]
#[command(version)]
struct Args {
    /// CSV file with the child (legacy) requirements
    #[arg(long, short = 'c')]
    children: PathBuf,

    /// CSV file with the parent (canonical) requirements
    #[arg(long, short = 'p')]
    parents: PathBuf,

    #[arg(long, default_value = "Requirement ID")]
    child_id_col: String,

    #[arg(long, default_value = "Description")]
    child_text_col: String,

    /// Extra child columns copied into the export (comma separated)
    #[arg(long, value_delimiter = ',')]
    child_extra: Vec<String>,

    #[arg(long, default_value = "Need ID")]
    parent_id_col: String,

    #[arg(long, default_value = "Description")]
    parent_text_col: String,

    /// Column used as the parent display title
    #[arg(long)]
    parent_title_col: Option<String>,

    /// Extra parent columns copied into the export (comma separated)
    #[arg(long, value_delimiter = ',')]
    parent_extra: Vec<String>,

    /// Domain lexicon JSON: {"group": ["keyword", ...], ...}
    #[arg(long, short = 'l')]
    lexicon: Option<PathBuf>,

    /// YAML run configuration
    #[arg(long, env = "REQTRACE_CONFIG")]
    config: Option<PathBuf>,

    /// Parents kept per child
    #[arg(long, short = 'k')]
    top_k: Option<usize>,

    /// Largest TF-IDF n-gram order
    #[arg(long)]
    ngram_max: Option<usize>,

    /// Orphan threshold on the best computed score
    #[arg(long)]
    threshold: Option<f32>,

    /// Disable rule matching
    #[arg(long)]
    no_rules: bool,

    /// Stop phrases replacing the configured list (comma separated)
    #[arg(long, value_delimiter = ',')]
    stop_phrases: Option<Vec<String>>,

    #[arg(long, value_enum, default_value_t = EmbeddingMode::Auto)]
    embeddings: EmbeddingMode,

    /// Only write rows whose Method_Used matches (Fusion, Embedding, TF-IDF, N/A)
    #[arg(long)]
    method: Option<String>,

    /// Only write rows with Computed_Score at or above this value
    #[arg(long)]
    min_score: Option<f32>,

    /// Trace matrix CSV output
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Validation report JSON output
    #[arg(long, short = 'r')]
    report: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let config = load_config(&args)?;
    let lexicon = match &args.lexicon {
        Some(path) => DomainLexicon::from_file(path)
            .with_context(|| format!("Failed to load lexicon: {}", path.display()))?,
        None => DomainLexicon::default(),
    };
    if config.matching.rules_enabled && lexicon.is_empty() {
        warn!("no lexicon groups loaded, rule matching is inactive");
    }

    let mut child_mapping = ColumnMapping::new(&args.child_id_col, &args.child_text_col);
    child_mapping.extra_columns = args.child_extra.clone();
    let mut parent_mapping = ColumnMapping::new(&args.parent_id_col, &args.parent_text_col);
    parent_mapping.title_column = args.parent_title_col.clone();
    parent_mapping.extra_columns = args.parent_extra.clone();

    let children = read_records(&args.children, &child_mapping, "children")?;
    let parents = read_records(&args.parents, &parent_mapping, "parents")?;
    info!(
        children = children.len(),
        parents = parents.len(),
        "records_loaded"
    );

    let pipeline = Pipeline::from_config(&config, lexicon)
        .context("Failed to build pipeline")?
        .with_extra_columns(ExtraColumns::new(
            args.child_extra.clone(),
            args.parent_extra.clone(),
        ));

    let output = tokio::select! {
        result = pipeline.run(children, parents) => result.context("Trace run failed")?,
        _ = shutdown_signal() => {
            warn!("interrupted; no output written");
            bail!("interrupted");
        }
    };

    write_matrix(&args.output, &output, args.method.as_deref(), args.min_score)?;
    if let Some(path) = &args.report {
        write_report(path, &output)?;
    }

    let report = &output.report;
    info!(
        traces = report.total_traces,
        orphans = report.orphan_children.len(),
        childless = report.childless_parents.len(),
        degraded = report.degraded_children,
        output = %args.output.display(),
        "trace_written"
    );
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &Args) -> Result<TraceConfig> {
    let mut config = match &args.config {
        Some(path) => TraceConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => TraceConfig::default(),
    };

    let matching = &mut config.matching;
    if let Some(k) = args.top_k {
        matching.top_k = k;
    }
    if let Some(max_n) = args.ngram_max {
        matching.ngram_range.1 = max_n;
    }
    if let Some(threshold) = args.threshold {
        matching.orphan_threshold = threshold;
    }
    if args.no_rules {
        matching.rules_enabled = false;
    }
    if let Some(phrases) = &args.stop_phrases {
        matching.stop_phrases = phrases
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
    }

    config.embedding = match args.embeddings {
        EmbeddingMode::Off => EmbeddingSettings {
            primary: ProviderSpec::Disabled,
            fallback: ProviderSpec::Disabled,
            ..config.embedding
        },
        EmbeddingMode::Hashing => EmbeddingSettings {
            primary: ProviderSpec::default(),
            fallback: ProviderSpec::Disabled,
            expected_dimension: None,
            ..config.embedding
        },
        EmbeddingMode::Auto if args.config.is_some() => config.embedding,
        EmbeddingMode::Auto => match ApiProviderConfig::from_env() {
            Some(api) => {
                info!(kind = ?api.kind, url = %api.url, "embedding_api_from_env");
                EmbeddingSettings {
                    primary: ProviderSpec::Api(api),
                    ..config.embedding
                }
            }
            None => config.embedding,
        },
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn read_records(
    path: &Path,
    mapping: &ColumnMapping,
    set: &'static str,
) -> Result<Vec<RequirementRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut table = RecordTable::new(headers);
    for (row_no, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Failed to read row {} of {}", row_no + 1, path.display()))?;
        table.push_row(record.iter().map(str::to_string).collect());
    }

    table
        .into_records(mapping, set)
        .with_context(|| format!("Invalid {set} file: {}", path.display()))
}

fn write_matrix(
    path: &Path,
    output: &TraceOutput,
    method: Option<&str>,
    min_score: Option<f32>,
) -> Result<()> {
    write_atomic(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&output.header)?;
        for row in filter_rows(&output.rows, method, min_score) {
            writer.write_record(row.to_record())?;
        }
        writer.flush()?;
        Ok(())
    })
    .with_context(|| format!("Failed to write trace matrix: {}", path.display()))
}

fn write_report(path: &Path, output: &TraceOutput) -> Result<()> {
    write_atomic(path, |file| {
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &output.report)?;
        writer.flush()?;
        Ok(())
    })
    .with_context(|| format!("Failed to write report: {}", path.display()))
}

/// Writes into a temp file next to `path` and renames it over `path` only
/// when `fill` succeeds. A failed write leaves any existing file untouched.
fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    fill(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}
