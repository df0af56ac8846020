//! Batch resolver: JSON-lines field mappings in, JSON-lines decisions out.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use bibresolve_core::config_file;
use bibresolve_core::{
    FuzzyNameIndex, ReferenceFields, Resolver, ResolverConfig, ResolverError, SolrBackend,
};

/// Resolve citation field mappings to canonical bibcodes
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Input JSON-lines file (one field mapping per line); stdin when omitted
    input: Option<PathBuf>,

    /// Directory of tab-separated authority tables
    #[arg(long)]
    authority_dir: Option<PathBuf>,

    /// Search backend base URL (overrides the config file)
    #[arg(long)]
    backend_url: Option<String>,

    /// Maximum concurrent resolutions
    #[arg(short, long, default_value_t = 8)]
    workers: usize,

    /// Path to a TOML config file (default: .bibresolve.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// One output line per input line, in input order.
#[derive(Serialize)]
struct OutputLine {
    resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bibcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hypothesis: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
    refstring: String,
}

fn error_kind(error: &ResolverError) -> &'static str {
    match error {
        ResolverError::Incomplete => "incomplete",
        ResolverError::NoSolution => "no-solution",
        ResolverError::Undecidable { .. } => "undecidable",
        ResolverError::Backend(_) => "backend",
    }
}

async fn resolve_line(resolver: &Resolver, line: &str) -> OutputLine {
    let fields: ReferenceFields = match serde_json::from_str(line) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable input line");
            return OutputLine {
                resolved: false,
                bibcode: None,
                score: None,
                hypothesis: None,
                error: Some("parse"),
                refstring: line.to_string(),
            };
        }
    };
    let refstring = fields.refstr.clone().unwrap_or_else(|| line.to_string());

    match resolver.resolve(&fields).await {
        Ok(solution) => OutputLine {
            resolved: true,
            bibcode: Some(solution.bibcode),
            score: Some(solution.score),
            hypothesis: Some(solution.hypothesis),
            error: None,
            refstring,
        },
        Err(e) => {
            tracing::warn!(refstr = %refstring, error = %e, "not resolved");
            OutputLine {
                resolved: false,
                bibcode: None,
                score: None,
                hypothesis: None,
                error: Some(error_kind(&e)),
                refstring,
            }
        }
    }
}

fn read_lines(input: Option<&Path>) -> anyhow::Result<Vec<String>> {
    let reader: Box<dyn BufRead> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(std::io::stdin())),
    };
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.context("reading input")?;
        if !line.trim().is_empty() {
            lines.push(line.trim().to_string());
        }
    }
    Ok(lines)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let file = config_file::load_config(cli.config.as_deref());
    let mut config = ResolverConfig::default();
    file.apply(&mut config);

    let backend_url = cli
        .backend_url
        .clone()
        .or_else(|| file.backend_url().map(String::from))
        .context("no backend URL (--backend-url or [backend] url in the config file)")?;

    let index = match &cli.authority_dir {
        Some(dir) => FuzzyNameIndex::from_dir(dir)
            .with_context(|| format!("loading authority tables from {}", dir.display()))?,
        None => FuzzyNameIndex::default(),
    };
    tracing::info!(names = index.len(), "authority index ready");

    let backend =
        SolrBackend::new(&backend_url, config.backend_timeout).context("building backend client")?;
    let resolver = Resolver::new(config, Arc::new(index), Arc::new(backend));

    let lines = read_lines(cli.input.as_deref())?;
    let total = lines.len();

    let semaphore = Arc::new(Semaphore::new(cli.workers.max(1)));
    let mut join_set = JoinSet::new();
    for (position, line) in lines.into_iter().enumerate() {
        let resolver = resolver.clone();
        let semaphore = semaphore.clone();
        join_set.spawn(async move {
            // The semaphore is never closed, so acquisition only fails if
            // the runtime is tearing down anyway.
            let _permit = semaphore.acquire_owned().await.ok();
            (position, resolve_line(&resolver, &line).await)
        });
    }

    let mut results: Vec<Option<OutputLine>> = (0..total).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((position, output)) => results[position] = Some(output),
            Err(e) => tracing::error!(error = %e, "resolution task panicked"),
        }
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for output in results.into_iter().flatten() {
        let line = serde_json::to_string(&output).context("encoding output")?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}
