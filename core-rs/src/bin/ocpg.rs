//! ocpg - OpenShift access-control grapher CLI
//!
//! Enumerates a cluster (or a snapshot file) and writes the resolved
//! access-control graph into an oxigraph store or an in-memory graph.

use anyhow::{bail, Context};
use clap::Parser;
use colored::Colorize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use ocp_grapher::graph::{EdgeMerge, NodeMerge};
use ocp_grapher::{
    ClusterSource, Collector, GrapherConfig, GraphBatch, GraphBuilder, GraphSink, HttpClusterSource,
    HttpSourceOptions, MemoryGraph, OcPolicyResolver, RdfGraphStore, RunReport, SccUsageResolver,
    SinkError, SnapshotSource, StageStatus,
};

#[derive(Parser)]
#[command(name = "ocpg")]
#[command(version)]
#[command(about = "OpenShift access-control grapher", long_about = None)]
struct Cli {
    /// API server URL, e.g. https://api.cluster.example.com:6443
    #[arg(long, short = 'a')]
    api_url: Option<String>,

    /// Bearer token
    #[arg(long, short = 't')]
    token: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Read the cluster from a snapshot file instead of the API
    #[arg(long, conflicts_with = "api_url")]
    snapshot: Option<PathBuf>,

    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// oxigraph store directory (in-memory graph when omitted)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Delete everything in the store before the run
    #[arg(long, short = 'r')]
    reset: bool,

    /// Do not ask before resetting
    #[arg(long, short = 'y')]
    yes: bool,

    /// Stages to run (repeatable): all, project, sa, scc, role, clusterrole,
    /// user, group, rolebinding, clusterrolebinding, route, pod, configmap
    #[arg(long = "collector", short = 'c', value_enum, num_args = 1..)]
    collectors: Vec<Collector>,

    /// Resolve which service accounts may use each SCC
    #[arg(long)]
    scc_usage: bool,

    /// Abort on the first graph write failure
    #[arg(long)]
    strict: bool,

    /// Objects processed concurrently within a stage
    #[arg(long)]
    parallelism: Option<usize>,

    /// Write the graph built by this run as JSON
    #[arg(long)]
    export: Option<PathBuf>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

/// Writes every batch to the store and keeps an in-memory copy for export
struct ExportingSink {
    store: Arc<dyn GraphSink>,
    copy: Arc<MemoryGraph>,
}

impl GraphSink for ExportingSink {
    fn merge_node(&self, node: &NodeMerge) -> Result<(), SinkError> {
        self.store.merge_node(node)?;
        self.copy.merge_node(node)
    }

    fn merge_edge(&self, edge: &EdgeMerge) -> Result<(), SinkError> {
        self.store.merge_edge(edge)?;
        self.copy.merge_edge(edge)
    }

    fn commit(&self, batch: &GraphBatch) -> Result<(), SinkError> {
        self.store.commit(batch)?;
        self.copy.commit(batch)
    }

    fn reset(&self) -> Result<(), SinkError> {
        self.store.reset()?;
        self.copy.reset()
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("ocp_grapher={}", level).parse()?)
                .add_directive(format!("ocpg={}", level).parse()?),
        )
        .with_writer(io::stderr)
        .init();
    Ok(())
}

/// Configuration file values overridden by command line flags
fn resolve_config(cli: &Cli) -> anyhow::Result<GrapherConfig> {
    let mut config = match &cli.config {
        Some(path) => GrapherConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => GrapherConfig::default(),
    };

    if let Some(url) = &cli.api_url {
        config.cluster.api_url = Some(url.clone());
    }
    if let Some(token) = &cli.token {
        config.cluster.token = Some(token.clone());
    }
    if cli.insecure {
        config.cluster.insecure_skip_tls_verify = true;
    }
    if let Some(store) = &cli.store {
        config.store.path = Some(store.clone());
    }
    if !cli.collectors.is_empty() {
        config.run.collectors = cli.collectors.clone();
    }
    if cli.strict {
        config.run.strict = true;
    }
    if cli.scc_usage {
        config.run.scc_usage = true;
    }
    if let Some(parallelism) = cli.parallelism {
        config.run.parallelism = parallelism;
    }

    config.validate()?;
    Ok(config)
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} (y/n) ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_report(report: &RunReport) {
    println!();
    println!("{} {}", "Run".bold(), report.run_id);
    println!(
        "{:<20} {:<10} {:>6} {:>10} {:>7} {:>8}",
        "STAGE", "STATUS", "SEEN", "COMMITTED", "FAILED", "SKIPPED"
    );
    for stage in &report.stages {
        let status = match stage.status {
            StageStatus::Completed => "completed".green(),
            StageStatus::Partial => "partial".yellow(),
            StageStatus::Failed => "failed".red(),
        };
        println!(
            "{:<20} {:<10} {:>6} {:>10} {:>7} {:>8}",
            stage.collector.as_str(),
            status,
            stage.seen,
            stage.committed,
            stage.failed,
            stage.skipped
        );
        if let Some(error) = &stage.error {
            println!("  {}", error.dimmed());
        }
    }

    let elapsed = report.finished_at - report.started_at;
    println!(
        "\n{} {} objects committed, {} failed, {} skipped in {}ms",
        if report.is_clean() { "✓".green() } else { "!".yellow() },
        report.committed(),
        report.failed(),
        report.skipped(),
        elapsed.num_milliseconds()
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    let config = resolve_config(&cli)?;

    let (source, snapshot): (Arc<dyn ClusterSource>, Option<SnapshotSource>) = match &cli.snapshot {
        Some(path) => {
            let snapshot = SnapshotSource::load(path)
                .with_context(|| format!("Failed to load snapshot {}", path.display()))?;
            info!(snapshot = %path.display(), "Reading cluster snapshot");
            (Arc::new(snapshot.clone()), Some(snapshot))
        }
        None => {
            let Some(api_url) = config.cluster.api_url.clone() else {
                bail!("either --snapshot or --api-url (cluster.apiUrl) is required");
            };
            let mut options = HttpSourceOptions::new(api_url.clone());
            options.token = config.cluster.token.clone();
            options.insecure_skip_tls_verify = config.cluster.insecure_skip_tls_verify;
            options.timeout = config.cluster.request_timeout();
            options.page_size = config.cluster.page_size;
            info!(api_url = %api_url, "Reading cluster API");
            (Arc::new(HttpClusterSource::with(options)?), None)
        }
    };

    let memory = Arc::new(MemoryGraph::new());
    let mut store: Option<Arc<RdfGraphStore>> = None;
    let sink: Arc<dyn GraphSink> = match &config.store.path {
        Some(path) => {
            let rdf = Arc::new(
                RdfGraphStore::open(path)
                    .with_context(|| format!("Failed to open graph store {}", path.display()))?,
            );
            if cli.reset {
                let prompt = format!("Reset graph store {}?", path.display());
                if !cli.yes && !confirm(&prompt)? {
                    println!("Aborted");
                    return Ok(());
                }
                rdf.reset()?;
                info!(store = %path.display(), "Graph store reset");
            }
            store = Some(Arc::clone(&rdf));
            if cli.export.is_some() {
                Arc::new(ExportingSink {
                    store: rdf as Arc<dyn GraphSink>,
                    copy: Arc::clone(&memory),
                })
            } else {
                rdf as Arc<dyn GraphSink>
            }
        }
        None => {
            if cli.reset {
                info!("No graph store configured, nothing to reset");
            }
            Arc::clone(&memory) as Arc<dyn GraphSink>
        }
    };

    let mut builder = GraphBuilder::new(source, sink, config.run.clone());
    if config.run.scc_usage {
        let usage: Arc<dyn SccUsageResolver> = match snapshot {
            Some(snapshot) => Arc::new(snapshot.scc_usage()),
            None => Arc::new(OcPolicyResolver::from_config(&config.cluster)),
        };
        builder = builder.with_scc_usage(usage);
    }

    let report = builder.run().await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if let Some(store) = &store {
        info!(triples = store.len()?, "Graph store updated");
    }

    if let Some(path) = &cli.export {
        let export = memory.export()?;
        std::fs::write(path, serde_json::to_string_pretty(&export)?)
            .with_context(|| format!("Failed to write export {}", path.display()))?;
        println!(
            "Exported {} nodes and {} edges to {}",
            export.nodes.len(),
            export.edges.len(),
            path.display()
        );
    }

    if report.stages.iter().any(|s| s.status == StageStatus::Failed) {
        std::process::exit(1);
    }
    Ok(())
}
