// Cohort query compiler CLI
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use cohortc::ast::ConstraintTree;
use cohortc::config::CompilerConfig;
use cohortc::crypto::TaggedEncryptor;
use cohortc::export::{SummaryExporter, TextExporter};
use cohortc::ir::QueryDefinition;
use cohortc::lower::lower_query;
use cohortc::raise::{raise_query, StaticTermResolver};

#[derive(Parser)]
#[command(name = "cohortc")]
#[command(version = "0.1.0")]
#[command(about = "Compiler between cohort constraint trees and query panels", long_about = None)]
struct Cli {
    /// Compiler configuration file (JSON)
    #[arg(long, global = true, value_name = "CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lower constraint trees to a query definition
    Lower {
        /// Selection tree (JSON)
        #[arg(value_name = "SELECTION")]
        selection: PathBuf,

        /// Sequence tree (JSON)
        #[arg(long, value_name = "SEQUENCE")]
        sequence: Option<PathBuf>,

        /// Require all panels to match within one observation
        #[arg(long)]
        same_instance: bool,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Rebuild constraint trees from a stored query definition
    Raise {
        /// Query definition (JSON)
        #[arg(value_name = "QUERY")]
        query: PathBuf,

        /// Term table mapping query terms to concepts and cohorts (JSON)
        #[arg(long, value_name = "TERMS")]
        terms: PathBuf,

        /// Keep the raw panel shape instead of AND(OR(...))
        #[arg(long)]
        no_normalize: bool,

        /// Output file (defaults to stdout)
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Check a constraint tree for structural and input errors
    Validate {
        /// Constraint tree (JSON)
        #[arg(value_name = "TREE")]
        tree: PathBuf,
    },

    /// Render a constraint tree for reading
    Export {
        /// Constraint tree (JSON)
        #[arg(value_name = "TREE")]
        tree: PathBuf,

        #[arg(short, long, value_enum, default_value = "text")]
        format: ExportFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ExportFormat {
    Text,
    Summary,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RaisedOutput<'a> {
    selection: &'a ConstraintTree,
    sequence: Option<&'a ConstraintTree>,
    query_same_instance: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CompilerConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CompilerConfig::default(),
    };
    init_logging(&config);

    match cli.command {
        Commands::Lower {
            selection,
            sequence,
            same_instance,
            output,
        } => lower_command(&config, selection, sequence, same_instance, output),
        Commands::Raise {
            query,
            terms,
            no_normalize,
            output,
        } => raise_command(&config, query, terms, no_normalize, output),
        Commands::Validate { tree } => validate_command(tree),
        Commands::Export { tree, format } => export_command(tree, format),
    }
}

fn init_logging(config: &CompilerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_tree(path: &Path) -> Result<ConstraintTree> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read tree file: {}", path.display()))?;
    ConstraintTree::from_json(&json)
        .with_context(|| format!("Malformed constraint tree: {}", path.display()))
}

fn emit(output: Option<PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(&path, content)
                .with_context(|| format!("Failed to write output file: {}", path.display()))?;
            info!(path = %path.display(), "wrote output");
        }
        None => println!("{}", content),
    }
    Ok(())
}

fn lower_command(
    config: &CompilerConfig,
    selection: PathBuf,
    sequence: Option<PathBuf>,
    same_instance: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let selection_tree = read_tree(&selection)?;
    let sequence_tree = sequence.as_deref().map(read_tree).transpose()?;
    let same_instance = same_instance || config.query_timing.is_same_instance();

    let query = lower_query(
        &selection_tree,
        sequence_tree.as_ref(),
        same_instance,
        &TaggedEncryptor,
    )
    .with_context(|| format!("Failed to lower {}", selection.display()))?;
    debug!(
        selection_panels = query.selection_panels.len(),
        sequential_panels = query.sequential_panels.len(),
        "lowered query"
    );

    let json = query.to_json().context("Failed to serialize query")?;
    emit(output, &json)
}

fn raise_command(
    config: &CompilerConfig,
    query: PathBuf,
    terms: PathBuf,
    no_normalize: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let query_json = fs::read_to_string(&query)
        .with_context(|| format!("Failed to read query file: {}", query.display()))?;
    let definition = QueryDefinition::from_json(&query_json)
        .with_context(|| format!("Malformed query definition: {}", query.display()))?;

    let terms_json = fs::read_to_string(&terms)
        .with_context(|| format!("Failed to read term table: {}", terms.display()))?;
    let resolver = StaticTermResolver::from_json(&terms_json)
        .with_context(|| format!("Malformed term table: {}", terms.display()))?;

    let mut options = config.raise_options();
    if no_normalize {
        options.normalize = false;
    }
    let raised = raise_query(&definition, &resolver, options)
        .with_context(|| format!("Failed to raise {}", query.display()))?;
    eprintln!("selection: {}", raised.selection.text_label());
    if let Some(sequence) = &raised.sequence {
        eprintln!("sequence: {}", sequence.text_label());
    }

    let json = serde_json::to_string_pretty(&RaisedOutput {
        selection: &raised.selection,
        sequence: raised.sequence.as_ref(),
        query_same_instance: raised.query_same_instance,
    })
    .context("Failed to serialize raised trees")?;
    emit(output, &json)
}

fn validate_command(tree: PathBuf) -> Result<()> {
    let constraint_tree = read_tree(&tree)?;
    if let Some(message) = constraint_tree.validity() {
        bail!("{}: {}", tree.display(), message);
    }
    println!("✓ Valid: {}", tree.display());
    Ok(())
}

fn export_command(tree: PathBuf, format: ExportFormat) -> Result<()> {
    let constraint_tree = read_tree(&tree)?;
    let rendered = match format {
        ExportFormat::Text => TextExporter::default()
            .render(&constraint_tree)
            .context("Failed to render tree")?,
        ExportFormat::Summary => {
            let summary = SummaryExporter
                .summarize(&constraint_tree)
                .context("Failed to summarize tree")?;
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        }
    };
    println!("{}", rendered);
    Ok(())
}
