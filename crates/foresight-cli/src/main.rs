//! Foresight CLI
//!
//! Command-line entry point for:
//! - Running an analysis from JSON fact, factor and correlation files
//! - Running the built-in demo dataset against an offline generator
//! - Printing the default keyword lexicons

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use foresight_core::llm::{GenerationError, GenerationRequest};
use foresight_core::{
    AnalysisInput, AnalysisReport, AnalysisSession, Lexicons, MockGenerator, SessionConfig, TextGenerator,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEMO_FACTS: &str = include_str!("../data/demo_facts.json");
const DEMO_FACTORS: &str = include_str!("../data/demo_factors.json");
const DEMO_CORRELATIONS: &str = include_str!("../data/demo_correlations.json");

#[derive(Parser)]
#[command(name = "foresight")]
#[command(author, version, about = "Foresight: fact-trust and causal-reasoning scenario analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full analysis from JSON inputs.
    Run {
        /// Facts from the Fact Analyzer (JSON array)
        #[arg(long)]
        facts: PathBuf,
        /// Situation factors: `{"a": {"description": "...", "weight": 30}, ...}`
        #[arg(long)]
        factors: PathBuf,
        /// Correlations between facts (JSON array)
        #[arg(long)]
        correlations: Option<PathBuf>,
        /// Session config (JSON); defaults plus FORESIGHT_* variables otherwise
        #[arg(long)]
        config: Option<PathBuf>,
        /// Text generation provider
        #[arg(long, value_enum, default_value = "mock")]
        provider: ProviderArg,
        /// Re-run with changed weights after the first pass, e.g. `--reweight a=45`
        #[arg(long, value_parser = parse_weight)]
        reweight: Vec<(String, f64)>,
        /// Write the full report JSON here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Run the built-in demo dataset with the offline generator.
    Demo {
        /// Write the full report JSON here
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print recommendations as markdown
        #[arg(long)]
        markdown: bool,
    },

    /// Print the default keyword lexicons as JSON.
    Lexicons,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderArg {
    /// Offline generator that builds scenarios from the context
    Mock,
    /// OpenAI-compatible endpoint from OPENAI_API_KEY or LOCAL_LLM_URL
    Openai,
}

fn parse_weight(s: &str) -> std::result::Result<(String, f64), String> {
    let (id, weight) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ID=WEIGHT, got `{s}`"))?;
    let weight: f64 = weight
        .trim()
        .parse()
        .map_err(|_| format!("invalid weight in `{s}`"))?;
    Ok((id.trim().to_string(), weight))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("foresight=info,foresight_core=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            facts,
            factors,
            correlations,
            config,
            provider,
            reweight,
            out,
        } => {
            let config = match config {
                Some(path) => SessionConfig::from_json_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => SessionConfig::from_env()?,
            };
            let input = AnalysisInput {
                facts: read_json(&facts)?,
                factors: read_json(&factors)?,
                correlations: match correlations {
                    Some(path) => read_json(&path)?,
                    None => Vec::new(),
                },
            };
            let generator = make_generator(provider)?;
            cmd_run(config, generator, input, reweight.into_iter().collect(), out.as_deref(), false).await?;
        }
        Commands::Demo { out, markdown } => {
            let input = AnalysisInput {
                facts: serde_json::from_str(DEMO_FACTS).context("demo facts")?,
                factors: serde_json::from_str(DEMO_FACTORS).context("demo factors")?,
                correlations: serde_json::from_str(DEMO_CORRELATIONS).context("demo correlations")?,
            };
            let generator: Arc<dyn TextGenerator> = Arc::new(MockGenerator::responding(demo_response));
            cmd_run(SessionConfig::default(), generator, input, BTreeMap::new(), out.as_deref(), markdown).await?;
        }
        Commands::Lexicons => {
            println!("{}", serde_json::to_string_pretty(&Lexicons::default())?);
        }
    }
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    tracing::debug!(path = %path.display(), bytes = text.len(), "read input file");
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn make_generator(provider: ProviderArg) -> Result<Arc<dyn TextGenerator>> {
    match provider {
        ProviderArg::Mock => Ok(Arc::new(MockGenerator::responding(demo_response))),
        ProviderArg::Openai => openai_generator(),
    }
}

#[cfg(feature = "openai")]
fn openai_generator() -> Result<Arc<dyn TextGenerator>> {
    use foresight_core::llm::{LlmConfig, OpenAiCompatibleGenerator};
    let config = LlmConfig::from_env()?;
    Ok(Arc::new(OpenAiCompatibleGenerator::new(config)?))
}

#[cfg(not(feature = "openai"))]
fn openai_generator() -> Result<Arc<dyn TextGenerator>> {
    Err(anyhow::anyhow!("built without the `openai` feature"))
}

async fn cmd_run(
    config: SessionConfig,
    generator: Arc<dyn TextGenerator>,
    input: AnalysisInput,
    reweight: BTreeMap<String, f64>,
    out: Option<&Path>,
    markdown: bool,
) -> Result<()> {
    println!(
        "{} {} facts, {} factors for {}",
        "Analyzing".green().bold(),
        input.facts.len(),
        input.factors.len(),
        config.target.name.bold()
    );

    let mut session = AnalysisSession::new(config, generator)?;
    let mut report = session.run(input).await?;
    print_report(&report);

    if !reweight.is_empty() {
        println!("\n{} {:?}", "Re-weighting".yellow().bold(), reweight);
        report = session.update_weights_and_rerun(&reweight).await?;
        print_report(&report);
    }

    if markdown {
        println!("\n{}", report.recommendations.to_markdown(10));
    }

    if let Some(path) = out {
        let text = serde_json::to_string_pretty(&report)?;
        fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        tracing::info!(path = %path.display(), run_id = %report.run_id, "report written");
        println!("{} {}", "Wrote".green().bold(), path.display());
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    let s = &report.statistics;
    println!("\n{}", "Scenarios".cyan().bold());
    for scenario in &report.scenarios {
        let marker = if scenario.is_fallback() {
            "fallback".red()
        } else {
            "ok".green()
        };
        println!(
            "  [{}] {:>2}m {:<8} {} (confidence {:.2})",
            marker, scenario.horizon_months, scenario.polarity, scenario.title, scenario.confidence
        );
    }

    println!("\n{}", "Recommendations".cyan().bold());
    println!("  avoid negative:  {}", report.recommendations.avoid_negative.len());
    println!("  pursue positive: {}", report.recommendations.pursue_positive.len());

    println!("\n{}", "Statistics".cyan().bold());
    println!("  data sources:    {}", s.data_sources);
    println!(
        "  facts:           {} total, {} clean, {} poisoned, {} rejected",
        s.total_facts, s.clean_facts, s.poisoned_facts, s.rejected_inputs
    );
    println!("  correlations:    {}", s.correlations);
    println!("  concepts:        {}", s.concepts);
    println!("  relations:       {}", s.relations);
    println!("  causal chains:   {}", s.causal_chains);
    println!("  avg confidence:  {:.2}", report.reasoning.average_confidence);

    if !report.audit.is_empty() {
        println!("\n{}", "Audit".yellow().bold());
        for record in &report.audit {
            println!("  {:?} {}: {}", record.kind, record.subject, record.reason);
        }
    }
}

/// Offline responder: builds a schema-shaped scenario from the context it receives.
fn demo_response(request: &GenerationRequest) -> std::result::Result<String, GenerationError> {
    let ctx = &request.context;
    let horizon = ctx["horizon_months"].as_u64().unwrap_or(12);
    let polarity = ctx["polarity"].as_str().unwrap_or("positive");
    let target = ctx["target"].as_str().unwrap_or("the target");
    let cue = if polarity == "negative" { "Crisis" } else { "Growth" };

    let facts: Vec<(String, String)> = ctx["top_facts"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(3)
                .filter_map(|f| Some((f["id"].as_str()?.to_string(), f["content"].as_str()?.to_string())))
                .collect()
        })
        .unwrap_or_default();
    let events: Vec<String> = facts
        .iter()
        .map(|(_, content)| format!("{cue}: {}", content.chars().take(70).collect::<String>()))
        .collect();
    let paths: Vec<String> = ctx["reasoning_paths"]
        .as_array()
        .map(|items| items.iter().filter_map(|p| p["conclusion"].as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    Ok(json!({
        "title": format!("{target}: {polarity} outlook for {horizon} months"),
        "description": if paths.is_empty() {
            format!("No dominant driver for the {polarity} {horizon}-month horizon.")
        } else {
            paths.join(" ")
        },
        "key_events": events,
        "probabilities": {},
        "impacts": {"economy": format!("{cue} pressure on key sectors")},
        "recommendations": [],
        "reasoning": {
            "key_facts_used": facts.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(),
            "key_correlations": [],
        }
    })
    .to_string())
}
