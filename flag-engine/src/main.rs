use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use envconfig::Envconfig;
use tracing::{info, warn};

use flag_engine::config::Config;
use flag_engine::flag_definitions::FlagDefinition;
use flag_engine::flag_store::InMemoryFlagStore;
use flag_engine::snapshot::TransportSnapshot;
use flag_engine::{EvaluationContext, ResolveOptions, Resolver};

#[derive(Parser)]
#[command(version, about = "Resolve feature flags for one evaluation context", long_about = None)]
struct Cli {
    /// Stable subject identifier. Omit to evaluate as an anonymous caller
    #[arg(long)]
    subject: Option<String>,

    #[arg(long)]
    role: Option<String>,

    #[arg(long)]
    country: Option<String>,

    /// Variant to force for experiment assignment
    #[arg(long)]
    experiment: Option<String>,

    /// Encoded transport snapshot handed down by an upstream tier
    #[arg(long)]
    snapshot: Option<String>,

    /// Read flag definitions from a JSON file instead of redis
    #[arg(long, env = "FLAG_DEFINITIONS_FILE")]
    definitions: Option<PathBuf>,

    /// Print the encoded transport snapshot instead of the resolution
    #[arg(long, default_value = "false")]
    emit_snapshot: bool,

    /// Flag keys to resolve
    #[arg(required = true)]
    keys: Vec<String>,
}

impl Cli {
    fn context(&self) -> EvaluationContext {
        EvaluationContext {
            subject_id: self.subject.clone(),
            role: self.role.clone(),
            country: self.country.clone(),
            experiment: self.experiment.clone(),
        }
    }

    fn options(&self) -> ResolveOptions {
        let Some(raw) = self.snapshot.as_deref() else {
            return ResolveOptions::default();
        };
        match TransportSnapshot::decode(raw) {
            Ok(snapshot) => ResolveOptions::default().with_snapshot(snapshot),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable transport snapshot");
                ResolveOptions::default()
            }
        }
    }
}

fn build_resolver(config: &Config, definitions: Option<&Path>) -> Result<Resolver> {
    let Some(path) = definitions else {
        return Ok(Resolver::from_config(config)?);
    };

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read flag definitions from {}", path.display()))?;
    let flags: Vec<FlagDefinition> =
        serde_json::from_str(&raw).context("flag definitions file is not a list of flags")?;
    info!(count = flags.len(), "loaded flag definitions from file");

    Ok(Resolver::from_config_with_store(
        config,
        Arc::new(InMemoryFlagStore::new(flags)),
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::WARN.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let cli = Cli::parse();
    let config = Config::init_from_env().context("invalid configuration")?;
    let resolver = build_resolver(&config, cli.definitions.as_deref())?;

    let resolution = resolver
        .resolve_detailed(&cli.context(), &cli.keys, cli.options())
        .await?;

    if cli.emit_snapshot {
        println!("{}", resolution.to_snapshot().encode()?);
    } else {
        println!("{}", serde_json::to_string_pretty(&resolution)?);
    }

    Ok(())
}
