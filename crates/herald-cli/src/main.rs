//! Command-line interface for the Herald alert engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use herald_engine::{
    Alert, AlertEngine, ChannelRegistry, ConsoleChannel, EngineStats, HeraldConfig, ProcessOutcome,
    RoutingRule,
};

/// Environment variable enabling JSON log output.
const LOG_JSON_ENV: &str = "HERALD_LOG_JSON";

/// Herald - deduplicating alert router with rate limits and escalation.
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Check the configuration and report what it defines.
    Validate,
    /// List the effective routing rules.
    Rules {
        /// Print rules as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Submit alerts from a JSON file (one alert object or an array).
    Submit {
        /// Path to the alerts file.
        #[arg(required = true)]
        path: PathBuf,
        /// Run an escalation scan after submitting.
        #[arg(long)]
        scan: bool,
    },
    /// Read newline-delimited JSON alerts from stdin until EOF or Ctrl-C.
    Run,
}

/// Per-alert line printed by `submit` and `run`.
#[derive(Serialize)]
struct AlertReport<'a> {
    alert_id: &'a str,
    #[serde(flatten)]
    outcome: &'a ProcessOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Validate => validate(args.config.as_deref()).await,
        Command::Rules { json } => list_rules(args.config.as_deref(), json),
        Command::Submit { path, scan } => submit(args.config.as_deref(), &path, scan).await,
        Command::Run => run(args.config.as_deref()).await,
    }
}

/// Logs go to stderr so stdout stays machine-readable.
fn init_logging(verbose: bool) {
    let json_logging = std::env::var(LOG_JSON_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "herald=debug,herald_engine=debug" } else { "herald=info,herald_engine=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

fn load_config(path: Option<&Path>) -> Result<HeraldConfig> {
    match path {
        Some(path) => HeraldConfig::from_file(path).with_context(|| format!("Failed to load {}", path.display())),
        None => {
            let mut config = HeraldConfig::default();
            config.engine.apply_env_overrides();
            config.engine.validate()?;
            Ok(config)
        }
    }
}

/// Build the channel registry. Without channel declarations every channel
/// named by a rule is bound to a console channel.
async fn build_channels(config: &HeraldConfig, rules: &[RoutingRule]) -> Result<Arc<ChannelRegistry>> {
    if !config.channels.is_empty() {
        return Ok(config.build_channels().await?);
    }

    let registry = Arc::new(ChannelRegistry::new());
    for rule in rules {
        let names = rule
            .channels
            .iter()
            .chain(rule.escalation.iter().flat_map(|e| e.escalation_channels.iter()));
        for name in names {
            if registry.get(name).await.is_none() {
                registry.register(Arc::new(ConsoleChannel::new(name.clone()))).await;
            }
        }
    }
    Ok(registry)
}

async fn build_engine(config_path: Option<&Path>) -> Result<Arc<AlertEngine>> {
    let config = load_config(config_path)?;
    let rules = config.effective_rules();
    let channels = build_channels(&config, &rules).await?;

    let engine = AlertEngine::new(config.engine.clone(), channels);
    engine.load_rules(rules).await?;
    Ok(Arc::new(engine))
}

async fn validate(config_path: Option<&Path>) -> Result<()> {
    let engine = build_engine(config_path).await?;
    let rules = engine.rules().await;
    let channels = engine.channels().list_names().await;

    for rule in &rules {
        for name in rule.channels.iter().filter(|n| !channels.contains(*n)) {
            tracing::warn!(rule_id = %rule.id, channel = %name, "Rule references an unregistered channel");
        }
    }

    println!(
        "Configuration OK: {} channels, {} rules ({} enabled)",
        channels.len(),
        rules.len(),
        rules.iter().filter(|r| r.enabled).count()
    );
    Ok(())
}

fn list_rules(config_path: Option<&Path>, json: bool) -> Result<()> {
    let rules = load_config(config_path)?.effective_rules();

    if json {
        println!("{}", serde_json::to_string_pretty(&rules)?);
        return Ok(());
    }

    for rule in &rules {
        let mut flags = Vec::new();
        if !rule.enabled {
            flags.push("disabled");
        }
        if rule.active_rate_limit().is_some() {
            flags.push("rate-limited");
        }
        if rule.active_escalation().is_some() {
            flags.push("escalates");
        }
        println!(
            "{:<22} {:<12} >= {:<10} -> {} {}",
            rule.id,
            rule.category.as_str(),
            rule.priority.as_str(),
            rule.channels.join(","),
            if flags.is_empty() { String::new() } else { format!("[{}]", flags.join(", ")) }
        );
    }
    Ok(())
}

fn read_alerts(path: &Path) -> Result<Vec<Alert>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))?;

    let values = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| Alert::from_value(v).with_context(|| format!("Alert #{} is invalid", i + 1)))
        .collect()
}

fn print_outcome(alert_id: &str, outcome: &ProcessOutcome) -> Result<()> {
    println!("{}", serde_json::to_string(&AlertReport { alert_id, outcome })?);
    Ok(())
}

fn print_stats(stats: &EngineStats) -> Result<()> {
    println!("{}", serde_json::to_string(&serde_json::json!({ "stats": stats }))?);
    Ok(())
}

async fn submit(config_path: Option<&Path>, path: &Path, scan: bool) -> Result<()> {
    let alerts = read_alerts(path)?;
    let engine = build_engine(config_path).await?;

    for alert in alerts {
        let alert_id = alert.id.clone();
        let outcome = engine.process(alert).await?;
        print_outcome(&alert_id, &outcome)?;
    }

    if scan {
        let escalated = engine.run_escalation_scan().await;
        tracing::info!(deliveries = escalated.len(), "Escalation scan finished");
    }

    print_stats(&engine.get_stats().await)
}

async fn run(config_path: Option<&Path>) -> Result<()> {
    let engine = build_engine(config_path).await?;
    engine.start().await;
    tracing::info!("Reading alerts from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                None
            }
        };

        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let alert = match serde_json::from_str::<serde_json::Value>(line)
            .map_err(anyhow::Error::from)
            .and_then(|v| Alert::from_value(v).map_err(anyhow::Error::from))
        {
            Ok(alert) => alert,
            Err(e) => {
                tracing::warn!("Skipping invalid alert: {}", e);
                continue;
            }
        };

        let alert_id = alert.id.clone();
        match engine.process(alert).await {
            Ok(outcome) => print_outcome(&alert_id, &outcome)?,
            Err(e) => tracing::warn!(alert_id = %alert_id, "Alert rejected: {}", e),
        }
    }

    engine.shutdown().await;
    print_stats(&engine.get_stats().await)
}
