use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use urlfrontier::config::Config;
use urlfrontier::{Frontier, RuleSet, UrlRecord};

#[derive(Parser)]
#[command(
    name = "urlfrontier",
    version,
    about = "Partitioned URL frontier cache backed by a SQLite catalog",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to URLFRONTIER_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

/// Rule set options shared by `next` and `fingerprint`
#[derive(Args)]
struct RuleArgs {
    /// Only serve URLs from this domain (repeatable)
    #[arg(long = "require", value_name = "DOMAIN")]
    required: Vec<String>,

    /// Never serve URLs from this domain (repeatable)
    #[arg(long = "block", value_name = "DOMAIN")]
    blocked: Vec<String>,

    /// Sort field, prefix with '-' for descending (repeatable)
    #[arg(long = "sort", value_name = "FIELD", allow_hyphen_values = true)]
    sort: Vec<String>,
}

impl RuleArgs {
    fn into_rules(self) -> RuleSet {
        let sort = if self.sort.is_empty() {
            vec![urlfrontier::frontier::DEFAULT_SORT_FIELD.to_string()]
        } else {
            self.sort
        };
        RuleSet::new(self.required, self.blocked, sort)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Add or update a URL in the catalog
    Put {
        /// URL to store
        url: String,

        /// Last visit time (RFC 3339)
        #[arg(long)]
        last_visited: Option<DateTime<Utc>>,

        /// Ranking score
        #[arg(long)]
        score: Option<f64>,
    },

    /// Pull URLs through the frontier cache
    Next {
        /// Number of URLs to pull
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        #[command(flatten)]
        rules: RuleArgs,
    },

    /// Print the partition fingerprint of a rule set
    Fingerprint {
        #[command(flatten)]
        rules: RuleArgs,
    },

    /// Count URLs in the catalog
    Count,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    // Initialize tracing/logging
    let log_format = if cli.log_format == "text" {
        config.logging.format.clone()
    } else {
        cli.log_format.clone()
    };
    setup_tracing(&log_format, cli.verbose, &config.logging.level)?;

    if let Err(e) = urlfrontier::metrics::init_metrics() {
        tracing::warn!(error = %e, "Failed to initialize metrics");
    }

    match cli.command {
        Commands::Put {
            url,
            last_visited,
            score,
        } => {
            tracing::info!(url = %url, "Starting put command");
            put(&config, url, last_visited, score).await?;
        }

        Commands::Next { count, rules } => {
            let rules = rules.into_rules();
            tracing::info!(
                count = %count,
                fingerprint = %rules.fingerprint().short(),
                "Starting next command"
            );
            next(&config, rules, count).await?;
        }

        Commands::Fingerprint { rules } => {
            let rules = rules.into_rules();
            rules.validate()?;
            println!("{}", rules.fingerprint());
        }

        Commands::Count => {
            let frontier = Frontier::from_config(&config)?;
            let total = frontier.store().count().await?;
            println!("{total}");
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool, level: &str) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("urlfrontier=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("urlfrontier={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}

async fn put(
    config: &Config,
    url: String,
    last_visited: Option<DateTime<Utc>>,
    score: Option<f64>,
) -> Result<()> {
    urlfrontier::utils::extract_domain(&url).context("Not an absolute URL")?;

    let mut record = UrlRecord::new(url);
    if let Some(at) = last_visited {
        record = record.with_last_visited(at);
    }
    if let Some(score) = score {
        record = record.with_score(score);
    }

    let frontier = Frontier::from_config(config)?;
    let stored = frontier.put_url(&record).await?;
    println!("{}", serde_json::to_string_pretty(&stored)?);
    Ok(())
}

async fn next(config: &Config, rules: RuleSet, count: usize) -> Result<()> {
    let frontier = Frontier::from_config(config)?;
    frontier.start_cache_process(&rules).await?;

    let mut served = 0;
    while served < count {
        match frontier.next_url(&rules).await? {
            Some(record) => {
                println!("{}", record.url);
                served += 1;
            }
            None => {
                tracing::info!(served, "Frontier exhausted");
                break;
            }
        }
    }

    frontier.terminate_cache_process(&rules).await;
    frontier.shutdown().await;
    Ok(())
}
