use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};

use riskmap::heatmap::validate_request;
use riskmap::storage::{Fixture, SqliteStore};
use riskmap::{DashboardService, RiskmapConfig, TimeSeriesRequest};

#[derive(Parser)]
#[command(
    name = "riskmap",
    about = "Deployment risk heat maps and risk-annotated metric time series",
    version,
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $RISKMAP_CONFIG, then /etc/riskmap/riskmap.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database, overriding storage.database_path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Risk heat map of a configuration over a time range
    HeatMap {
        #[arg(long)]
        config_id: String,

        /// Range start (epoch millis or RFC 3339)
        #[arg(long, value_parser = parse_timestamp)]
        start: i64,

        /// Range end (epoch millis or RFC 3339)
        #[arg(long, value_parser = parse_timestamp)]
        end: i64,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Risk-annotated metric time series, ranked by risk
    TimeSeries {
        #[arg(long)]
        config_id: String,

        #[arg(long, value_parser = parse_timestamp)]
        start: i64,

        #[arg(long, value_parser = parse_timestamp)]
        end: i64,

        /// Earliest sample to include (defaults to --start)
        #[arg(long, value_parser = parse_timestamp)]
        history_start: Option<i64>,

        /// Risks at or before this instant only count as history (defaults to --start)
        #[arg(long, value_parser = parse_timestamp)]
        risk_cutoff: Option<i64>,

        /// Restrict collection to one tag
        #[arg(long)]
        tag: Option<String>,

        /// Keep only these transactions (repeatable)
        #[arg(long = "transaction")]
        transactions: Vec<String>,

        /// Keep only these metrics (repeatable)
        #[arg(long = "metric")]
        metrics: Vec<String>,

        #[arg(long, default_value = "0")]
        offset: usize,

        #[arg(long, default_value = "10")]
        page_size: usize,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Show the heat map resolution picked for a range
    Resolution {
        #[arg(long, value_parser = parse_timestamp)]
        start: i64,

        #[arg(long, value_parser = parse_timestamp)]
        end: i64,
    },

    /// Load a JSON fixture of records, samples and summaries into the database
    Import {
        #[arg(long)]
        file: PathBuf,
    },
}

/// Accept epoch millis or an RFC 3339 timestamp.
fn parse_timestamp(raw: &str) -> Result<i64, String> {
    if let Ok(millis) = raw.parse::<i64>() {
        return Ok(millis);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| format!("expected epoch millis or RFC 3339, got '{}': {}", raw, e))
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

fn init_tracing(default_level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RiskmapConfig::load(path)?,
        None => RiskmapConfig::load_or_default(),
    };
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging.level, cli.json_logs || config.logging.json);

    let db_path = cli.db.clone().unwrap_or_else(|| config.storage.database_path.clone());

    match cli.command {
        Commands::HeatMap {
            config_id,
            start,
            end,
            json,
        } => {
            tracing::info!(%config_id, start, end, "Building heat map");
            let store = Arc::new(SqliteStore::open(&db_path)?);
            let service = DashboardService::new(store, &config);
            let units = service.build_heat_map(&config_id, start, end).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&units)?);
            } else {
                println!("\nRisk heat map for {}", config_id);
                println!("{:<24} | {:<24} | {:<8} | Transactions", "Start", "End", "Risk");
                println!("{:-<24}-|-{:-<24}-|-{:-<8}-|-{:-<30}", "", "", "", "");
                for unit in &units {
                    let transactions: Vec<String> = unit
                        .transaction_scores
                        .iter()
                        .map(|(name, risk)| format!("{}={}", name, risk))
                        .collect();
                    println!(
                        "{:<24} | {:<24} | {:<8} | {}",
                        format_timestamp(unit.start_time),
                        format_timestamp(unit.end_time),
                        unit.overall_score.to_string(),
                        transactions.join(", ")
                    );
                }
                println!("{} units", units.len());
            }
        }
        Commands::TimeSeries {
            config_id,
            start,
            end,
            history_start,
            risk_cutoff,
            tag,
            transactions,
            metrics,
            offset,
            page_size,
            json,
        } => {
            tracing::info!(%config_id, start, end, ?tag, "Building annotated time series");
            let store = Arc::new(SqliteStore::open(&db_path)?);
            let service = DashboardService::new(store, &config);
            let request = TimeSeriesRequest {
                config_id: config_id.clone(),
                start,
                end,
                history_start,
                risk_cutoff,
                tag,
                transactions: transactions.into_iter().collect::<BTreeSet<_>>(),
                metrics: metrics.into_iter().collect::<BTreeSet<_>>(),
            };
            let page = service.time_series_page(&request, offset, page_size).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else if page.rows.is_empty() {
                println!("No time series for {} in the requested range.", config_id);
            } else {
                println!(
                    "\nShowing {} of {} transactions for {}",
                    page.rows.len(),
                    page.total,
                    config_id
                );
                println!("{:<16} | {:<24} | {:<20} | {:<12} | {:<8} | Points", "Tag", "Transaction", "Metric", "Type", "Risk");
                println!("{:-<16}-|-{:-<24}-|-{:-<20}-|-{:-<12}-|-{:-<8}-|-{:-<10}", "", "", "", "", "", "");
                for row in &page.rows {
                    for metric in &row.metrics {
                        let filled = metric.points.iter().filter(|p| p.value.is_some()).count();
                        println!(
                            "{:<16} | {:<24} | {:<20} | {:<12} | {:<8} | {}/{}",
                            row.tag,
                            row.transaction,
                            metric.metric_name,
                            metric.metric_type,
                            metric.risk.to_string(),
                            filled,
                            metric.points.len()
                        );
                    }
                }
            }
        }
        Commands::Resolution { start, end } => {
            let interval = config.analysis.poll_interval_minutes;
            let resolution = validate_request(start, end, interval)?;
            println!("Tier:            {}", resolution.tier);
            println!("Unit duration:   {} min", resolution.unit_duration_minutes);
            println!("Events per unit: {}", resolution.events_per_unit);
        }
        Commands::Import { file } => {
            tracing::info!(file = %file.display(), db = %db_path.display(), "Importing fixture");
            let fixture = Fixture::from_path(&file)?;
            let store = SqliteStore::open(&db_path)?;
            let counts = store.import_fixture(&fixture)?;
            println!(
                "Imported {} records, {} samples, {} summaries, {} metric types.",
                counts.records, counts.samples, counts.summaries, counts.metric_types
            );
        }
    }

    Ok(())
}
