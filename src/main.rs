use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{ArgGroup, Parser, Subcommand};
use metricwatch::config::AppConfig;
use metricwatch::detect::alert::Alert;
use metricwatch::detect::engine::{ActionOutcome, DetectionEngine, DetectionReport};
use metricwatch::detect::AlertStatus;
use metricwatch::storage::records::SqliteSeriesProvider;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "metricwatch",
    about = "Anomaly detection and alerting for daily business metrics",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, global = true, env = "METRICWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path from the config
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server)
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Store one daily metric record
    Record {
        #[arg(long)]
        metric: String,

        /// Record date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,

        #[arg(long, allow_negative_numbers = true)]
        amount: f64,
    },

    /// Run anomaly detection for one metric or all of them
    #[command(group(ArgGroup::new("target").required(true).args(["metric", "all"])))]
    Detect {
        #[arg(long)]
        metric: Option<String>,

        /// Run for every metric with records
        #[arg(long)]
        all: bool,

        #[arg(long, default_value = "90")]
        lookback_days: u32,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Inspect and manage alerts
    Alerts {
        #[command(subcommand)]
        action: AlertsAction,
    },

    /// Alert counts by severity and the most recent alerts
    Summary {
        #[arg(long, default_value = "7", value_parser = clap::value_parser!(i64).range(0..))]
        recent_days: i64,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum AlertsAction {
    /// List alerts, newest first
    List {
        #[arg(long)]
        metric: Option<String>,

        /// open, acknowledged or resolved
        #[arg(long)]
        status: Option<AlertStatus>,

        #[arg(long, default_value = "30", value_parser = clap::value_parser!(i64).range(0..))]
        since_days: i64,

        #[arg(long)]
        json: bool,
    },

    /// Show one alert
    Show {
        id: Uuid,

        #[arg(long)]
        json: bool,
    },

    /// Acknowledge an alert
    Ack {
        id: Uuid,

        #[arg(long)]
        assigned_to: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Resolve an alert
    Resolve {
        id: Uuid,

        #[arg(long)]
        resolution: String,
    },
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_alert_table(alerts: &[Alert]) {
    if alerts.is_empty() {
        println!("No alerts found.");
        return;
    }
    println!(
        "{:<36} | {:<20} | {:<10} | {:<8} | {:<12} | {:>12} | Method",
        "ID", "Metric", "Date", "Severity", "Status", "Value"
    );
    println!(
        "{:-<36}-|-{:-<20}-|-{:-<10}-|-{:-<8}-|-{:-<12}-|-{:-<12}-|-{:-<18}",
        "", "", "", "", "", "", ""
    );
    for a in alerts {
        println!(
            "{:<36} | {:<20} | {:<10} | {:<8} | {:<12} | {:>12.2} | {}",
            a.id,
            a.metric_name,
            a.timestamp.date_naive(),
            a.severity,
            a.status,
            a.metric_value,
            a.detection_method
        );
    }
}

fn print_report(report: &DetectionReport) {
    println!("\n=== Detection: {} ===", report.metric_name);
    if let Some(reason) = &report.skipped_reason {
        println!("Skipped: {}", reason);
        return;
    }
    let methods: Vec<String> = report.methods_used.iter().map(|m| m.to_string()).collect();
    println!("Data points:  {}", report.data_points);
    println!("Methods:      {}", methods.join(", "));
    println!("Detected:     {}", report.anomalies_detected);
    println!("Saved:        {}", report.anomalies_saved);
    if !report.anomalies.is_empty() {
        println!();
        print_alert_table(&report.anomalies);
    }
}

fn finish_action(outcome: ActionOutcome) -> Result<()> {
    if outcome.success {
        println!("{}", outcome.message);
        Ok(())
    } else {
        match outcome.error {
            Some(e) => bail!("{}: {}", outcome.message, e),
            None => bail!("{}", outcome.message),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.storage.db_path = db;
    }
    init_tracing(&config);

    let open_engine = |config: &AppConfig| -> Result<DetectionEngine> {
        let pool = metricwatch::storage::open_pool(&config.storage.db_path)?;
        Ok(DetectionEngine::from_pool(pool, config))
    };

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting metricwatch daemon");
            metricwatch::serve(config).await?;
        }
        Commands::Record { metric, date, amount } => {
            let pool = metricwatch::storage::open_pool(&config.storage.db_path)?;
            SqliteSeriesProvider::new(pool).record(&metric, date, amount)?;
            println!("Recorded {} = {} on {}.", metric, amount, date);
        }
        Commands::Detect {
            metric,
            all,
            lookback_days,
            json,
        } => {
            let engine = open_engine(&config)?;
            if all {
                let batch = engine.run_detection_all(lookback_days).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&batch)?);
                } else {
                    for report in &batch.reports {
                        print_report(report);
                    }
                    for failure in &batch.failures {
                        println!("\n{}: FAILED ({})", failure.metric_name, failure.error);
                    }
                    println!();
                }
            } else if let Some(metric) = metric {
                let report = engine.run_detection(&metric, lookback_days).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else {
                    print_report(&report);
                    println!();
                }
            }
        }
        Commands::Alerts { action } => {
            let engine = open_engine(&config)?;
            match action {
                AlertsAction::List {
                    metric,
                    status,
                    since_days,
                    json,
                } => {
                    let alerts = engine.list_alerts(metric, status, since_days).await?;
                    if json {
                        println!("{}", serde_json::to_string_pretty(&alerts)?);
                    } else {
                        print_alert_table(&alerts);
                    }
                }
                AlertsAction::Show { id, json } => {
                    let Some(alert) = engine.get_alert(id).await? else {
                        bail!("Alert {} not found", id);
                    };
                    if json {
                        println!("{}", serde_json::to_string_pretty(&alert)?);
                    } else {
                        println!("ID:          {}", alert.id);
                        println!("Metric:      {}", alert.metric_name);
                        println!("Date:        {}", alert.timestamp.date_naive());
                        println!("Value:       {:.2}", alert.metric_value);
                        if let (Some(lo), Some(hi)) = (alert.expected_range_min, alert.expected_range_max) {
                            println!("Expected:    {:.2} .. {:.2}", lo, hi);
                        }
                        println!("Severity:    {}", alert.severity);
                        println!("Status:      {}", alert.status);
                        println!("Method:      {}", alert.detection_method);
                        println!("Assigned to: {}", alert.assigned_to.as_deref().unwrap_or("-"));
                        println!("Notes:");
                        for line in alert.notes.lines() {
                            println!("  {}", line);
                        }
                    }
                }
                AlertsAction::Ack {
                    id,
                    assigned_to,
                    notes,
                } => {
                    finish_action(engine.acknowledge_alert(id, assigned_to, notes).await)?;
                }
                AlertsAction::Resolve { id, resolution } => {
                    finish_action(engine.resolve_alert(id, resolution).await)?;
                }
            }
        }
        Commands::Summary { recent_days, json } => {
            let engine = open_engine(&config)?;
            let summary = engine.get_dashboard_summary(recent_days).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\n=== Alert Summary ({} total) ===", summary.total_count);
                println!(
                    "{:<10} | {:>6} | {:>6} | {:>12} | {:>8}",
                    "Severity", "Total", "Open", "Acknowledged", "Resolved"
                );
                println!("{:-<10}-|-{:-<6}-|-{:-<6}-|-{:-<12}-|-{:-<8}", "", "", "", "", "");
                for (severity, c) in summary.severity_counts.iter().rev() {
                    println!(
                        "{:<10} | {:>6} | {:>6} | {:>12} | {:>8}",
                        severity, c.total, c.open, c.acknowledged, c.resolved
                    );
                }
                println!("\nRecent ({} days):", recent_days);
                print_alert_table(&summary.recent);
                println!();
            }
        }
    }

    Ok(())
}
