//! dualwrite-migrate CLI - consistency validation and repair for dual-write migrations.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use dualwrite_migrate::core::{Conn, TxBeginner};
use dualwrite_migrate::{
    drivers, ChannelSink, Config, EventSink, FixConsumer, Fixer, LogSink, MigrateError,
    RowEntity, Side, SqlValue, TableSpec, ValidationReport, Validator,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Poll interval for `--continuous` when the config does not set one.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "dualwrite-migrate")]
#[command(about = "Validate and repair data during a dual-write migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test base and target connections
    HealthCheck,

    /// Scan both stores for inconsistencies and log them
    Validate {
        /// Table to validate (must be listed in the config)
        #[arg(long)]
        table: String,

        /// Only check rows updated at or after this value (integer or timestamp)
        #[arg(long)]
        since: Option<String>,

        /// Keep polling for new rows until interrupted
        #[arg(long)]
        continuous: bool,
    },

    /// Converge one row of the non-authoritative store onto the authoritative one
    Fix {
        /// Table containing the row
        #[arg(long)]
        table: String,

        /// Identity of the row
        #[arg(long)]
        id: i64,
    },

    /// Validate and fix every inconsistency found
    Repair {
        /// Table to repair (must be listed in the config)
        #[arg(long)]
        table: String,

        /// Only check rows updated at or after this value (integer or timestamp)
        #[arg(long)]
        since: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| MigrateError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let cancel = setup_signal_handler();

    match cli.command {
        Commands::HealthCheck => health_check(&config, &cancel, cli.output_json).await,
        Commands::Validate {
            table,
            since,
            continuous,
        } => {
            let stores = Stores::connect(&config).await?;
            let fixer = stores.fixer(&cancel, config.table(&table)?.clone()).await?;
            let mut validator = stores
                .validator(fixer.table().clone(), Arc::new(LogSink))
                .with_config(&config.migration.validator);
            if let Some(since) = since {
                validator = validator.with_since(parse_since(&since));
            }
            if continuous {
                let interval = config
                    .migration
                    .validator
                    .sleep_interval()
                    .unwrap_or(DEFAULT_POLL_INTERVAL);
                validator = validator.with_sleep_interval(interval);
            }

            let report = validator.validate(&cancel).await?;
            print_report(&table, &report, cli.output_json)
        }
        Commands::Fix { table, id } => {
            let stores = Stores::connect(&config).await?;
            let fixer = stores.fixer(&cancel, config.table(&table)?.clone()).await?;
            let action = fixer.fix(&cancel, id).await?;

            if cli.output_json {
                let out = json!({ "table": table, "id": id, "action": action });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} id={}: {}", table, id, action.as_str());
            }
            Ok(())
        }
        Commands::Repair { table, since } => {
            let stores = Stores::connect(&config).await?;
            let fixer = stores.fixer(&cancel, config.table(&table)?.clone()).await?;
            let spec = fixer.table().clone();
            let (sink, rx) = ChannelSink::channel(config.migration.validator.batch_size * 2);

            let mut validator = stores
                .validator(spec, Arc::new(sink))
                .with_config(&config.migration.validator);
            if let Some(since) = since {
                validator = validator.with_since(parse_since(&since));
            }
            let consumer = FixConsumer::new().with_fixer(stores.authority, fixer);

            let validate = async {
                let report = validator.validate(&cancel).await;
                // Closing the sink lets the consumer drain and finish.
                drop(validator);
                report
            };
            let (report, stats) = tokio::join!(validate, consumer.run(&cancel, rx));
            let report = report?;

            if cli.output_json {
                let out = json!({ "table": table, "validation": report, "repair": stats });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_report(&table, &report, false)?;
                println!("\nRepair Summary:");
                println!("  Upserted: {}", stats.upserted);
                println!("  Deleted: {}", stats.deleted);
                println!("  Unchanged: {}", stats.unchanged);
                println!("  Failed: {}", stats.failed);
            }

            if stats.failed > 0 {
                return Err(MigrateError::Publish(format!(
                    "{} of {} fixes failed",
                    stats.failed, stats.received
                )));
            }
            Ok(())
        }
    }
}

/// Both stores, oriented by the configured pattern.
struct Stores {
    authority: Side,
    authoritative: Arc<dyn TxBeginner>,
    other: Arc<dyn TxBeginner>,
}

impl Stores {
    async fn connect(config: &Config) -> Result<Self, MigrateError> {
        let (base, target) = tokio::join!(
            drivers::connect(&config.base, "base"),
            drivers::connect(&config.target, "target")
        );
        let (base, target) = (base?, target?);

        let authority = config.migration.pattern.primary();
        info!(
            "Pattern {}: {} is authoritative",
            config.migration.pattern, authority
        );
        Ok(match authority {
            Side::Base => Self {
                authority,
                authoritative: base,
                other: target,
            },
            Side::Target => Self {
                authority,
                authoritative: target,
                other: base,
            },
        })
    }

    fn conns(&self) -> (Arc<dyn Conn>, Arc<dyn Conn>) {
        let from: Arc<dyn Conn> = Arc::new(Arc::clone(&self.authoritative));
        let to: Arc<dyn Conn> = Arc::new(Arc::clone(&self.other));
        (from, to)
    }

    /// Fixer with the configured columns, or every column of the table.
    async fn fixer(&self, cancel: &CancellationToken, spec: TableSpec) -> Result<Fixer, MigrateError> {
        let (from, to) = self.conns();
        if spec.columns.is_empty() {
            Fixer::introspect(cancel, from, to, spec).await
        } else {
            Fixer::new(from, to, spec)
        }
    }

    fn validator(
        &self,
        spec: TableSpec,
        sink: Arc<dyn EventSink>,
    ) -> Validator<RowEntity> {
        let (from, to) = self.conns();
        Validator::new(from, to, sink, spec).with_authority(self.authority)
    }
}

async fn health_check(
    config: &Config,
    cancel: &CancellationToken,
    output_json: bool,
) -> Result<(), MigrateError> {
    let (base, target) = tokio::join!(
        probe(config, "base", cancel),
        probe(config, "target", cancel)
    );
    let healthy = base.1.is_none() && target.1.is_none();

    if output_json {
        let out = json!({
            "base_connected": base.1.is_none(),
            "base_latency_ms": base.0,
            "base_error": base.1,
            "target_connected": target.1.is_none(),
            "target_latency_ms": target.0,
            "target_error": target.1,
            "healthy": healthy,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Health Check Results:");
        for (label, store, result) in [
            ("Base", &config.base, &base),
            ("Target", &config.target, &target),
        ] {
            println!(
                "  {} ({}): {} ({}ms)",
                label,
                store.describe(),
                if result.1.is_none() { "OK" } else { "FAILED" },
                result.0
            );
            if let Some(ref err) = result.1 {
                println!("    Error: {}", err);
            }
        }
        println!(
            "\n  Overall: {}",
            if healthy { "HEALTHY" } else { "UNHEALTHY" }
        );
    }

    if !healthy {
        return Err(MigrateError::pool("health check failed", "connecting to stores"));
    }
    Ok(())
}

/// Connect and ping one store, returning latency and any error.
async fn probe(config: &Config, side: &str, cancel: &CancellationToken) -> (u64, Option<String>) {
    let store = if side == "base" { &config.base } else { &config.target };
    let start = Instant::now();
    let result = match drivers::connect(store, side).await {
        Ok(pool) => pool.ping(cancel).await,
        Err(e) => Err(e),
    };
    (start.elapsed().as_millis() as u64, result.err().map(|e| e.to_string()))
}

fn print_report(table: &str, report: &ValidationReport, output_json: bool) -> Result<(), MigrateError> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let status = if report.is_consistent() {
        "✓ Consistent"
    } else {
        "✗ Differs"
    };
    println!("\nValidation Summary: {} {}", status, table);
    println!("  Rows checked (forward): {}", report.forward.rows_scanned);
    println!("  Rows checked (reverse): {}", report.reverse.rows_scanned);
    println!("  Missing in target: {}", report.forward.target_missing);
    println!("  Not equal: {}", report.forward.not_equal);
    println!("  Missing in base: {}", report.reverse.base_missing);
    let skipped = report.forward.pages_skipped + report.reverse.pages_skipped;
    if skipped > 0 {
        println!("  Pages skipped after read errors: {}", skipped);
    }
    Ok(())
}

/// Interpret `--since` as an integer, a timestamp, or plain text.
fn parse_since(raw: &str) -> SqlValue {
    if let Ok(n) = raw.parse::<i64>() {
        return SqlValue::I64(n);
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return SqlValue::DateTime(ts);
        }
    }
    SqlValue::Text(raw.to_string())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Shutting down...", name);
                    token.cancel();
                });
            }
            Err(e) => eprintln!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Shutting down...");
            token.cancel();
        }
    });

    cancel
}
