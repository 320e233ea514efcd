//! Posture Audit - Standalone Binary
//!
//! Evaluates an account inventory snapshot against the compliance rule
//! catalogue and prints the verdicts as JSON on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use posture_engine::audit::{Auditor, SnapshotProvider, VerdictRecord};
use posture_engine::config::AuditConfig;

/// Posture Audit - Cloud compliance scanner
#[derive(Parser, Debug)]
#[command(name = "posture-audit", version, about)]
struct Args {
    /// Inventory snapshot to scan (JSON)
    #[arg(long, env = "POSTURE_INVENTORY")]
    inventory: PathBuf,

    /// Home region the scan is bound to
    #[arg(long)]
    region: Option<String>,

    /// Maximum regions or buckets evaluated concurrently
    #[arg(long)]
    concurrency: Option<usize>,

    /// Abort the scan after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Keep evaluating past failing rules and report them
    #[arg(long, default_value = "false")]
    partial: bool,

    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    let config = build_config(&args)?;
    let provider = SnapshotProvider::from_path(&args.inventory)
        .with_context(|| format!("Failed to load inventory {}", args.inventory.display()))?
        .with_primary_region(&config.primary_region);

    info!(
        inventory = %args.inventory.display(),
        home = %config.home_region,
        concurrency = config.max_concurrency,
        "Starting posture audit"
    );

    let auditor = Auditor::new(Arc::new(provider), config);

    if args.partial {
        let report = tokio::select! {
            result = auditor.scan_partial() => result.context("Partial scan failed")?,
            _ = tokio::signal::ctrl_c() => anyhow::bail!("Scan cancelled"),
        };
        for failure in &report.failures {
            warn!(rule = %failure.rule, error = %failure.error, "Rule not evaluated");
        }
        info!("{}", report.summary());
        print_json(&report)?;
        return Ok(());
    }

    let report = auditor
        .scan_until(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Scan failed")?;

    info!(
        scan_id = %report.scan_id,
        compliant = report.compliant_count(),
        non_compliant = report.non_compliant_count(),
        "Scan finished"
    );

    let records: Vec<VerdictRecord> = report.verdicts.into_iter().map(Into::into).collect();
    print_json(&records)
}

/// Environment configuration with command line flags on top
fn build_config(args: &Args) -> Result<AuditConfig> {
    let mut config = AuditConfig::from_env().context("Invalid environment configuration")?;

    if let Some(region) = &args.region {
        config = config.with_home_region(region);
    }
    if let Some(concurrency) = args.concurrency {
        config = config.with_max_concurrency(concurrency);
    }
    if let Some(secs) = args.timeout_secs {
        config = config.with_scan_timeout(Duration::from_secs(secs));
    }

    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    println!("{json}");
    Ok(())
}
