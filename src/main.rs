//! wanpulse CLI - Multi-WAN bandwidth and latency prober.

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use wanpulse::cli::*;
use wanpulse::config::{init_logging, Config};
use wanpulse::error::{Error, Result};
use wanpulse::probe::{SweepConfig, SweepOrchestrator, SweepPolicy, TcpProber};
use wanpulse::scheduler::{LogSink, MultiSink, ResultSink, ScheduleCoordinator};
use wanpulse::types::{dscp_name, table_header, table_separator, Outcome, SweepSummary};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_config = wanpulse::config::LoggingConfig {
        level: cli.log_level.clone(),
        color: !cli.no_color,
        ..Default::default()
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    // Load config if specified
    let config = if let Some(ref path) = cli.config {
        Config::load(path)?
    } else if Config::default_path().exists() {
        Config::load(Config::default_path())?
    } else {
        Config::default()
    };

    // Dispatch command
    match cli.command {
        Commands::Probe(args) => run_probe(args, config).await,
        Commands::Schedule(args) => run_schedule(args, config).await,
        Commands::Paths(args) => run_paths(&args, &config),
        Commands::Config(args) => run_config(&args),
    }
}

fn build_orchestrator(config: &Config, parallel: bool) -> Result<SweepOrchestrator> {
    let specs = config.path_specs()?;
    let prober = Arc::new(TcpProber::new(config.probe.prober.clone()));
    let sweep_config = SweepConfig {
        policy: if parallel {
            SweepPolicy::Parallel
        } else {
            config.probe.policy()
        },
        dialer: config.dialer.clone(),
    };

    SweepOrchestrator::new(specs, prober, sweep_config)
}

/// Cancellation token that fires on Ctrl+C.
fn shutdown_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        trigger.cancel();
    });
    cancel
}

fn print_outcomes(outcomes: &[Outcome]) {
    println!();
    println!("{}", table_header().bright_white().bold());
    println!("{}", table_separator());
    for outcome in outcomes {
        if outcome.is_error() {
            println!("{}", outcome.format_table().red());
        } else {
            println!("{}", outcome.format_table());
        }
    }
    println!("{}", table_separator());

    let summary = SweepSummary::from_outcomes(outcomes);
    println!(
        "  {} paths, {} ok, {} failed | avg {:.2} ms / {:.2} Mbps down / {:.2} Mbps up",
        summary.total,
        summary.succeeded.to_string().green(),
        if summary.failed > 0 {
            summary.failed.to_string().red()
        } else {
            summary.failed.to_string().normal()
        },
        summary.avg_latency_ms,
        summary.avg_download_mbps,
        summary.avg_upload_mbps,
    );
}

/// Run one sweep (or one path) and print the results
async fn run_probe(args: ProbeArgs, config: Config) -> Result<()> {
    let orchestrator = build_orchestrator(&config, args.parallel)?;
    let cancel = shutdown_token();

    let outcomes = if let Some(ref name) = args.path {
        vec![orchestrator.run_by_name(&cancel, name).await?]
    } else {
        match orchestrator.run_all(&cancel).await {
            Ok(outcomes) => outcomes,
            Err(Error::SweepCancelled { completed }) => {
                eprintln!("{} sweep interrupted", "⚠".yellow());
                completed
            }
            Err(e) => return Err(e),
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcomes).map_err(anyhow::Error::from)?
        );
    } else {
        print_outcomes(&outcomes);
    }

    Ok(())
}

/// Run sweeps on the configured schedule until interrupted
async fn run_schedule(args: ScheduleArgs, config: Config) -> Result<()> {
    #[cfg(feature = "metrics")]
    use wanpulse::metrics::{serve_metrics, PathMetrics, PrometheusSink};

    let orchestrator = Arc::new(build_orchestrator(&config, false)?);
    let expression = args
        .schedule
        .unwrap_or_else(|| config.scheduler.schedule.clone());

    let mut sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(LogSink)];
    let metrics_cancel = CancellationToken::new();

    #[cfg(feature = "metrics")]
    let _metrics_server = if config.metrics.enabled {
        let metrics = Arc::new(
            PathMetrics::new().map_err(|e| Error::Config(format!("metrics registry: {e}")))?,
        );
        sinks.push(Arc::new(PrometheusSink(Arc::clone(&metrics))));
        Some((metrics, config.metrics.listen))
    } else {
        None
    };

    let coordinator = Arc::new(
        ScheduleCoordinator::new(&expression, orchestrator, Arc::new(MultiSink(sinks)))?
            .with_sweep_ceiling(config.scheduler.sweep_ceiling),
    );
    coordinator.start()?;

    #[cfg(feature = "metrics")]
    if let Some((metrics, listen)) = _metrics_server {
        let status = Arc::clone(&coordinator);
        let cancel = metrics_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(listen, metrics, status, cancel).await {
                tracing::error!(error = %e, "metrics server failed");
            }
        });
        println!(
            "  {} metrics on {}",
            "●".green(),
            format!("http://{}", config.metrics.listen).cyan()
        );
    }

    println!(
        "  {} schedule {} | next run {}",
        "●".green(),
        expression.bright_white(),
        coordinator
            .status()
            .next_run
            .map_or_else(|| "-".into(), |t| t.to_rfc3339()),
    );

    if args.immediate {
        coordinator.trigger_now();
    }

    println!("{} Scheduler running. Press Ctrl+C to stop.", "●".green());
    let _ = signal::ctrl_c().await;

    println!();
    println!("{} Shutting down...", "→".yellow());
    coordinator.stop().await;
    metrics_cancel.cancel();
    println!("{} Scheduler stopped.", "●".yellow());

    Ok(())
}

/// List configured paths
fn run_paths(args: &PathsArgs, config: &Config) -> Result<()> {
    let specs = config.path_specs()?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&specs).map_err(anyhow::Error::from)?
        );
        return Ok(());
    }

    if specs.is_empty() {
        println!("{} No paths configured.", "○".dimmed());
        return Ok(());
    }

    println!("{}", "Configured Paths:".bright_white().bold());
    for spec in &specs {
        let marker = if spec.enabled {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!(
            "  {} {} | source {} | DSCP {}",
            marker,
            spec.name.bright_white(),
            spec.source.as_deref().unwrap_or("(os default)"),
            dscp_name(spec.dscp).map_or_else(|| spec.dscp.to_string(), String::from),
        );
    }

    Ok(())
}

/// Show example configuration
fn run_config(args: &ConfigArgs) -> Result<()> {
    let config = Config::example();
    let output =
        toml::to_string_pretty(&config).map_err(|e| Error::Config(format!("serialize: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{output}");
    }

    Ok(())
}
