use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use omnia_domain::config::{Config, ConfigSeverity};
use omnia_evals::cost::Pricing;
use omnia_evals::{CostCalculator, EvalDispatcher};
use omnia_packs::{FsPackSource, PackLoader};
use omnia_session_client::RestSessionClient;
use omnia_worker::broker::RedisStreamBroker;
use omnia_worker::budget::BudgetTracker;
use omnia_worker::cli::{Cli, Command, ConfigCommand};
use omnia_worker::metrics::MetricsRecorder;
use omnia_worker::webhook::WebhookDispatcher;
use omnia_worker::{server, EvalWorker, WorkerHandles};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_flag = cli.config.as_deref();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, path) = omnia_worker::cli::load_config(config_flag)?;
            tracing::info!(config = %path.display(), "configuration loaded");
            run_worker(config).await
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = omnia_worker::cli::load_config(config_flag)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = omnia_worker::cli::load_config(config_flag)?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                eprintln!("{}: configuration invalid", path.display());
                std::process::exit(1);
            }
            println!("{}: configuration ok", path.display());
            Ok(())
        }
        Some(Command::Version) => {
            println!("omnia-eval-worker {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON tracing (only for the `serve` command).
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,omnia_worker=debug")),
        )
        .json()
        .init();
}

async fn run_worker(config: Config) -> anyhow::Result<()> {
    tracing::info!(namespace = %config.worker.namespace, "omnia eval worker starting");

    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Metrics ──────────────────────────────────────────────────────
    let metrics = Arc::new(MetricsRecorder::new()?);
    metrics.pre_touch(&config.broker.streams);

    // ── Session service ──────────────────────────────────────────────
    let session_api = Arc::new(RestSessionClient::new(&config.session_service)?);
    tracing::info!(base_url = %config.session_service.base_url, "session client ready");

    // ── Pack loader ──────────────────────────────────────────────────
    let pack_loader = if config.packs.enabled {
        let source = Arc::new(FsPackSource::new(config.packs.path.clone()));
        tracing::info!(path = %config.packs.path.display(), "pack loader ready");
        Some(Arc::new(PackLoader::new(source)))
    } else {
        tracing::warn!("pack loading disabled, worker will track sessions but run no evals");
        None
    };

    // ── Eval execution ───────────────────────────────────────────────
    // Judge backends are deployed as separate services; this binary runs
    // deterministic evals only, and llm_judge definitions surface a
    // per-eval config error until an executor is wired in.
    let dispatcher = Arc::new(EvalDispatcher::new(None));

    let cost = Arc::new(CostCalculator::new());
    for entry in &config.pricing {
        cost.register_pricing(&entry.provider, &entry.model, Pricing {
            input_per_1k: entry.input_per_1k,
            output_per_1k: entry.output_per_1k,
        });
    }

    let budget = Arc::new(BudgetTracker::new());
    budget.set_budget(&config.worker.namespace, config.budget.usd_limit);

    let webhooks = if config.webhooks.is_empty() {
        None
    } else {
        tracing::info!(configs = config.webhooks.len(), "webhook alerting enabled");
        Some(Arc::new(WebhookDispatcher::new(config.webhooks.clone())))
    };

    // ── Stream broker ────────────────────────────────────────────────
    let broker = Arc::new(RedisStreamBroker::connect(&config.broker.url).await?);
    tracing::info!(url = %config.broker.url, "stream broker connected");

    // ── Worker ───────────────────────────────────────────────────────
    let worker = EvalWorker::new(
        WorkerHandles {
            broker,
            session_api,
            pack_loader,
            dispatcher,
            budget,
            cost,
            webhooks,
            metrics: metrics.clone(),
        },
        &config,
    );

    let cancel = CancellationToken::new();

    // Metrics/health server.
    let server_cancel = cancel.clone();
    let server_config = config.server.clone();
    let server_metrics = metrics.clone();
    let server_task = tokio::spawn(async move {
        if let Err(e) = server::serve(&server_config, server_metrics, server_cancel).await {
            tracing::error!(error = %e, "metrics server exited");
        }
    });

    // Shutdown signals.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_cancel.cancel();
    });

    worker.run(cancel).await?;
    let _ = server_task.await;
    tracing::info!("omnia eval worker stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("installing SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
