use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use bud_buffer::BufferManager;
use bud_domain::config::{Config, ConfigSeverity};
use bud_memory::{Embedder, Graph, RestEmbedder, RestGraphClient};

use bud_core::attention::Attention;
use bud_core::cli::{self, Cli, Command, ConfigCommand};
use bud_core::context::ContextBuilder;
use bud_core::driver::{SubprocessDriver, TurnDriver};
use bud_core::executive::Executive;
use bud_core::queue::PendingQueue;
use bud_core::reflex::ReflexLog;
use bud_core::state::CoreState;
use bud_core::tracker::SessionTracker;
use bud_core::transport::{ActionSink, InboxWatcher, OutboxWriter};
use bud_core::watchers::{CpuIdleWatcher, SignalWatcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to run when no subcommand is given.
        None | Some(Command::Run) => {
            init_tracing();
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            run_core(Arc::new(config)).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            if !cli::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = cli::load_config(cli.config.as_deref())?;
            cli::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("budcore {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured JSON tracing. `DEBUG=true` raises the default
/// filter; `RUST_LOG` still wins when set.
fn init_tracing() {
    let default = if std::env::var("DEBUG").as_deref() == Ok("true") {
        "debug"
    } else {
        "info,bud_core=debug"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .json()
        .init();
}

/// Wire the core and run the executive until ctrl-c.
async fn run_core(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("budcore starting");

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

    // ── State directory (fail fast when inaccessible) ────────────────
    let state_dir = config.runtime.state_path.clone();
    std::fs::create_dir_all(state_dir.join("queues"))
        .with_context(|| format!("creating state directory {}", state_dir.display()))?;
    std::fs::create_dir_all(state_dir.join("system"))
        .context("creating system directory")?;
    tracing::info!(path = %state_dir.display(), "state directory ready");

    // ── Memory graph client ──────────────────────────────────────────
    let graph: Arc<dyn Graph> =
        Arc::new(RestGraphClient::new(&config.graph).context("creating graph client")?);
    let embedder: Arc<dyn Embedder> =
        Arc::new(RestEmbedder::new(&config.graph).context("creating embedder")?);
    tracing::info!(url = %config.graph.base_url, "memory graph client ready");

    // ── Working memory ───────────────────────────────────────────────
    let buffer = Arc::new(BufferManager::new(config.buffer.clone(), &state_dir));
    if let Err(e) = buffer.load().await {
        tracing::warn!(error = %e, "starting with empty buffers");
    }
    let reflex = Arc::new(ReflexLog::default());

    // ── Scheduling ───────────────────────────────────────────────────
    let (queue, notify) = PendingQueue::new(config.queue.clone(), &state_dir);
    let queue = Arc::new(queue);
    if let Err(e) = queue.load() {
        tracing::warn!(error = %e, "starting with empty pending queue");
    }
    let attention = Arc::new(Attention::new(config.attention.clone()));

    // ── Turn machinery ───────────────────────────────────────────────
    let tracker = Arc::new(
        SessionTracker::new(config.budgets.clone(), &state_dir)
            .context("creating session tracker")?,
    );
    let driver: Arc<dyn TurnDriver> =
        Arc::new(SubprocessDriver::new(config.driver.clone(), &state_dir));
    let builder = Arc::new(ContextBuilder::new(
        graph.clone(),
        embedder.clone(),
        buffer.clone(),
        reflex.clone(),
        attention.clone(),
        config.graph.clone(),
        &state_dir,
        config.runtime.wakeup_instructions.clone(),
    ));

    // ── Effects ──────────────────────────────────────────────────────
    let actions: Arc<dyn ActionSink> = Arc::new(OutboxWriter::new(&state_dir));

    // Highly rated memories get an extra activation boost.
    let eval_graph = graph.clone();
    let boost_alpha = config.graph.boost_alpha;
    let on_memory_eval = Arc::new(move |ratings: std::collections::HashMap<String, i64>| {
        let keep: Vec<String> = ratings
            .iter()
            .filter(|(_, &score)| score >= 4)
            .map(|(id, _)| id.clone())
            .collect();
        tracing::info!(rated = ratings.len(), boosted = keep.len(), "memory eval received");
        if keep.is_empty() {
            return;
        }
        let graph = eval_graph.clone();
        tokio::spawn(async move {
            if let Err(e) = graph.boost_trace_access(&keep, boost_alpha).await {
                tracing::warn!(error = %e, "memory-eval boost failed");
            }
        });
    });

    let state = CoreState {
        config: config.clone(),
        graph,
        embedder,
        buffer: buffer.clone(),
        reflex,
        queue: queue.clone(),
        attention: attention.clone(),
        driver,
        builder,
        tracker: tracker.clone(),
        actions,
        on_memory_eval: Some(on_memory_eval),
    };

    // ── Watchers ─────────────────────────────────────────────────────
    let cancel = CancellationToken::new();

    let signal_watcher = SignalWatcher::new(
        &config.watchers,
        &state_dir,
        Arc::downgrade(&tracker),
    )
    .with_completion_callback(Arc::new(|record, summary| {
        tracing::info!(
            session_id = %record.id,
            summary = summary.as_deref().unwrap_or(""),
            "external completion signal"
        );
    }));
    let signal_task = signal_watcher.spawn(cancel.clone());

    let cpu_watcher = CpuIdleWatcher::new(
        config.watchers.clone(),
        config.driver.cli_path.clone(),
        Arc::downgrade(&tracker),
    );
    let cpu_task = cpu_watcher.spawn(cancel.clone());

    let inbox_task = if config.runtime.synthetic_mode {
        tracing::info!("synthetic mode: inbox/outbox transport enabled");
        let watcher = InboxWatcher::new(
            &state_dir,
            queue.clone(),
            attention.clone(),
            buffer.clone(),
        );
        Some(watcher.spawn(cancel.clone()))
    } else {
        None
    };

    // ── Executive ────────────────────────────────────────────────────
    let executive = Executive::new(state, notify);
    let exec_cancel = cancel.clone();
    let exec_task = tokio::spawn(async move { executive.run(exec_cancel).await });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    let _ = exec_task.await;
    let _ = signal_task.await;
    let _ = cpu_task.await;
    if let Some(task) = inbox_task {
        let _ = task.await;
    }

    // Save what we own on the way out.
    if let Err(e) = queue.save() {
        tracing::warn!(error = %e, "failed to save pending queue on shutdown");
    }
    if let Err(e) = buffer.save().await {
        tracing::warn!(error = %e, "failed to save buffers on shutdown");
    }
    tracing::info!("budcore stopped");
    Ok(())
}
