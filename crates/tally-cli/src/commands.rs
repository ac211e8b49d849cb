use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use tally_metrics::{ExporterMetrics, PrometheusRegistry};
use tally_reconcile::{
    exporter_for, Controller, HandoffReport, OwnershipReconciler, ShutdownHandoff,
};
use tally_ring::{EndpointsFileSource, MembershipSource, PeerWatcher, ShardRing, StaticMembership};
use tally_server::{AppState, TallyServer};
use tally_store::DirResourceStore;
use tally_types::ResourceKind;

use crate::cli::*;
use crate::config::ExporterConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => {
            let config = effective_config(cli.config.as_deref(), &args)?;
            let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
            runtime.block_on(run_exporter(config, shutdown_signal()))?;
            Ok(())
        }
        Command::Labels(args) => cmd_labels(args),
        Command::CheckConfig(args) => cmd_check_config(cli.config.as_deref(), &args),
    }
}

fn effective_config(
    path: Option<&std::path::Path>,
    args: &RunArgs,
) -> anyhow::Result<ExporterConfig> {
    let mut config = ExporterConfig::load(path)?;
    config.apply(args);
    config.validate()?;
    Ok(config)
}

/// Run every component until `signal` resolves, then stop them in order:
/// controllers and server first, shutdown handoff last.
pub async fn run_exporter(
    config: ExporterConfig,
    signal: impl Future<Output = ()>,
) -> anyhow::Result<HandoffReport> {
    let me = config.self_address()?;
    let ring = Arc::new(ShardRing::new(me.clone(), config.ring.clone())?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = JoinSet::new();

    // Membership feeds the ring.
    let source = membership_source(&config)?;
    let (events_tx, events_rx) = mpsc::channel(16);
    {
        let shutdown = shutdown_rx.clone();
        background.spawn(async move {
            if let Err(e) = source.run(events_tx, shutdown).await {
                warn!(error = %e, "membership source stopped");
            }
        });
    }
    background.spawn(PeerWatcher::new(Arc::clone(&ring)).run(events_rx, shutdown_rx.clone()));

    let store = Arc::new(
        DirResourceStore::open(&config.store.reports_dir)
            .await
            .with_context(|| format!("opening {}", config.store.reports_dir.display()))?,
    );
    {
        let store = Arc::clone(&store);
        let interval = config.store.poll_interval();
        let shutdown = shutdown_rx.clone();
        background.spawn(async move { store.run_poller(interval, shutdown).await });
    }

    let registry = Arc::new(PrometheusRegistry::new());
    let telemetry = ExporterMetrics::register(registry.registry())?;
    {
        let telemetry = telemetry.clone();
        let mut status = ring.subscribe();
        let mut shutdown = shutdown_rx.clone();
        background.spawn(async move {
            loop {
                let members = status.borrow_and_update().members;
                telemetry.set_ring_members(members);
                tokio::select! {
                    changed = status.changed() => if changed.is_err() { return },
                    _ = shutdown.wait_for(|stop| *stop) => return,
                }
            }
        });
    }

    let enabled = config.kinds.enabled();
    let kinds: Vec<ResourceKind> = enabled.iter().map(|(kind, _)| *kind).collect();
    let mut controllers = Vec::with_capacity(enabled.len());
    for (kind, selection) in &enabled {
        let exporter = exporter_for(*kind, selection)?;
        let reconciler = OwnershipReconciler::new(
            store.clone(),
            Arc::clone(&ring),
            registry.clone(),
            exporter,
            config.reconcile.clone(),
        )?
        .with_telemetry(telemetry.clone());
        controllers.push(Arc::new(Controller::new(Arc::new(reconciler))));
    }

    let server = TallyServer::new(
        config.server.clone(),
        AppState::new(registry.clone(), Arc::clone(&ring), kinds.clone()),
    );
    let listener = server
        .bind()
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    let mut server_task = tokio::spawn(server.serve_on(listener, shutdown_rx.clone()));

    match ring.wait_ready(config.reconcile.readiness_timeout()).await {
        Ok(members) => info!(members, "shard ring ready"),
        Err(e) => warn!(error = %e, "starting with an empty ring; nothing is owned until peers appear"),
    }

    let mut workers = JoinSet::new();
    for controller in controllers {
        let shutdown = shutdown_rx.clone();
        workers.spawn(async move { controller.run(shutdown).await });
    }
    info!(self_address = %me, kinds = kinds.len(), "tally exporter running");

    let mut server_done = false;
    tokio::select! {
        _ = signal => info!("shutdown requested"),
        result = &mut server_task => {
            server_done = true;
            match result {
                Ok(Ok(())) => warn!("metrics server exited early"),
                Ok(Err(e)) => warn!(error = %e, "metrics server failed"),
                Err(e) => warn!(error = %e, "metrics server task aborted"),
            }
        }
    }
    let _ = shutdown_tx.send(true);

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "controller failed"),
            Err(e) => warn!(error = %e, "controller task aborted"),
        }
    }
    if !server_done {
        match server_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "metrics server failed"),
            Err(e) => warn!(error = %e, "metrics server task aborted"),
        }
    }

    let report = ShutdownHandoff::new(store, me, kinds)
        .run_within(config.reconcile.handoff_grace())
        .await;

    while background.join_next().await.is_some() {}
    info!("tally exporter stopped");
    Ok(report)
}

fn membership_source(config: &ExporterConfig) -> anyhow::Result<Arc<dyn MembershipSource>> {
    let membership = &config.membership;
    Ok(match &membership.endpoints_file {
        Some(path) => {
            info!(
                service = %membership.service_name,
                namespace = membership.service_namespace.as_deref().unwrap_or(""),
                path = %path.display(),
                "watching service endpoints file"
            );
            Arc::new(EndpointsFileSource::new(path, membership.poll_interval()))
        }
        None => Arc::new(StaticMembership::new(config.static_peers()?)),
    })
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn cmd_labels(args: LabelsArgs) -> anyhow::Result<()> {
    let kinds = match &args.kind {
        Some(kind) => vec![kind.parse::<ResourceKind>()?],
        None => ResourceKind::ALL.to_vec(),
    };
    for (i, kind) in kinds.into_iter().enumerate() {
        if i > 0 {
            println!();
        }
        let exporter = exporter_for(kind, "")?;
        println!("{}", kind.as_str().bold());
        println!("  groups: {}", exporter.groups().join(", ").cyan());
        for d in exporter.descriptors() {
            println!(
                "  {} {} {}",
                format!("{:<22}", d.name).green(),
                format!("{:<8}", d.scope.as_str()).dimmed(),
                d.groups.join(",")
            );
        }
    }
    Ok(())
}

fn cmd_check_config(path: Option<&std::path::Path>, args: &RunArgs) -> anyhow::Result<()> {
    let config = effective_config(path, args)?;
    println!("{} configuration valid", "✓".green().bold());
    for (kind, selection) in config.kinds.enabled() {
        let exporter = exporter_for(kind, selection)?;
        let labels = exporter.target_labels();
        let shown = if labels.is_empty() {
            "(summary only)".dimmed().to_string()
        } else {
            labels.join(",")
        };
        println!("  {}: {}", kind.as_str().yellow(), shown);
    }
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
