//! `fractal run`: drive the orchestrator on a blocking worker.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use fractal_core::{AdmissionGate, ClientConfig, HttpCoordinator, Orchestrator, OrchestratorExit, SettingsStore};
use fractal_training::{CheckpointStore, ControlSignal, StatsSink, StdoutEventSink, TaskLayout};
use std::sync::Arc;
use tracing::{info, warn};

pub async fn execute(config: ClientConfig) -> Result<()> {
    let device_id = config.resolve_device_id().context("Failed to resolve device id")?;
    let settings = Arc::new(
        SettingsStore::open(config.settings_path(), config.admission.clone())
            .context("Failed to open admission settings")?,
    );
    if let Err(e) = settings.watch() {
        warn!(error = %e, "settings edits will not apply until restart");
    }
    let gate = AdmissionGate::new(settings, config.telemetry.build());
    let store = CheckpointStore::new(TaskLayout::for_data_dir(&config.client.data_dir));
    let control = ControlSignal::new();
    let stats = Arc::new(StatsSink::new(StdoutEventSink));

    println!("{}", "Fractal training client".bold().cyan());
    println!("  Device:      {}", device_id);
    println!("  Coordinator: {}", config.coordinator.base_url);
    println!("  Data dir:    {}", config.client.data_dir.display());
    println!();

    tokio::spawn(cancel_on_ctrl_c(control.clone()));
    #[cfg(unix)]
    tokio::spawn(toggle_pause_on_sigusr1(control.clone()));

    let coordinator_config = config.coordinator.clone();
    let events = Arc::clone(&stats);
    let worker = tokio::task::spawn_blocking(move || -> Result<OrchestratorExit> {
        let coordinator = HttpCoordinator::new(&coordinator_config).context("Failed to build HTTP client")?;
        let orchestrator = Orchestrator::new(gate, Arc::new(coordinator), store, device_id, control, events);
        Ok(orchestrator.run())
    });
    let exit = worker.await.context("Orchestrator worker panicked")??;

    let summary = stats.snapshot();
    println!();
    println!("{}", "Session summary".bold());
    println!("  Epochs:      {}", summary.epochs_label());
    println!("  Performance: {}", summary.performance_label());
    println!("  Inference:   {}", summary.inference.as_deref().unwrap_or("-"));

    match exit {
        OrchestratorExit::Cancelled => {
            println!("{}", "Stopped.".yellow());
            Ok(())
        }
        OrchestratorExit::Fatal(message) => bail!("Training client stopped: {message}"),
    }
}

async fn cancel_on_ctrl_c(control: ControlSignal) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("interrupt received, cancelling");
            control.cancel();
        }
        Err(e) => warn!(error = %e, "unable to listen for Ctrl-C"),
    }
}

#[cfg(unix)]
async fn toggle_pause_on_sigusr1(control: ControlSignal) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "unable to listen for SIGUSR1");
            return;
        }
    };
    while usr1.recv().await.is_some() {
        let paused = control.toggle_pause();
        info!(paused, "pause toggled");
    }
}
