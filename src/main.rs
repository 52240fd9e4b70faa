mod cli;
mod config;
mod error;
mod health;
mod render;
mod supervisor;
mod ui;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};
use config::RoostConfig;
use health::HealthMonitor;
use render::ConsoleRenderer;
use supervisor::{ProcessState, ProcessSupervisor};
use ui::{StatusSpinner, TermConsole};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match RoostConfig::load(Path::new(&cli.config)) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load {}: {e}", cli.config);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Run { quiet } => run(config, quiet).await,
        Command::Status { json, watch } => status(config, json, watch).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: RoostConfig, quiet: bool) -> Result<ExitCode> {
    let shutdown_timeout = config.shutdown_timeout();
    let supervisor = ProcessSupervisor::new(config.clone());

    let spinner = Arc::new(StatusSpinner::start(&config.command));
    {
        let spinner = spinner.clone();
        supervisor.subscribe_to_state_change(Box::new(move |_, new| spinner.update_state(new)));
    }

    let renderer = if quiet {
        None
    } else {
        let renderer = ConsoleRenderer::new(
            supervisor.clone(),
            Arc::new(TermConsole::new()),
            config.console_interval(),
            config.auto_scroll,
        );
        let dirty = renderer.clone();
        supervisor.subscribe_to_output(Box::new(move |_| dirty.mark_dirty()));
        renderer.activate();
        Some(renderer)
    };

    if !supervisor.start() {
        if let Some(renderer) = &renderer {
            renderer.deactivate().await;
        }
        spinner.finish();
        print_diagnostics(&supervisor);
        anyhow::bail!("failed to launch {}", config.command);
    }

    wait_for_shutdown(&supervisor).await;

    info!("shutting down");
    let stopped = match supervisor.state() {
        ProcessState::Starting | ProcessState::Running => supervisor.stop(shutdown_timeout).await,
        _ => true,
    };

    if let Some(renderer) = &renderer {
        renderer.deactivate().await;
    }
    spinner.finish();

    if supervisor.state() == ProcessState::Error {
        print_diagnostics(&supervisor);
    }

    Ok(if stopped {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[derive(Debug, Serialize)]
struct StatusReport {
    url: String,
    healthy: bool,
}

async fn status(config: RoostConfig, json: bool, watch: bool) -> Result<ExitCode> {
    let health = HealthMonitor::new(&config.host, config.port, config.health_interval());

    if watch {
        let url = health.url().to_string();
        health.start_monitoring(Box::new(move |healthy| {
            ui::print_health_status(&url, healthy);
        }));
        wait_for_interrupt().await;
        health.stop_monitoring().await;
        return Ok(ExitCode::SUCCESS);
    }

    let healthy = health.probe().await;
    if json {
        let report = StatusReport {
            url: health.url().to_string(),
            healthy,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::print_health_status(health.url(), healthy);
    }

    Ok(if healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Block until Ctrl-C; on Unix, SIGHUP restarts the service in place.
async fn wait_for_shutdown(supervisor: &Arc<ProcessSupervisor>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let Ok(mut hangup) = signal(SignalKind::hangup()) else {
            error!("failed to install SIGHUP handler");
            wait_for_interrupt().await;
            return;
        };
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                _ = hangup.recv() => {
                    info!("SIGHUP received, restarting service");
                    if !supervisor.restart().await {
                        error!("restart failed");
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = supervisor;
        wait_for_interrupt().await;
    }
}

async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {e}");
    }
}

fn print_diagnostics(supervisor: &ProcessSupervisor) {
    ui::print_error_diagnostics(supervisor.last_exit_code(), &supervisor.output_lines(Some(20)));
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("roost={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
