mod api;
mod cli;
mod demo;
mod echo;
mod logging;
mod router;
mod state;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use echoloop_core::{QueueConfig, TaskQueue};
use tokio::sync::watch;
use tracing::{error, info};

use crate::cli::{Cli, Command, LoopArgs, ServeArgs};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.json_logs);

    let mut config = QueueConfig::from_env();
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }

    match cli.command {
        Command::Demo => demo(config).await,
        Command::Run(args) => run(config, args).await,
        Command::Serve(args) => serve(config, args).await,
    }
}

async fn demo(config: QueueConfig) -> anyhow::Result<()> {
    let queue = TaskQueue::new(config);
    queue.start().await?;
    let result = demo::run_scenario(&queue).await;
    queue.stop().await;

    for snapshot in result? {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }
    println!("{}", serde_json::to_string_pretty(&queue.get_queue_stats().await)?);
    Ok(())
}

async fn run(config: QueueConfig, args: LoopArgs) -> anyhow::Result<()> {
    let echo_config = args.into_config()?;
    let queue = Arc::new(TaskQueue::new(config));
    queue.start().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Nothing pauses the foreground loop.
    let (_pause_tx, pause_rx) = watch::channel(false);
    let mut echo_loop = tokio::spawn(echo::run(
        Arc::clone(&queue),
        echo_config,
        shutdown_rx,
        pause_rx,
    ));

    let report = tokio::select! {
        joined = &mut echo_loop => joined,
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
            echo_loop.await
        }
    };
    queue.stop().await;

    let report = report.context("echo loop panicked")??;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn serve(config: QueueConfig, args: ServeArgs) -> anyhow::Result<()> {
    let echo_config = args.echo.into_config()?;
    let queue = Arc::new(TaskQueue::new(config));
    queue.start().await?;

    let state = Arc::new(AppState::new(Arc::clone(&queue), !args.no_loop));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let echo_loop = state.loop_enabled.then(|| {
        tokio::spawn(echo::run(
            Arc::clone(&queue),
            echo_config,
            shutdown_rx,
            state.pause.subscribe(),
        ))
    });
    let listener = tokio::net::TcpListener::bind(&args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    info!(addr = %args.addr, "listening");

    axum::serve(listener, router::build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = echo_loop {
        match handle.await {
            Ok(Ok(report)) => info!(?report, "echo loop stopped"),
            Ok(Err(e)) => error!(error = %e, "echo loop failed"),
            Err(e) => error!(error = %e, "echo loop panicked"),
        }
    }
    queue.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
