use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use polymath::api;
use polymath::app::App;
use polymath::cli::{Cli, Command};
use polymath::concept::normalize_key;
use polymath::config::AppConfig;
use polymath::state_machine::JobMode;
use polymath::ui::{self, JobProgress};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "polymath=debug" } else { "polymath=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    let app = App::build(config).await.context("failed to start services")?;

    match cli.command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| app.config.server.bind.clone());
            info!(version = env!("CARGO_PKG_VERSION"), workers = app.config.workers.count, "starting polymath");
            let (state, _pool) = app.start_workers().await?;
            api::serve(state, &bind).await?;
        }
        Command::Submit { mode } => submit(&app, mode.into()).await?,
        Command::Status { id } => {
            let view = app.registry.snapshot(&id).await?;
            ui::print_view(&view);
        }
        Command::Watch { id } => {
            let mut subscription = app.gateway.subscribe(&id).await?;
            let Some(first) = subscription.next().await else {
                return Ok(());
            };
            let mut progress = JobProgress::start(&first);
            let mut last = first;
            while let Some(view) = subscription.next().await {
                progress.update(&view);
                last = view;
            }
            progress.finish(&last);
        }
        Command::Rethink { question, previous } => {
            let outcome = app.rethink.rethink(&question, previous.as_deref()).await?;
            ui::print_rethink(&outcome);
        }
        Command::Learn { concept } => {
            let key = normalize_key(&concept)
                .with_context(|| format!("'{concept}' is not a concept"))?;
            app.knowledge.add_unknown(&key).await?;
            println!("queued '{key}'");
        }
    }

    Ok(())
}

/// Runs one job in this process while rendering its snapshots.
async fn submit(app: &App, mode: JobMode) -> Result<()> {
    let view = app.registry.create(mode).await?;
    info!(job_id = %view.id, %mode, "job created");

    let mut subscription = app.gateway.subscribe(&view.id).await?;
    let orchestrator = app.orchestrator.clone();
    let job_id = view.id.clone();
    let run = tokio::spawn(async move { orchestrator.run_job(&job_id).await });

    let mut progress = JobProgress::start(&view);
    let mut last = view;
    while let Some(next) = subscription.next().await {
        progress.update(&next);
        last = next;
    }

    let outcome = run.await.context("job task panicked")?;
    let last = match outcome {
        Ok(final_view) => final_view,
        Err(e) => {
            progress.finish(&last);
            return Err(e.into());
        }
    };
    progress.finish(&last);
    Ok(())
}
