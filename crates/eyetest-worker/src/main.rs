//! Eye Test command line binary.

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use eyetest_models::ProcessingConfig;
use eyetest_worker::cli::{Cli, Command, JobArgs};
use eyetest_worker::{Pipeline, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Process(args) => process(args).await,
        Command::Recipe(args) => recipe(args).await,
        Command::Schema => {
            let schema = schemars::schema_for!(ProcessingConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

/// Colored output for dev, JSON when `LOG_FORMAT=json`.
fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("eyetest=info,eyetest_media=info,eyetest_worker=info"))
        .context("invalid log filter")?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

fn worker_config(args: &JobArgs) -> WorkerConfig {
    let mut config = WorkerConfig::from_env();
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    config
}

async fn process(args: JobArgs) -> anyhow::Result<()> {
    let config = worker_config(&args);
    info!("Worker config: {:?}", config);
    let pipeline = Pipeline::new(config).context("pipeline setup failed")?;
    let request = args.request().context("invalid settings")?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling job");
            cancel_tx.send_replace(true);
        }
    });

    let report = pipeline
        .process(request, cancel_rx, |_| {})
        .await
        .context("job failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.output.display());
    }
    Ok(())
}

async fn recipe(args: JobArgs) -> anyhow::Result<()> {
    let pipeline = Pipeline::new(worker_config(&args)).context("pipeline setup failed")?;
    let request = args.request().context("invalid settings")?;
    let plan = pipeline.plan(&request).await.context("invalid job")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "source": request.source,
                "destination": plan.destination,
                "codec": plan.encoding.codec,
                "recipe": plan.recipe.as_ref(),
                "filter_complex": plan.graph.filter_complex,
            }))?
        );
        return Ok(());
    }

    println!("{}", plan.recipe);
    println!();
    println!("{}", plan.graph.filter_complex.replace(';', ";\n"));
    println!();
    println!("-> {} ({})", plan.destination.display(), plan.encoding.codec);
    Ok(())
}
