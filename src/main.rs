use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{error, info};

use validatems::cli::{Cli, Command, OutputFormat};
use validatems::config::{Config, ConfigManager};
use validatems::http_client::AsyncHttpClient;
use validatems::intake::{IntakePipeline, request_for_target};
use validatems::output::{CheckReport, Output};
use validatems::scratch::ScratchArea;
use validatems::validator::SchemaValidator;
use validatems::{logging, server};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;

    logging::init_logging(&config.logging, cli.is_serve())?;
    info!("Application restarted");

    let pipeline = build_pipeline(&config).await?;

    match &cli.command {
        Command::Serve { .. } => server::serve(&config, pipeline).await,
        Command::Check { target, format } => {
            let code = run_check(&pipeline, target, *format).await;
            std::process::exit(code);
        }
    }
}

async fn build_pipeline(config: &Config) -> Result<IntakePipeline> {
    let scratch = ScratchArea::open(&config.scratch.directory)
        .await
        .with_context(|| {
            format!(
                "failed to open scratch directory {}",
                config.scratch.directory.display()
            )
        })?;

    let mut validator = match &config.schema.path {
        Some(path) => SchemaValidator::from_file(path)
            .await
            .with_context(|| format!("failed to read schema {}", path.display()))?,
        None => SchemaValidator::bundled(),
    };
    if let Some(namespace) = &config.schema.namespace {
        validator = validator.with_namespace(namespace.clone());
    }
    info!(schema = validator.source_name(), namespace = ?validator.namespace(), "Schema configured");

    let remote = AsyncHttpClient::new(ConfigManager::get_http_client_config(config))
        .context("failed to create HTTP client")?;

    Ok(IntakePipeline::new(
        scratch,
        Arc::new(remote),
        Arc::new(validator),
    ))
}

async fn run_check(pipeline: &IntakePipeline, target: &str, format: OutputFormat) -> i32 {
    let started = Instant::now();

    let result = match request_for_target(target).await {
        Ok(request) => pipeline.submit(request).await,
        Err(e) => {
            error!(%target, error = %e, "Cannot read check target");
            Err(e)
        }
    };

    let report = CheckReport::from_result(target, &result, started.elapsed());
    println!("{}", Output::new(format).render(&report));
    report.exit_code()
}
