//! Read contacts from a CSV export and sync them into the remote directory.
use std::sync::Arc;

use contact_common::metrics::{serve, setup_metrics_router};
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use contact_sync::config::Config;
use contact_sync::directory::HttpDirectory;
use contact_sync::error::PipelineError;
use contact_sync::pipeline::Pipeline;
use contact_sync::source::CsvSource;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(log_layer).init();
}

#[tokio::main]
async fn main() -> Result<(), PipelineError> {
    setup_tracing();
    info!("starting contact sync");

    let config = Config::init_from_env().expect("Invalid configuration:");

    if config.export_metrics {
        let bind = config.bind();
        tokio::task::spawn(async move {
            let router = match setup_metrics_router() {
                Ok(router) => router,
                Err(e) => {
                    error!("failed to install metrics recorder: {}", e);
                    return;
                }
            };
            if let Err(e) = serve(router, &bind).await {
                error!("failed to start serving metrics: {}", e);
            }
        });
    }

    let directory = HttpDirectory::new(
        &config.directory_url,
        config.api_key.as_str(),
        config.request_timeout.0,
    )
    .expect("failed to build directory client");

    let source = CsvSource::open(&config.csv_path)?;

    let shutdown = CancellationToken::new();

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, shutting down");
                ctrl_c_shutdown.cancel();
            }
            Err(e) => error!("failed to listen for interrupt: {}", e),
        }
    });

    if let Some(deadline) = config.run_deadline {
        let deadline_shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline.0).await;
            warn!(
                deadline_secs = deadline.0.as_secs_f64(),
                "run deadline reached, shutting down"
            );
            deadline_shutdown.cancel();
        });
    }

    let pipeline = Pipeline::new(config.pipeline(), Arc::new(directory));
    let summary = pipeline.run(source, shutdown).await?;

    if summary.abandoned() > 0 {
        warn!(abandoned = summary.abandoned(), "run ended before every contact was classified");
    }
    info!("contact sync finished");

    Ok(())
}
