//! Web front end
//!
//! A thin `axum` layer over [`IntakePipeline`]: one page with a URL form and a
//! file form, re-rendered with a single flash message after each submission.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::response::Html;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigManager};
use crate::error::UNEXPECTED_FAILURE_MESSAGE;
use crate::intake::{IntakePipeline, UploadRequest};
use crate::page::{Flash, FlashCategory, render_index};

/// Shared handler state
pub struct AppState {
    pipeline: IntakePipeline,
    action: String,
}

type SharedState = Arc<AppState>;

/// Build the router, mounted under `application_root` when given
pub fn router(
    pipeline: IntakePipeline,
    application_root: Option<&str>,
    max_upload_bytes: usize,
) -> Router {
    let action = application_root.unwrap_or("/").to_string();
    let state = Arc::new(AppState { pipeline, action });

    let routes = Router::new()
        .route("/", get(index).post(upload))
        .route("/hello", get(hello))
        .with_state(state);

    let app = match application_root {
        Some(root) => Router::new().nest(root, routes),
        None => routes,
    };

    app.layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn index(State(state): State<SharedState>) -> Html<String> {
    Html(render_index(&[], &state.action))
}

async fn hello(State(state): State<SharedState>) -> Html<String> {
    tracing::debug!("Hello!");
    Html(render_index(
        &[Flash::text(FlashCategory::Success, "Hello!")],
        &state.action,
    ))
}

async fn upload(State(state): State<SharedState>, multipart: Multipart) -> Html<String> {
    let flash = match read_submission(multipart).await {
        Ok(request) => match state.pipeline.submit(request).await {
            Ok(outcome) => Flash::from_outcome(&outcome),
            Err(e) => Flash::from_error(&e),
        },
        Err(e) => {
            error!(error = %e, "Failed to read upload form");
            Flash::text(FlashCategory::Error, UNEXPECTED_FAILURE_MESSAGE)
        }
    };

    Html(render_index(&[flash], &state.action))
}

/// Turn the posted form into a submission
///
/// A `url` field selects the URL path even when empty. Otherwise the `file`
/// field is used; a missing file becomes an empty upload without a name.
pub async fn read_submission(
    mut multipart: Multipart,
) -> std::result::Result<UploadRequest, MultipartError> {
    let mut url = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("url") => url = Some(field.text().await?),
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                file = Some((bytes.to_vec(), filename));
            }
            _ => {}
        }
    }

    Ok(match (url, file) {
        (Some(url), _) => UploadRequest::remote_url(url),
        (None, Some((bytes, filename))) => UploadRequest::local_file(bytes, filename.as_deref()),
        (None, None) => UploadRequest::local_file(Vec::new(), None),
    })
}

/// Run the web service until Ctrl-C
pub async fn serve(config: &Config, pipeline: IntakePipeline) -> Result<()> {
    let sweeper = pipeline.scratch().sweeper();

    // Nothing is in flight yet, so every leftover upload can go
    match sweeper.sweep(Duration::ZERO).await {
        Ok(stats) => info!(removed = stats.removed, "Startup sweep finished"),
        Err(e) => warn!(error = %e, "Startup sweep failed"),
    }
    let sweeper_task = sweeper.spawn_periodic(
        ConfigManager::get_sweep_interval(config),
        ConfigManager::get_stale_after(config),
    );

    if let Err(e) = pipeline.validator().preload().await {
        error!(error = %e, "Failed to parse XML schema");
    }

    let app = router(
        pipeline,
        config.server.application_root.as_deref(),
        ConfigManager::get_max_upload_bytes(config),
    );

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;
    info!(addr = %listener.local_addr()?, root = ?config.server.application_root, "Listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper_task.abort();
    served.context("server error")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
