use std::process;

use frontdoor::{
    background::Warmer,
    config::{self, ConfigError},
    edge::{Backends, EdgeService},
    http::Request,
    server::{Server, ServerError},
    telemetry::{self, TelemetryError},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum StartupError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("failed to build upstream client: {0}")]
    Client(#[from] reqwest::Error),
    #[error(transparent)]
    Server(#[from] ServerError),
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_startup_error(&error);
        process::exit(1);
    }
}

fn report_startup_error(error: &StartupError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "frontdoor failed");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "frontdoor failed");
    });
}

async fn run() -> Result<(), StartupError> {
    let (_cli, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let backends = Backends::from_settings(&settings)?;
    if backends.origin.is_none() {
        warn!("no content origin configured; origin paths will answer 500");
    }
    if backends.renderer.is_none() {
        warn!("no rendering service configured; pages will answer 500");
    }
    let edge = EdgeService::new(&settings, backends);

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let warmer = if settings.warmer.enabled {
        let warmer = Warmer::new(
            edge.clone(),
            settings.warmer.endpoints.clone(),
            settings.warmer.interval,
        );
        Some(tokio::spawn(warmer.run(shutdown.clone())))
    } else {
        info!("cache warmer disabled");
        None
    };

    let server = Server::bind(settings.server.listen)
        .await?
        .with_max_request_bytes(settings.server.max_request_bytes);

    let handler_edge = edge.clone();
    let served = server
        .run(
            move |request: Request| {
                let edge = handler_edge.clone();
                async move { edge.handle(request).await }
            },
            shutdown.clone(),
        )
        .await;

    shutdown.cancel();
    if let Some(task) = warmer {
        if let Err(err) = task.await {
            warn!(error = %err, "cache warmer task ended abnormally");
        }
    }
    let drained = edge.queue().shutdown(settings.server.graceful_shutdown).await;
    info!(drained, "frontdoor stopped");

    served.map_err(StartupError::from)
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                shutdown.cancel();
            }
            Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
        }
    });
}
