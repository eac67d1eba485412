/*
 * runq - Controller Service
 * Copyright (C) 2025 runq team
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Controller Service - Kubernetes controller for `Workspace` and `Run` CRDs
//!
//! - Keeps one ordered queue of runs per workspace
//! - Creates the execution pod for the run at the head of each queue
//! - Serves `/health` and `/ready` for kubelet probes

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use clap::{Parser, Subcommand};
use controller::crds::{Run, Workspace};
use controller::tasks::{config::ControllerConfig, run_controllers};
use kube::CustomResourceExt;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "runq-controller")]
#[command(about = "Schedules runq runs onto their workspaces", long_about = None)]
#[command(version)]
struct Cli {
    /// Namespace to watch
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    namespace: String,

    /// Controller configuration file
    #[arg(long, env = "CONTROLLER_CONFIG_PATH", default_value = "/config/config.yaml")]
    config: String,

    /// Address for the health server
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    listen: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the CustomResourceDefinitions as YAML
    Crdgen,
}

#[derive(Clone)]
struct AppState {
    controllers_running: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Crdgen) = cli.command {
        print!("{}", serde_yaml::to_string(&Workspace::crd())?);
        println!("---");
        print!("{}", serde_yaml::to_string(&Run::crd())?);
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting runq Controller Service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = kube::Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let controller_config = load_controller_config(&cli.config);
    let state = AppState {
        controllers_running: Arc::new(AtomicBool::new(true)),
    };

    let controller_handle = {
        let running = state.controllers_running.clone();
        let namespace = cli.namespace.clone();
        tokio::spawn(async move {
            if let Err(e) = run_controllers(client, namespace, controller_config).await {
                error!("Controller error: {}", e);
            }
            running.store(false, Ordering::SeqCst);
        })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&cli.listen).await?;
    info!("Controller HTTP server listening on {}", cli.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Controller service stopped");

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "runq-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    if !state.controllers_running.load(Ordering::SeqCst) {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }
    Ok(Json(json!({
        "status": "ready",
        "service": "runq-controller",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

fn load_controller_config(config_path: &str) -> ControllerConfig {
    if !Path::new(config_path).exists() {
        info!("No configuration at {}, using defaults", config_path);
        return ControllerConfig::default();
    }

    match ControllerConfig::from_mounted_file(config_path) {
        Ok(cfg) => {
            info!("Loaded controller configuration from {}", config_path);
            cfg
        }
        Err(err) => {
            warn!(
                "Failed to load configuration from {}: {}. Using defaults.",
                config_path, err
            );
            ControllerConfig::default()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
