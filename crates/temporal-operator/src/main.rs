//! Temporal operator - runs Temporal clusters on Kubernetes

use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use kube::Client;

use temporal_cluster::controller::Context;
use temporal_common::telemetry::{init_telemetry, TelemetryConfig};
use temporal_common::PlatformFeatures;
use temporal_operator::config::{Cli, OperatorConfig};
use temporal_operator::controller_runner::{build_client_controllers, build_cluster_controllers};
use temporal_operator::startup::{crd_manifests, ensure_crds};
use temporal_operator::webhook::serve_webhook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.plain_logs,
        ..Default::default()
    })?;

    run_controller(cli.operator_config()).await
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;

    ensure_crds(&client).await?;

    let features = PlatformFeatures::discover(client.clone()).await;
    let images = config.image_defaults();
    let ctx = Arc::new(Context::from_client(
        client.clone(),
        features.clone(),
        images.clone(),
    ));
    let namespace = config.watch_namespace.as_deref();
    match namespace {
        Some(ns) => tracing::info!(namespace = %ns, "Watching a single namespace"),
        None => tracing::info!("Watching all namespaces"),
    }

    tracing::info!("Starting controllers:");
    let mut controllers = build_cluster_controllers(client.clone(), ctx.clone(), namespace);
    controllers.extend(build_client_controllers(client, ctx, namespace));

    if config.disable_webhook {
        tracing::info!("Admission webhook disabled");
        join_all(controllers).await;
        return Ok(());
    }

    // The webhook failing is fatal; controllers stop on SIGTERM.
    tokio::select! {
        _ = join_all(controllers) => Ok(()),
        result = serve_webhook(&config, features, images) => result,
    }
}
