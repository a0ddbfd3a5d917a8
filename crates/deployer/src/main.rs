//! Cloud Run Deployer
//!
//! Entry point for the GitHub Action: reads inputs, deploys or deletes the
//! service and publishes the service URL as a step output.

use anyhow::{Context, Result};
use cloud_run_deployer::config::Config;
use skyport_common::DeploymentOutcome;
use std::io::Write;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cloud_run_deployer=debug,registry_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Cloud Run Deployer");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded");
    info!("  Service: {}", config.name);
    info!("  Region: {}", config.run_region);
    if config.delete_service {
        info!("  Mode: delete");
    } else if let Some(image) = &config.image {
        info!("  Image: {}", image);
        info!("  Public: {}", config.allow_unauthenticated);
    }

    let result = tokio::select! {
        result = cloud_run_deployer::run(&config) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, the remote rollout may still be in progress");
            anyhow::bail!("Deployment interrupted");
        }
    };

    match result {
        Ok(Some(outcome)) => {
            publish(&outcome).context("Failed to write step output")?;
            info!("Deployment complete: {}", outcome.url);
            Ok(())
        }
        Ok(None) => {
            info!("Service {} deleted", config.name);
            Ok(())
        }
        Err(e) => {
            error!("Deployment failed during {}: {}", e.phase(), e);
            if let Some(log_url) = e.log_url() {
                error!("Service logs: {}", log_url);
            }
            Err(e.into())
        }
    }
}

/// Print the URL and append it to the step outputs when running in Actions
fn publish(outcome: &DeploymentOutcome) -> Result<()> {
    println!("{}", outcome.url);

    if let Ok(path) = std::env::var("GITHUB_OUTPUT") {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {path}"))?;
        writeln!(file, "url={}", outcome.url)?;
    }

    Ok(())
}
