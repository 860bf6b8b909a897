//! crumpet is a CLI tool for deploying Azure Function Apps and their
//! deployment slots from a declarative manifest.

mod cli;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use comfy_table::Table;
use tokio::time::Instant;

use cli::{Cli, Command};
use crumpet_deploy::{
    AppManifest, AzureClient, Credential, DeployTarget, StageStatus, SwapRequest, SyncRequest,
    execute_rollback, execute_swap, execute_sync, get_function_state,
};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let app_dir = PathBuf::from(&cli.app_dir);
    let manifest = AppManifest::load_from_file(&app_dir)?;
    let credential = Credential::from_env()?;
    let deadline = Instant::now() + Duration::from_secs(cli.timeout_secs);

    let status = match cli.command {
        Command::Sync { slot } => {
            let targets = manifest.select_targets(cli.target.as_deref());
            execute_sync(
                &credential,
                SyncRequest {
                    targets: &targets,
                    manifest: &manifest.function,
                    app_dir: &app_dir,
                    slot,
                    deadline,
                },
            )
            .await
        }
        Command::Swap { slot1, slot2 } => {
            let targets = manifest.select_targets(cli.target.as_deref());
            execute_swap(
                &credential,
                SwapRequest {
                    targets: &targets,
                    manifest: &manifest.function,
                    slot1,
                    slot2,
                    deadline,
                },
            )
            .await
        }
        Command::Rollback { running_dir, slot } => {
            // A rollback replays the previously-deployed source wholesale:
            // manifest, templates and targets all come from the old checkout.
            let running_dir = PathBuf::from(running_dir);
            let running = AppManifest::load_from_file(&running_dir)?;
            let targets = running.select_targets(cli.target.as_deref());
            execute_rollback(
                &credential,
                SyncRequest {
                    targets: &targets,
                    manifest: &running.function,
                    app_dir: &running_dir,
                    slot,
                    deadline,
                },
            )
            .await
        }
        Command::Status { commit } => {
            let targets = manifest.select_targets(cli.target.as_deref());
            print_status(&manifest, &targets, &app_dir, &commit, &credential, deadline).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(match status {
        StageStatus::Success => ExitCode::SUCCESS,
        StageStatus::Failure => ExitCode::FAILURE,
    })
}

async fn print_status(
    manifest: &AppManifest,
    targets: &[DeployTarget],
    app_dir: &Path,
    commit: &str,
    credential: &Credential,
    deadline: Instant,
) -> Result<()> {
    let [target] = targets else {
        bail!("exactly one deploy target is supported, got {}", targets.len());
    };
    let client = AzureClient::connect(target, credential)
        .await
        .with_context(|| format!("failed to connect to target {}", target.name))?;

    let (live, sync) = get_function_state(&client, &manifest.function, app_dir, commit, deadline).await;

    let mut table = Table::new();
    table.set_header(["Resource", "Type", "Health", "Note"]);
    for resource in &live.resources {
        let health = resource.health.to_string();
        table.add_row([
            resource.name.as_str(),
            resource.resource_type.as_str(),
            health.as_str(),
            resource.health_description.as_str(),
        ]);
    }
    println!("{table}");
    println!();
    println!("{sync}");

    Ok(())
}
