//! hubdeploy deploys and upgrades a set of interdependent contracts, driven by a plan file and a
//! per-network deployment manifest.

mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use cli::{Cli, Command, ManifestFormat};
use hubdeploy_deploy::{
    Deployer, JsonManifestStore, Manifest, ManifestStore, MemoryManifestStore, Orchestrator,
    ParameterSource, PlanConfig, Registry, RpcChain, SimulatedChain, Step,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let mut plan = PlanConfig::load(&config_path)?;

    if let Some(network) = cli.network {
        plan.network = network;
    }
    if let Some(manifest_dir) = cli.manifest_dir {
        plan.manifest_dir = PathBuf::from(manifest_dir);
    }
    if let Some(rpc_url) = cli.rpc_url {
        plan.rpc_url = Some(rpc_url);
    }

    let store = JsonManifestStore::new(&plan.manifest_dir, plan.network.clone());
    let manifest = store.load()?;

    tracing::info!(
        config_path = %config_path.display(),
        manifest_path = %store.path().display(),
        network = %plan.network,
        deployed = manifest.len(),
        "Loaded plan and manifest"
    );

    match cli.command {
        Command::Manifest { format } => match format {
            ManifestFormat::Table => println!("{}", manifest.table()),
            ManifestFormat::Json => println!(
                "{}",
                serde_json::to_string_pretty(&manifest).context("Failed to serialize manifest")?
            ),
        },
        Command::Plan => {
            let steps = plan.registry().select(&cli.tags)?;
            let planned = hubdeploy_deploy::plan(&steps, &manifest)?;
            println!("{}", hubdeploy_deploy::plan_table(&planned));
        }
        Command::Deploy => {
            let steps = plan.registry().select(&cli.tags)?;

            if cli.simulate {
                tracing::warn!(
                    "Simulating the deployment, nothing is sent and the manifest on disk is left untouched"
                );
                let chain = SimulatedChain::default();
                let orchestrator = Orchestrator::new(
                    chain.clone(),
                    chain.clone(),
                    chain,
                    MemoryManifestStore::new(manifest.clone()),
                );
                return deploy(orchestrator, &steps, manifest).await;
            }

            let rpc_url = plan.rpc_url.clone().context(
                "No rpc_url configured: set it in the plan, pass --rpc-url or use --simulate",
            )?;
            let chain = RpcChain::new(rpc_url)?;
            let orchestrator = Orchestrator::new(chain.clone(), chain.clone(), chain, store);
            deploy(orchestrator, &steps, manifest).await?;
        }
    }

    Ok(())
}

async fn deploy<D, R, P, S>(
    mut orchestrator: Orchestrator<D, R, P, S>,
    steps: &[Step],
    manifest: Manifest,
) -> Result<()>
where
    D: Deployer,
    R: Registry,
    P: ParameterSource,
    S: ManifestStore,
{
    let report = orchestrator.run(steps, manifest).await?;
    println!("{}", report.table());

    if !report.is_success() {
        anyhow::bail!(
            "Deployment incomplete: {} failed, {} blocked. Rerun to resume",
            report.failed().count(),
            report.blocked().count()
        );
    }

    Ok(())
}
