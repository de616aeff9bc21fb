use clap::{Parser, Subcommand};
use hubdeploy_deploy::PLAN_FILENAME;
use tracing::level_filters::LevelFilter;
use url::Url;

/// How `hubdeploy manifest` prints the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum ManifestFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "hubdeploy")]
#[command(
    author,
    version,
    about = "Deploy and upgrade Hub-registered contracts, one idempotent step at a time"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "HUBDEPLOY_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to the plan file, or to a directory containing one.
    #[arg(short, long, env = "HUBDEPLOY_CONFIG", default_value = PLAN_FILENAME)]
    pub config: String,

    /// Only run steps with these tags, plus everything they depend on.
    #[arg(short, long, value_delimiter = ',', env = "HUBDEPLOY_TAGS")]
    pub tags: Vec<String>,

    /// Override the network name from the plan.
    #[arg(short, long)]
    pub network: Option<String>,

    /// Override the directory holding the deployment manifest.
    #[arg(long, alias = "deployments")]
    pub manifest_dir: Option<String>,

    /// Override the deployment sidecar endpoint.
    #[arg(long, alias = "rpc")]
    pub rpc_url: Option<Url>,

    /// Run against an in-memory chain. Nothing is sent and the manifest on disk is left untouched.
    #[arg(long)]
    pub simulate: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show what a deployment would do without sending anything.
    Plan,
    /// Run the deployment.
    Deploy,
    /// Print the current deployment manifest.
    Manifest {
        #[arg(long, default_value_t = ManifestFormat::Table)]
        format: ManifestFormat,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_with_tags() {
        let cli = Cli::try_parse_from([
            "hubdeploy",
            "--tags",
            "v2,Hub",
            "--simulate",
            "deploy",
        ])
        .unwrap();

        assert_eq!(cli.tags, vec!["v2".to_string(), "Hub".to_string()]);
        assert!(cli.simulate);
        assert_eq!(cli.command, Command::Deploy);
        assert_eq!(cli.config, PLAN_FILENAME);
    }

    #[test]
    fn test_parse_manifest_format() {
        let cli = Cli::try_parse_from(["hubdeploy", "manifest", "--format", "json"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Manifest {
                format: ManifestFormat::Json
            }
        );
    }

    #[test]
    fn test_rejects_invalid_rpc_url() {
        assert!(Cli::try_parse_from(["hubdeploy", "--rpc-url", "not a url", "plan"]).is_err());
    }
}
