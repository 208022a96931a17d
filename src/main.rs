//! Locus CLI - Main entry point.

use locus::cli::{Cli, Commands};
use locus::compute::{ComponentRegistry, ModelArtifact};
use locus::config::LocusConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Serve {
            bind,
            artifact,
            lazy,
            json_logs,
            no_metrics,
        } => {
            let mut config = match &cli.config {
                Some(path) => LocusConfig::from_file(path)?,
                None => LocusConfig::default(),
            };

            if let Some(bind) = bind {
                config.server.bind_addr = bind;
            }
            if let Some(artifact) = artifact {
                config.model.artifact_path = artifact;
            }
            if lazy {
                config.model.preload = false;
            }
            if json_logs {
                config.observability.json_logs = true;
            }
            if no_metrics {
                config.observability.metrics_enabled = false;
            }
            if let Some(level) = cli.log_level {
                config.observability.log_level = level;
            }

            locus::run(config).await?;
        }

        Commands::Inspect { artifact } => {
            let model = ModelArtifact::from_file(&artifact, &ComponentRegistry::builtin())?;
            println!("{}", serde_json::to_string_pretty(&model.info())?);
        }

        Commands::Version => {
            println!("locus {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
