//! Command-line configuration.

use crate::commands::Command;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use transport::TransportConfig;

/// Exercise peer RPC sessions over an in-process duplex link.
#[derive(Debug, Parser)]
#[command(name = "peer-session", version)]
pub struct CliConfig {
    /// JSON file with transport settings (`queue_capacity`, `max_pending_calls`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl CliConfig {
    /// Transport settings from `--config`, or the defaults.
    pub fn transport(&self) -> anyhow::Result<TransportConfig> {
        let config = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?
            }
            None => TransportConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn run(self) -> anyhow::Result<()> {
        let transport = self.transport()?;
        let runtime = tokio::runtime::Runtime::new()?;
        let result = runtime.block_on(self.command.execute(&transport))?;
        print!("{}", result);
        Ok(())
    }
}
