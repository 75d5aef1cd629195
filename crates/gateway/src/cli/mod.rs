pub mod config;

use clap::{Parser, Subcommand};

/// Courier — a multi-tenant messaging session gateway.
#[derive(Debug, Parser)]
#[command(name = "courier", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `COURIER_CONFIG`
/// (or `courier.toml` by default). Returns the parsed [`Config`] and
/// the path that was used.
///
/// Shared by `serve` and the `config` subcommands so the logic lives in
/// one place. A missing file is not an error; every field has a default.
pub fn load_config() -> anyhow::Result<(courier_domain::config::Config, String)> {
    let config_path = std::env::var("COURIER_CONFIG").unwrap_or_else(|_| "courier.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        courier_domain::config::Config::default()
    };

    Ok((config, config_path))
}
