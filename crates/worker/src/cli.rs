//! Command-line interface and config loading.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use omnia_domain::config::Config;

/// Environment variable overriding the config path.
pub const CONFIG_ENV: &str = "OMNIA_EVAL_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "./omnia-eval.toml";

#[derive(Parser)]
#[command(name = "omnia-eval-worker", about = "Continuous eval worker for Omnia agent sessions")]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the worker (default when no subcommand is given).
    Serve,
    /// Inspect or validate the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version and exit.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration as TOML.
    Show,
    /// Validate the configuration and report issues.
    Validate,
}

/// Load the config from `--config`, `$OMNIA_EVAL_CONFIG`, or the default
/// path. A missing file yields defaults; an unreadable or invalid file is
/// an error.
pub fn load_config(flag: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = flag
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    if !path.exists() {
        return Ok((Config::default(), path));
    }

    let raw = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.worker.namespace, "default");
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("omnia-eval.toml");
        std::fs::write(&path, "[worker]\nnamespace = \"staging\"\n").unwrap();
        let (config, loaded_from) = load_config(Some(&path)).unwrap();
        assert_eq!(config.worker.namespace, "staging");
        assert_eq!(loaded_from, path);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "worker = {{{{").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
