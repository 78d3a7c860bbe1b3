//! Command-line interface and config loading.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use bud_domain::config::{Config, ConfigSeverity};

#[derive(Debug, Parser)]
#[command(name = "budcore", about = "Cognitive core of the bud agent", version)]
pub struct Cli {
    /// Path to the config file (default: ./budcore.toml, or $BUD_CONFIG).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent core (default when no subcommand is given).
    Run,
    /// Inspect or validate the configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the config file (TOML) and apply environment overrides.
///
/// A missing file yields the defaults — every knob has one.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("BUD_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./budcore.toml"));

    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {}: {e}", path.display()))?
    } else {
        Config::default()
    };

    config.runtime.apply_env();
    Ok((config, path))
}

/// Print validation issues; returns false when any error-severity issue
/// exists.
pub fn validate(config: &Config, path: &Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Print the effective configuration as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        let (config, _) = load_config(Some(&path)).unwrap();
        assert_eq!(config.buffer.max_tokens, 3000);
    }

    #[test]
    fn file_settings_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budcore.toml");
        std::fs::write(
            &path,
            r#"
            [buffer]
            max_tokens = 500

            [driver]
            cli_path = "/opt/llm"
            "#,
        )
        .unwrap();

        let (config, loaded_from) = load_config(Some(&path)).unwrap();
        assert_eq!(loaded_from, path);
        assert_eq!(config.buffer.max_tokens, 500);
        assert_eq!(config.driver.cli_path, "/opt/llm");
        // Untouched sections keep defaults.
        assert_eq!(config.queue.max_size, 100);
    }

    #[test]
    fn bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("budcore.toml");
        std::fs::write(&path, "buffer = nonsense").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
