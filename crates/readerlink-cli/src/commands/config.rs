//! Config command implementation.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::ConfigAction;
use crate::config::{Config, resolve_config_path};

pub fn cmd_config(action: ConfigAction, config_path: Option<&Path>, quiet: bool) -> Result<()> {
    let path = resolve_config_path(config_path);

    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = if path.exists() {
                Config::load(&path)?
            } else {
                if !quiet {
                    eprintln!("No config file at {}, showing defaults", path.display());
                }
                Config::default()
            };
            if let Err(e) = config.validate() {
                eprintln!("Warning: {}", e);
            }
            let content = toml::to_string_pretty(&config).context("Failed to serialize config")?;
            print!("{}", content);
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "Config file already exists at {}. Use --force to overwrite it.",
                    path.display()
                );
            }
            Config::default().save(&path)?;
            if !quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("readerlink").join("config.toml");

        cmd_config(ConfigAction::Init { force: false }, Some(&path), true).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[signal]\nminimum = -90\n").unwrap();

        let err = cmd_config(ConfigAction::Init { force: false }, Some(&path), true).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert_eq!(Config::load(&path).unwrap().signal.minimum, -90);

        cmd_config(ConfigAction::Init { force: true }, Some(&path), true).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_show_without_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("absent.toml");
        cmd_config(ConfigAction::Show, Some(&path), true).unwrap();
        assert!(!path.exists());
    }
}
