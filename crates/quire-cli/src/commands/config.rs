//! Config command handlers

use std::path::PathBuf;

use anyhow::{Context, Result};

use quire_core::Config;

use crate::output::{Output, OutputFormat};

fn or_unset<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "sync_enabled": config.sync_enabled,
                    "sync_path": config.sync_path,
                    "conflict_policy": config.conflict_policy,
                    "mount_command": config.mount_command,
                    "unmount_command": config.unmount_command,
                    "mount_timeout_secs": config.mount_timeout_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:           {}", config.data_dir.display());
            println!("  sync_enabled:       {}", config.sync_enabled);
            println!(
                "  sync_path:          {}",
                or_unset(config.sync_path.as_ref().map(|p| p.display()))
            );
            println!("  conflict_policy:    {}", config.conflict_policy);
            println!("  mount_command:      {}", or_unset(config.mount_command.as_ref()));
            println!("  unmount_command:    {}", or_unset(config.unmount_command.as_ref()));
            println!("  mount_timeout_secs: {}", config.mount_timeout_secs);
            println!(
                "  log_file:           {}",
                or_unset(config.log_file.as_ref().map(|p| p.display()))
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.set_value(&key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}
