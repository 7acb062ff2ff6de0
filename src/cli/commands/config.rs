//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{ModCacheError, ModCacheResult};
use console::style;
use std::path::PathBuf;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
) -> ModCacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config),
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let mut config = config.clone();
            apply_value(&mut config, &key, &value)?;
            manager.save(&config).await?;
            println!("{} {} = {}", style("[OK]").green(), key, value);
        }
    }

    Ok(())
}

fn show_config(config: &Config) {
    let toml =
        toml::to_string_pretty(config).unwrap_or_else(|_| "Error serializing config".to_string());
    println!("{}", toml);
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> ModCacheResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        println!(
            "{} Config already exists at {} (use --force to overwrite)",
            style("[WARN]").yellow(),
            path.display()
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized ({})",
        style("[OK]").green(),
        path.display()
    );

    Ok(())
}

/// Update one dot-separated key in `config`
fn apply_value(config: &mut Config, key: &str, value: &str) -> ModCacheResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(ModCacheError::User(format!(
                    "Invalid log format '{}'. Use 'text' or 'json'",
                    value
                )))
            }
        },

        ["store", "bucket"] => config.store.bucket = value.to_string(),

        ["cache", "local_cache_root"] => {
            config.cache.local_cache_root = Some(PathBuf::from(value))
        }
        ["cache", "sync_interval_ms"] => config.cache.sync_interval_ms = parse_u64(value)?,
        ["cache", "segmented_threshold_bytes"] => {
            config.cache.segmented_threshold_bytes = parse_u64(value)?
        }
        ["cache", "shutdown_retries"] => {
            config.cache.shutdown_retries = parse_u64(value)?.try_into().map_err(|_| {
                ModCacheError::User(format!("Value out of range: {}", value))
            })?
        }
        ["cache", "shutdown_retry_interval_ms"] => {
            config.cache.shutdown_retry_interval_ms = parse_u64(value)?
        }

        ["redirect", "auto_redirect"] => config.redirect.auto_redirect = parse_bool(value)?,
        ["redirect", "auto_redirect_min_size"] => {
            config.redirect.auto_redirect_min_size = parse_u64(value)?
        }
        ["redirect", "fetch_timeout_secs"] => {
            config.redirect.fetch_timeout_secs = parse_u64(value)?
        }

        _ => return Err(ModCacheError::User(format!("Unknown config key: {}", key))),
    }

    Ok(())
}

fn parse_bool(value: &str) -> ModCacheResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(ModCacheError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_u64(value: &str) -> ModCacheResult<u64> {
    value
        .parse()
        .map_err(|_| ModCacheError::User(format!("Invalid number: {}", value)))
}
