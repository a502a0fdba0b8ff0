//! Config command handlers

use anyhow::{bail, Context, Result};

use agora_core::{Config, CounterMode};

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "database_file": config.database_file,
                    "items_per_page": config.items_per_page,
                    "comments_per_parent": config.comments_per_parent,
                    "counter_mode": config.counter_mode,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.sqlite_path().display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:            {}", config.data_dir.display());
            println!("  database_file:       {}", config.database_file);
            println!("  items_per_page:      {}", config.items_per_page);
            println!("  comments_per_parent: {}", config.comments_per_parent);
            println!("  counter_mode:        {}", config.counter_mode);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "data_dir" => {
            config.data_dir = value.into();
        }
        "database_file" => {
            if value.trim().is_empty() {
                bail!("database_file cannot be empty");
            }
            config.database_file = value.to_string();
        }
        "items_per_page" => {
            config.items_per_page = parse_positive(key, value)?;
        }
        "comments_per_parent" => {
            config.comments_per_parent = parse_positive(key, value)?;
        }
        "counter_mode" => {
            config.counter_mode = value.parse::<CounterMode>().map_err(anyhow::Error::msg)?;
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, database_file, items_per_page, comments_per_parent, counter_mode",
                key
            );
        }
    }
    Ok(())
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => bail!("Invalid value for {}. Use a positive number.", key),
    }
}
