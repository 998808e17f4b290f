//! Configuration view and initialisation: `coderef-scan config`.

use anyhow::Result;
use std::path::Path;

use coderef_scan::config::{CONFIG_FILE, ScanConfig};

use super::super::ConfigCommands;

pub fn cmd_config(work_dir: &Path, config: &ScanConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = work_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("coderef-scan Configuration");
            println!("==========================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found, using defaults.", CONFIG_FILE);
            }
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", toml::to_string_pretty(config)?);
            println!();

            let warnings = config.validate();
            if !warnings.is_empty() {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
                println!();
            }
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            ScanConfig::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] host, port, dev");
            println!("  - [scaffold] script, interpreter");
            println!("  - [scan] extensions, exclude, recursive");
            println!("  - [registry] retention_secs, evict_cancelled");
            println!();
        }
    }

    Ok(())
}
