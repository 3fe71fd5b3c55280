//! Config command - show or persist the effective configuration

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use fathom_audio::AudioConfig;
use fathom_audio::config::{CONFIG_FILE, config_dir, save, save_to};

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Write the configuration to the config directory
    #[arg(long)]
    pub write: bool,

    /// Write to this file instead of the config directory
    #[arg(long, requires = "write")]
    pub to: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs, config: &AudioConfig) -> Result<()> {
    if !args.write {
        match config_dir() {
            Some(dir) => println!("# {}", dir.join(CONFIG_FILE).display()),
            None => println!("# no config directory on this platform"),
        }
        print!("{}", toml::to_string_pretty(config)?);
        return Ok(());
    }

    let path = match args.to {
        Some(path) => {
            save_to(config, &path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            path
        }
        None => save(config)?.context("No config directory on this platform")?,
    };
    println!("Wrote {}", path.display());
    Ok(())
}
