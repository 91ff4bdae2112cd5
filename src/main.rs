//! CLI Entry Point for labstate
//!
//! Provides command-line access to a lab state file:
//! - Inspecting its hosts, benches, instruments, devices and connections
//! - Verifying its content digest
//! - Upgrading an older schema version in place
//! - Creating an empty state file
//!
//! # Usage
//!
//! ```bash
//! labstate show
//! labstate verify --path /home/jupyter/labstate.json
//! labstate migrate --path old-labstate.json
//! ```
//!
//! Without `--path`, the file is resolved from `config/labstate.toml` and the
//! `LABSTATE_` environment variables.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use labstate::config::LabConfig;
use labstate::state::{LabState, SaveOptions, SaveOutcome};
use labstate::tracing_init;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "labstate")]
#[command(about = "Inspect and maintain the lab state file", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = labstate::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the contents of the state file
    Show {
        /// State file (defaults to the configured path)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Check the stored digest against the file content
    Verify {
        /// State file (defaults to the configured path)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Load an older state file and rewrite it at the current schema version
    Migrate {
        /// State file (defaults to the configured path)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Create an empty state file if none exists
    Init {
        /// State file (defaults to the configured path)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LabConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing_init::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let resolve = |path: Option<PathBuf>| path.unwrap_or_else(|| config.resolve_state_path());

    match cli.command {
        Commands::Show { path } => show(resolve(path), &config),
        Commands::Verify { path } => verify(resolve(path)),
        Commands::Migrate { path } => migrate(resolve(path), &config),
        Commands::Init { path } => init(resolve(path), &config),
    }
}

fn show(path: PathBuf, config: &LabConfig) -> Result<()> {
    let lab = LabState::load_with(
        &path,
        labstate::state::LoadOptions {
            verify_hash: config.storage.verify_hash,
        },
    )
    .with_context(|| format!("loading {}", path.display()))?;

    let meta = lab.metadata();
    println!("{}", path.display());
    println!(
        "  version {} saved by {} on {}",
        meta.version,
        meta.user.as_deref().unwrap_or("?"),
        meta.datetime.as_deref().unwrap_or("?")
    );
    println!();

    println!("Hosts ({})", lab.hosts().len());
    for host in lab.hosts().values() {
        let marker = if host.is_local { " [local]" } else { "" };
        println!(
            "  {}{} {}",
            host.name,
            marker,
            host.hostname.as_deref().unwrap_or("")
        );
    }

    println!("Benches ({})", lab.benches().len());
    for bench in lab.benches().values() {
        println!("  {}", bench.name);
    }

    println!("Instruments ({})", lab.instruments().len());
    for instrument in lab.instruments().values() {
        println!(
            "  {} bench={} host={} driver={} ports={:?}",
            instrument.name,
            instrument.bench.as_deref().unwrap_or("-"),
            instrument.host.as_deref().unwrap_or("-"),
            instrument.driver.as_deref().unwrap_or("-"),
            instrument.ports
        );
    }

    println!("Devices ({})", lab.devices().len());
    for device in lab.devices().values() {
        println!(
            "  {} bench={} ports={:?}",
            device.name,
            device.bench.as_deref().unwrap_or("-"),
            device.ports
        );
    }

    println!("Connections ({})", lab.connections().len());
    for connection in lab.connections() {
        println!("  {connection}");
    }
    Ok(())
}

fn verify(path: PathBuf) -> Result<()> {
    let report =
        LabState::verify(&path).with_context(|| format!("reading {}", path.display()))?;
    println!("file:     {}", path.display());
    println!("version:  {}", report.version);
    println!("stored:   {}", report.stored);
    println!("computed: {}", report.computed);
    if !report.is_intact() {
        bail!("{} is corrupted", path.display());
    }
    println!("OK");
    Ok(())
}

fn migrate(path: PathBuf, config: &LabConfig) -> Result<()> {
    let before = LabState::verify(&path)
        .with_context(|| format!("reading {}", path.display()))?
        .version;
    let mut lab = LabState::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let backup = lab.write_unchecked(&path, &SaveOptions::from_config(config).with_backup(true))?;
    println!(
        "Rewrote {} from version {} to version {}",
        path.display(),
        before,
        lab.metadata().version
    );
    if let Some(backup) = backup {
        println!("Previous contents kept in {}", backup.display());
    }
    Ok(())
}

fn init(path: PathBuf, config: &LabConfig) -> Result<()> {
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    let mut lab = LabState::new();
    match lab.save_with(&path, &SaveOptions::from_config(config))? {
        SaveOutcome::FirstWrite => println!("Created {}", path.display()),
        other => println!("{}: {:?}", path.display(), other),
    }
    Ok(())
}
