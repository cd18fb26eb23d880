use anyhow::{Context, Result};
use clap::Parser;
use fuser::MountOption;

use faultfs::backend::Backend;
use faultfs::config::{self, Cli};
use faultfs::logging;
use faultfs::oracle::SystemRandomSource;
use faultfs::shim::FaultInjectingFs;
use faultfs::stats::Ledger;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load(&cli).context("failed to load configuration")?;

    logging::init(&config.settings.log_file, config.settings.log_level);
    log::info!("faultfs initializing");
    log::info!("using storage path: {}", config.settings.storage_path.display());

    std::fs::create_dir_all(&config.settings.storage_path)
        .with_context(|| format!("failed to create storage path {}", config.settings.storage_path.display()))?;

    let mut plan = config.plan;
    plan.enabled = config.settings.enable_fault_injection;

    let backend = Backend::new(&config.settings.storage_path);
    let ledger = Ledger::new();
    let oracle = Box::new(SystemRandomSource::new());
    let fs = FaultInjectingFs::new(backend, plan, ledger, oracle);

    let mut options = vec![MountOption::FSName("faultfs".to_string())];
    if cli.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    if cli.allow_root {
        options.push(MountOption::AllowRoot);
    }

    fuser::mount2(fs, &config.settings.mount_point, &options)
        .with_context(|| format!("failed to mount at {}", config.settings.mount_point.display()))?;

    Ok(())
}
