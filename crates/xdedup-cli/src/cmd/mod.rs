pub(crate) mod list;
pub(crate) mod restore;
pub(crate) mod sync;
pub(crate) mod upload;

use std::path::Path;
use std::sync::Arc;

use xdedup_core::config::XdedupConfig;
use xdedup_core::site::{load_or_create_keys, Site};
use xdedup_storage::{LocalBackend, StorageBackend};

use crate::cli::Commands;
use crate::passphrase::site_passphrase;

pub(crate) fn dispatch(
    command: &Commands,
    config: &XdedupConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Upload { site, files } => upload::run(config, site, files),
        Commands::Restore { site, name, out } => restore::run(config, site, name, Path::new(out)),
        Commands::Sync { from, to, names } => sync::run(config, from, to, names),
        Commands::List { site } => list::run(config, site),
        Commands::Config { .. } => Ok(()),
    }
}

pub(crate) fn open_storage(dir: &str) -> Result<Arc<dyn StorageBackend>, Box<dyn std::error::Error>> {
    Ok(Arc::new(LocalBackend::open(dir)?))
}

/// Open the site at `dir`, creating its keys on first use.
pub(crate) fn open_site(
    dir: &str,
    config: &XdedupConfig,
) -> Result<Site, Box<dyn std::error::Error>> {
    let storage = open_storage(dir)?;
    let passphrase = site_passphrase(storage.as_ref(), dir)?;
    let keys = load_or_create_keys(storage.as_ref(), &passphrase)?;
    Ok(Site::open(storage, config.clone(), keys)?)
}
