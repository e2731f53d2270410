use tracing::{info, warn};
use xdedup_core::config::XdedupConfig;
use xdedup_core::pipeline::CancelToken;
use xdedup_core::site::KEYS_KEY;
use xdedup_storage::StorageBackend;

use super::{open_site, open_storage};
use crate::format::format_stats;
use crate::signal::cancel_on_signal;

pub(crate) fn run(
    config: &XdedupConfig,
    from: &str,
    to: &str,
    names: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    match adopt_source_keys(open_storage(from)?.as_ref(), open_storage(to)?.as_ref())
        .map_err(|e| format!("{from}: {e}"))?
    {
        KeyAdoption::Adopted => {
            info!(source = from, dest = to, "destination adopted source site keys")
        }
        KeyAdoption::Shared => {}
        KeyAdoption::Distinct => {
            warn!(source = from, dest = to, "sites hold different keys");
            eprintln!(
                "Warning: {to} has its own keys; no content is shared with {from} and every chunk will be resent"
            );
        }
    }
    let source = open_site(from, config)?;
    let dest = open_site(to, config)?;

    let names = if names.is_empty() {
        source.list_files()?
    } else {
        names.to_vec()
    };
    if names.is_empty() {
        println!("Nothing to sync");
        return Ok(());
    }

    let cancel = CancelToken::new();
    let report = cancel_on_signal(&cancel, || {
        dest.sync_from_with_cancel(&source, &names, cancel.clone())
    })?;

    for name in &report.files {
        println!("Synced {name}");
    }
    println!("{}", format_stats(&report.stats));
    if report.cancelled {
        return Err(format!(
            "interrupted: {} of {} files synced",
            report.files.len(),
            names.len()
        )
        .into());
    }
    Ok(())
}

/// What `sync` found at the destination before opening it.
#[derive(Debug, PartialEq, Eq)]
enum KeyAdoption {
    Adopted,
    Shared,
    /// The destination has keys of its own; fingerprints will not match and
    /// every source chunk is read and resent.
    Distinct,
}

/// A destination without keys takes the source's wrapped keys, so both sites
/// fingerprint identically and content already present is never resent.
fn adopt_source_keys(
    source: &dyn StorageBackend,
    dest: &dyn StorageBackend,
) -> Result<KeyAdoption, Box<dyn std::error::Error>> {
    let Some(blob) = source.get(KEYS_KEY)? else {
        return Err("source is not a site: no keys found".into());
    };
    match dest.get(KEYS_KEY)? {
        None => {
            dest.put(KEYS_KEY, &blob)?;
            Ok(KeyAdoption::Adopted)
        }
        Some(existing) if existing == blob => Ok(KeyAdoption::Shared),
        Some(_) => Ok(KeyAdoption::Distinct),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdedup_storage::MemoryBackend;

    #[test]
    fn empty_destination_adopts_source_keys() {
        let source = MemoryBackend::new();
        let dest = MemoryBackend::new();
        source.put(KEYS_KEY, b"wrapped").unwrap();

        assert_eq!(adopt_source_keys(&source, &dest).unwrap(), KeyAdoption::Adopted);
        assert_eq!(dest.get(KEYS_KEY).unwrap().unwrap(), b"wrapped");
        assert_eq!(adopt_source_keys(&source, &dest).unwrap(), KeyAdoption::Shared);
    }

    #[test]
    fn destination_keys_are_kept_and_reported_when_they_differ() {
        let source = MemoryBackend::new();
        let dest = MemoryBackend::new();
        source.put(KEYS_KEY, b"wrapped-a").unwrap();
        dest.put(KEYS_KEY, b"wrapped-b").unwrap();

        assert_eq!(adopt_source_keys(&source, &dest).unwrap(), KeyAdoption::Distinct);
        assert_eq!(dest.get(KEYS_KEY).unwrap().unwrap(), b"wrapped-b");
    }

    #[test]
    fn source_without_keys_is_refused() {
        let source = MemoryBackend::new();
        let dest = MemoryBackend::new();
        assert!(adopt_source_keys(&source, &dest).is_err());
        assert!(!dest.exists(KEYS_KEY).unwrap());
    }
}
