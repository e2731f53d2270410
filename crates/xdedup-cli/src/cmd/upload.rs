use std::path::Path;

use xdedup_core::config::XdedupConfig;
use xdedup_core::pipeline::{CancelToken, FileInput};

use super::open_site;
use crate::format::format_stats;
use crate::signal::cancel_on_signal;

pub(crate) fn run(
    config: &XdedupConfig,
    site_dir: &str,
    files: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    for file in files {
        if !Path::new(file).is_file() {
            return Err(format!("not a file: {file}").into());
        }
    }
    let site = open_site(site_dir, config)?;
    let inputs = files
        .iter()
        .map(|f| FileInput::path(f.as_str(), f.as_str()))
        .collect();

    let cancel = CancelToken::new();
    let report = cancel_on_signal(&cancel, || site.upload_with_cancel(inputs, cancel.clone()))?;

    for name in &report.files {
        println!("Stored {name}");
    }
    println!("{}", format_stats(&report.stats));
    if report.cancelled {
        return Err(format!(
            "interrupted: {} of {} files stored",
            report.files.len(),
            files.len()
        )
        .into());
    }
    if !report.completed {
        return Err("session ended before everything was committed".into());
    }
    Ok(())
}
