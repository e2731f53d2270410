use std::path::Path;

use xdedup_core::config::XdedupConfig;

use super::open_site;
use crate::format::format_bytes;

pub(crate) fn run(
    config: &XdedupConfig,
    site_dir: &str,
    name: &str,
    out: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    if out.exists() {
        return Err(format!("refusing to overwrite {}", out.display()).into());
    }
    let site = open_site(site_dir, config)?;
    let written = match site.restore_to_path(name, out) {
        Ok(n) => n,
        Err(e) => {
            let _ = std::fs::remove_file(out);
            return Err(e.into());
        }
    };
    println!("Restored {name} to {} ({})", out.display(), format_bytes(written));
    Ok(())
}
