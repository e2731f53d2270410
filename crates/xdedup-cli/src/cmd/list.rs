use xdedup_core::config::XdedupConfig;

use super::open_site;

pub(crate) fn run(config: &XdedupConfig, site_dir: &str) -> Result<(), Box<dyn std::error::Error>> {
    let site = open_site(site_dir, config)?;
    for name in site.list_files()? {
        println!("{name}");
    }
    Ok(())
}
