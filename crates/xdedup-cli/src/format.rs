use xdedup_core::pipeline::StatsSnapshot;

pub(crate) fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

/// Multi-line session summary.
pub(crate) fn format_stats(stats: &StatsSnapshot) -> String {
    let ratio = if stats.stored_bytes == 0 {
        "-".to_string()
    } else {
        format!("{:.2}x", stats.dedup_ratio())
    };
    format!(
        "Files:       {}\n\
         Read:        {} in {} chunks\n\
         Duplicates:  {} (cache {}, index {}, in-session {})\n\
         Unique:      {} chunks, {} ({} as deltas)\n\
         Stored:      {} in {} containers\n\
         Ratio:       {ratio}",
        stats.files,
        format_bytes(stats.logical_bytes),
        stats.chunks,
        stats.duplicate_chunks(),
        stats.cache_hits,
        stats.index_hits,
        stats.pending_duplicates,
        stats.unique_chunks,
        format_bytes(stats.unique_bytes),
        stats.delta_chunks,
        format_bytes(stats.stored_bytes),
        stats.containers_sealed,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_pick_the_largest_unit() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.50 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.00 MiB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GiB");
    }

    #[test]
    fn empty_session_has_no_ratio() {
        let text = format_stats(&StatsSnapshot::default());
        assert!(text.contains("Ratio:       -"));
        assert!(text.contains("Files:       0"));
    }
}
