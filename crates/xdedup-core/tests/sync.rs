use std::sync::Arc;

use xdedup_core::error::XdedupError;
use xdedup_core::pipeline::FileInput;
use xdedup_core::site::Site;
use xdedup_core::testutil::{
    memory_site, open_site, pseudo_random, small_config, CountingBackend,
};
use xdedup_crypto::key::SessionKeys;
use xdedup_storage::{MemoryBackend, StorageBackend};

/// A site whose container reads are counted.
fn counted_site() -> (Site, Arc<CountingBackend>) {
    let storage = Arc::new(CountingBackend::new(
        Arc::new(MemoryBackend::new()),
        "containers/",
    ));
    let shared: Arc<dyn StorageBackend> = storage.clone();
    (open_site(shared, small_config()), storage)
}

#[test]
fn sync_sends_only_content_the_destination_lacks() {
    let source = memory_site(small_config());
    let dest = memory_site(small_config());
    let shared = pseudo_random(1, 120_000);
    let novel = pseudo_random(2, 60_000);

    source
        .upload(vec![
            FileInput::bytes("shared", shared.clone()),
            FileInput::bytes("novel", novel.clone()),
        ])
        .unwrap();
    dest.upload(vec![FileInput::bytes("local-copy", shared.clone())])
        .unwrap();

    let names = vec!["shared".to_string(), "novel".to_string()];
    let report = dest.sync_from(&source, &names).unwrap();

    assert!(report.completed);
    let mut files = report.files.clone();
    files.sort();
    assert_eq!(files, vec!["novel", "shared"]);
    assert_eq!(report.stats.logical_bytes, (shared.len() + novel.len()) as u64);
    assert!(report.stats.unique_bytes <= novel.len() as u64);
    assert!(report.stats.cache_hits + report.stats.index_hits > 0);

    assert_eq!(dest.restore("shared").unwrap(), shared);
    assert_eq!(dest.restore("novel").unwrap(), novel);
    assert_eq!(
        dest.list_files().unwrap(),
        vec!["local-copy", "novel", "shared"]
    );
}

#[test]
fn sync_of_unknown_file_fails_in_read_phase() {
    let source = memory_site(small_config());
    let dest = memory_site(small_config());
    let err = dest
        .sync_from(&source, &["nope".to_string()])
        .unwrap_err();
    match err {
        XdedupError::PhaseFailed { phase, source } => {
            assert_eq!(phase, "read");
            assert!(matches!(*source, XdedupError::RecipeNotFound(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(dest.list_files().unwrap().is_empty());
}

#[test]
fn sync_of_held_content_reads_only_source_metadata() {
    let (source, reads) = counted_site();
    let dest = memory_site(small_config());
    let data = pseudo_random(3, 200_000);
    source
        .upload(vec![FileInput::bytes("f", data.clone())])
        .unwrap();
    dest.upload(vec![FileInput::bytes("f-local", data.clone())])
        .unwrap();
    let source_containers = source.repository().list().unwrap().len();

    reads.reset();
    let report = dest.sync_from(&source, &["f".to_string()]).unwrap();

    assert!(report.completed);
    assert_eq!(report.stats.unique_chunks, 0);
    assert_eq!(report.stats.logical_bytes, data.len() as u64);
    // A length prefix and one metadata read per source container, no chunk reads.
    assert!(reads.reads() <= 2 * source_containers, "{} reads", reads.reads());
    assert!((reads.reads() as u64) < report.stats.chunks);
    assert_eq!(dest.restore("f").unwrap(), data);
}

#[test]
fn sync_fetches_novel_chunks_from_the_source() {
    let (source, reads) = counted_site();
    let dest = memory_site(small_config());
    let data = pseudo_random(4, 150_000);
    source
        .upload(vec![FileInput::bytes("f", data.clone())])
        .unwrap();

    reads.reset();
    let report = dest.sync_from(&source, &["f".to_string()]).unwrap();

    assert!(report.completed);
    assert_eq!(report.stats.unique_chunks, report.stats.chunks);
    assert!(reads.reads() as u64 >= report.stats.unique_chunks);
    assert_eq!(dest.restore("f").unwrap(), data);
}

#[test]
fn sync_between_sites_with_different_keys_still_copies() {
    let source = memory_site(small_config());
    let dest = Site::open(
        Arc::new(MemoryBackend::new()),
        small_config(),
        SessionKeys::derive(&[0x11; 32]),
    )
    .unwrap();
    let data = pseudo_random(5, 90_000);
    source
        .upload(vec![FileInput::bytes("f", data.clone())])
        .unwrap();
    dest.upload(vec![FileInput::bytes("f-local", data.clone())])
        .unwrap();
    assert!(!dest.shares_fingerprint_key(&source).unwrap());

    let report = dest.sync_from(&source, &["f".to_string()]).unwrap();
    assert!(report.completed);
    // Re-fingerprinted with the destination's key, so its own copy still matches.
    assert_eq!(report.stats.unique_chunks, 0);
    assert_eq!(dest.restore("f").unwrap(), data);
}

#[test]
fn sync_from_containers_without_metadata_decodes_each_chunk() {
    let mut config = small_config();
    config.container.metadata_session = false;
    let source = memory_site(config);
    let dest = memory_site(small_config());
    let data = pseudo_random(6, 80_000);
    source
        .upload(vec![FileInput::bytes("f", data.clone())])
        .unwrap();

    let report = dest.sync_from(&source, &["f".to_string()]).unwrap();
    assert!(report.completed);
    assert_eq!(report.stats.logical_bytes, data.len() as u64);
    assert_eq!(dest.restore("f").unwrap(), data);
}
