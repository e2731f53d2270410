use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use xdedup_storage::{MemoryBackend, StorageBackend};
use xdedup_types::error::{ErrorKind, Result, XdedupError};

use crate::config::{BoundaryMode, DedupStrategy};
use crate::container::ContainerRepository;
use crate::index::KvIndexStore;
use crate::pipeline::{
    CancelToken, ChunkSource, FileHeader, FileInput, FileSource, SourceChunk, SyncSession,
};
use crate::recipe::RecipeStore;
use crate::testutil::{memory_site, pseudo_random, small_config, test_keys, InstrumentedIndex};
use crate::trusted::{self, EnclaveClient, InProcessBoundary, TrustedBoundary, TrustedModule};

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[test]
fn upload_then_restore_returns_original_bytes() {
    let site = memory_site(small_config());
    let a = pseudo_random(1, 150_000);
    let mut c = a.clone();
    c.extend_from_slice(&pseudo_random(2, 30_000));

    let report = site
        .upload(vec![
            FileInput::bytes("a", a.clone()),
            FileInput::bytes("empty", Vec::new()),
            FileInput::bytes("c", c.clone()),
        ])
        .unwrap();

    assert!(report.completed);
    assert!(!report.cancelled);
    assert_eq!(sorted(report.files), vec!["a", "c", "empty"]);
    assert_eq!(report.stats.files, 3);
    assert_eq!(report.stats.logical_bytes, (a.len() + c.len()) as u64);
    assert!(report.stats.pending_duplicates > 0);
    assert!(report.stats.containers_sealed >= 2);

    assert_eq!(site.restore("a").unwrap(), a);
    assert_eq!(site.restore("c").unwrap(), c);
    assert!(site.restore("empty").unwrap().is_empty());
    assert_eq!(site.list_files().unwrap(), vec!["a", "c", "empty"]);
}

#[test]
fn second_upload_of_same_bytes_stores_nothing() {
    let site = memory_site(small_config());
    let data = pseudo_random(3, 100_000);
    site.upload(vec![FileInput::bytes("first", data.clone())])
        .unwrap();
    let containers = site.repository().list().unwrap().len();

    let report = site
        .upload(vec![FileInput::bytes("second", data.clone())])
        .unwrap();
    assert_eq!(report.stats.unique_chunks, 0);
    assert_eq!(report.stats.stored_bytes, 0);
    assert_eq!(report.stats.containers_sealed, 0);
    assert_eq!(report.stats.duplicate_chunks(), report.stats.chunks);
    assert!(report.stats.cache_hits > 0);
    assert_eq!(site.repository().list().unwrap().len(), containers);
    assert_eq!(site.restore("second").unwrap(), data);
}

#[test]
fn repeats_within_a_session_are_stored_once() {
    let site = memory_site(small_config());
    let data = pseudo_random(4, 80_000);
    let report = site
        .upload(vec![
            FileInput::bytes("x", data.clone()),
            FileInput::bytes("y", data.clone()),
        ])
        .unwrap();

    let per_file = report.stats.chunks / 2;
    assert_eq!(report.stats.unique_chunks, per_file);
    assert_eq!(report.stats.pending_duplicates, per_file);
    assert_eq!(site.restore("y").unwrap(), data);
}

#[test]
fn small_edits_are_stored_as_deltas() {
    let site = memory_site(small_config());
    let base = pseudo_random(5, 200_000);
    site.upload(vec![FileInput::bytes("base", base.clone())])
        .unwrap();

    let mut edited = base.clone();
    for at in [20_000, 90_000, 160_000] {
        edited[at..at + 16].copy_from_slice(&[0xEE; 16]);
    }
    let report = site
        .upload(vec![FileInput::bytes("edited", edited.clone())])
        .unwrap();

    assert!(report.stats.delta_chunks >= 1, "{:?}", report.stats);
    assert!(report.stats.stored_bytes < report.stats.unique_bytes);
    assert_eq!(site.restore("edited").unwrap(), edited);
}

#[test]
fn naive_strategy_over_isolated_boundary() {
    let mut config = small_config();
    config.pipeline.strategy = DedupStrategy::Naive;
    config.security.boundary = BoundaryMode::Isolated;
    let site = memory_site(config);
    let data = pseudo_random(6, 70_000);
    let report = site
        .upload(vec![
            FileInput::bytes("one", data.clone()),
            FileInput::bytes("two", data.clone()),
        ])
        .unwrap();
    assert!(report.completed);
    assert_eq!(site.restore("two").unwrap(), data);
}

#[test]
fn cancelled_session_commits_nothing_unread() {
    let site = memory_site(small_config());
    let cancel = CancelToken::new();
    cancel.cancel();
    let report = site
        .upload_with_cancel(
            vec![FileInput::bytes("never", pseudo_random(7, 10_000))],
            cancel,
        )
        .unwrap();
    assert!(report.cancelled);
    assert!(report.files.is_empty());
    assert_eq!(report.stats.chunks, 0);
    assert!(site.list_files().unwrap().is_empty());
}

#[test]
fn index_count_mismatch_aborts_without_committing() {
    let config = small_config();
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let repo = Arc::new(ContainerRepository::new(storage.clone()));
    let inner = Arc::new(KvIndexStore::open(storage.clone()).unwrap());
    let index = Arc::new(InstrumentedIndex::new(inner));
    index.drop_batch_results();
    let client = trusted::launch(&config, test_keys(), index.clone(), repo.clone()).unwrap();
    let recipes = RecipeStore::new(storage.clone());

    let mut source = FileSource::new(
        &config.chunker,
        vec![FileInput::bytes("doomed", pseudo_random(8, 100_000))],
    )
    .unwrap();
    let err = SyncSession::new(&config, client, repo.clone(), index, recipes.clone())
        .run(&mut source)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    match err {
        XdedupError::PhaseFailed { phase, source } => {
            assert_eq!(phase, "dedup");
            assert!(matches!(*source, XdedupError::IndexCountMismatch { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(recipes.list().unwrap().is_empty());
    assert!(repo.list().unwrap().is_empty());
}

#[test]
fn unknown_file_cannot_be_restored() {
    let site = memory_site(small_config());
    let err = site.restore("missing").unwrap_err();
    assert!(matches!(err, XdedupError::RecipeNotFound(name) if name == "missing"));
}

/// Cancels `token` once `after` bytes of the second file have been read.
struct CancelInSecondFile {
    inner: FileSource,
    token: CancelToken,
    after: u64,
    file: usize,
    read: u64,
}

impl ChunkSource for CancelInSecondFile {
    fn next_file(&mut self) -> Result<Option<FileHeader>> {
        let header = self.inner.next_file()?;
        if header.is_some() {
            self.file += 1;
            self.read = 0;
        }
        Ok(header)
    }

    fn next_chunk(&mut self) -> Result<Option<SourceChunk>> {
        let chunk = self.inner.next_chunk()?;
        if let Some(c) = &chunk {
            self.read += c.len();
            if self.file == 2 && self.read >= self.after {
                self.token.cancel();
            }
        }
        Ok(chunk)
    }
}

#[test]
fn cancel_mid_file_commits_only_finished_files() {
    let site = memory_site(small_config());
    let f0 = pseudo_random(20, 60_000);
    let token = CancelToken::new();
    let mut source = CancelInSecondFile {
        inner: FileSource::new(
            &site.config().chunker,
            vec![
                FileInput::bytes("f0", f0.clone()),
                FileInput::bytes("f1", pseudo_random(21, 150_000)),
                FileInput::bytes("f2", pseudo_random(22, 30_000)),
            ],
        )
        .unwrap(),
        token: token.clone(),
        after: 40_000,
        file: 0,
        read: 0,
    };

    let report = site.ingest(&mut source, token).unwrap();

    assert!(report.completed);
    assert!(report.cancelled);
    assert_eq!(report.files, vec!["f0"]);
    assert_eq!(report.stats.files, 1);
    assert_eq!(site.list_files().unwrap(), vec!["f0"]);
    assert_eq!(site.restore("f0").unwrap(), f0);
    assert!(matches!(
        site.restore("f1"),
        Err(XdedupError::RecipeNotFound(_))
    ));
}

/// Forwards a fixed number of calls, then reports the peer gone.
struct ClosingBoundary {
    inner: InProcessBoundary,
    remaining: AtomicUsize,
}

impl TrustedBoundary for ClosingBoundary {
    fn call(&self, request: Vec<u8>) -> Result<Vec<u8>> {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .map_err(|_| XdedupError::PeerClosed)?;
        self.inner.call(request)
    }
}

#[test]
fn peer_close_mid_session_ends_without_committing() {
    let config = small_config();
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
    let repo = Arc::new(ContainerRepository::new(storage.clone()));
    let index = Arc::new(KvIndexStore::open(storage.clone()).unwrap());
    let module = TrustedModule::new(&config, test_keys(), index.clone(), repo.clone());
    let client = EnclaveClient::new(Arc::new(ClosingBoundary {
        inner: InProcessBoundary::new(module),
        remaining: AtomicUsize::new(6),
    }));
    let recipes = RecipeStore::new(storage.clone());

    let mut source = FileSource::new(
        &config.chunker,
        vec![FileInput::bytes("cut-short", pseudo_random(23, 150_000))],
    )
    .unwrap();
    let report = SyncSession::new(&config, client, repo.clone(), index, recipes.clone())
        .run(&mut source)
        .unwrap();

    assert!(!report.completed);
    assert!(!report.cancelled);
    assert!(report.files.is_empty());
    assert!(recipes.list().unwrap().is_empty());
    // At most one batch reached the writer; its container was discarded.
    assert!(repo.list().unwrap().is_empty());
}
