use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use xdedup_crypto::key::{SessionKeys, WrappedKeys};
use xdedup_storage::StorageBackend;

use crate::config::XdedupConfig;
use crate::container::ContainerRepository;
use crate::error::{Result, XdedupError};
use crate::index::{IndexStore, KvIndexStore};
use crate::pipeline::{
    CancelToken, ChunkSource, FileInput, FileSource, RecipeSource, SessionReport, SyncSession,
};
use crate::recipe::RecipeStore;
use crate::restore;
use crate::trusted::{self, EnclaveClient};

/// Storage key of the passphrase-wrapped site keys.
pub const KEYS_KEY: &str = "keys/sitekey";

/// Load the site's keys, creating and storing fresh ones on first use.
pub fn load_or_create_keys(storage: &dyn StorageBackend, passphrase: &str) -> Result<SessionKeys> {
    match storage.get(KEYS_KEY)? {
        Some(bytes) => {
            let wrapped: WrappedKeys = rmp_serde::from_slice(&bytes)?;
            SessionKeys::from_wrapped(&wrapped, passphrase)
        }
        None => {
            let keys = SessionKeys::generate();
            let wrapped = keys.to_wrapped(passphrase)?;
            storage.put(KEYS_KEY, &rmp_serde::to_vec(&wrapped)?)?;
            info!("generated new site keys");
            Ok(keys)
        }
    }
}

/// One storage location: its containers, recipes, global index and the
/// trusted module that guards them.
pub struct Site {
    config: XdedupConfig,
    storage: Arc<dyn StorageBackend>,
    repository: Arc<ContainerRepository>,
    index: Arc<KvIndexStore>,
    recipes: RecipeStore,
    client: EnclaveClient,
}

impl Site {
    pub fn open(
        storage: Arc<dyn StorageBackend>,
        config: XdedupConfig,
        keys: SessionKeys,
    ) -> Result<Self> {
        config.validate()?;
        let repository = Arc::new(ContainerRepository::new(storage.clone()));
        let index = Arc::new(KvIndexStore::open(storage.clone())?);
        let recipes = RecipeStore::new(storage.clone());
        let client = trusted::launch(&config, keys, index.clone(), repository.clone())?;
        debug!(index_entries = index.len(), boundary = ?config.security.boundary, "site opened");
        Ok(Self {
            config,
            storage,
            repository,
            index,
            recipes,
            client,
        })
    }

    pub fn config(&self) -> &XdedupConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn repository(&self) -> &ContainerRepository {
        &self.repository
    }

    pub fn index(&self) -> &dyn IndexStore {
        self.index.as_ref()
    }

    pub fn recipes(&self) -> &RecipeStore {
        &self.recipes
    }

    pub fn client(&self) -> &EnclaveClient {
        &self.client
    }

    /// A session writing into this site.
    pub fn session(&self) -> SyncSession<'_> {
        SyncSession::new(
            &self.config,
            self.client.clone(),
            self.repository.clone(),
            self.index.clone(),
            self.recipes.clone(),
        )
    }

    pub fn upload(&self, inputs: Vec<FileInput>) -> Result<SessionReport> {
        self.upload_with_cancel(inputs, CancelToken::new())
    }

    pub fn upload_with_cancel(
        &self,
        inputs: Vec<FileInput>,
        cancel: CancelToken,
    ) -> Result<SessionReport> {
        let mut source = FileSource::new(&self.config.chunker, inputs)?;
        self.ingest(&mut source, cancel)
    }

    /// Run an arbitrary source into this site.
    pub fn ingest(&self, source: &mut dyn ChunkSource, cancel: CancelToken) -> Result<SessionReport> {
        self.session().with_cancel(cancel).run(source)
    }

    /// Copy stored files from `source` into this site. Only chunks this site
    /// does not already hold are read from the source and stored.
    pub fn sync_from(&self, source: &Site, names: &[String]) -> Result<SessionReport> {
        self.sync_from_with_cancel(source, names, CancelToken::new())
    }

    pub fn sync_from_with_cancel(
        &self,
        source: &Site,
        names: &[String],
        cancel: CancelToken,
    ) -> Result<SessionReport> {
        let mut reader = RecipeSource::new(
            source.client.clone(),
            source.recipes.clone(),
            source.repository.clone(),
            names.to_vec(),
        )?;
        if !self.shares_fingerprint_key(source)? {
            warn!("sites fingerprint under different keys, decoding every source chunk");
            reader = reader.decode_all();
        }
        self.ingest(&mut reader, cancel)
    }

    /// Whether `other` fingerprints chunks the same way, so fingerprints
    /// stored there are valid here.
    pub fn shares_fingerprint_key(&self, other: &Site) -> Result<bool> {
        Ok(self.client.key_id()? == other.client.key_id()?)
    }

    pub fn restore(&self, name: &str) -> Result<Vec<u8>> {
        restore::restore_file(&self.client, &self.recipes, name)
    }

    /// Restore `name` into a file at `dest`.
    pub fn restore_to_path(&self, name: &str, dest: &Path) -> Result<u64> {
        let file = File::create(dest).map_err(|e| {
            XdedupError::Other(format!("cannot create '{}': {e}", dest.display()))
        })?;
        let mut out = BufWriter::new(file);
        restore::restore_to(&self.client, &self.recipes, name, &mut out)
    }

    pub fn list_files(&self) -> Result<Vec<String>> {
        self.recipes.list()
    }
}
