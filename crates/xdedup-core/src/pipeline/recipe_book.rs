use std::collections::HashMap;
use std::sync::Mutex;

use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

/// One position of a file's recipe as Phase 2 saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Already stored in a sealed container.
    Resolved(RecipeEntry),
    /// Stored in this session; the writer knows where.
    Pending(Fingerprint),
}

/// Recipes under construction, filled by Phase 2 and finalized by the
/// destination writer once the file's end marker reaches it.
#[derive(Default)]
pub struct RecipeBook {
    files: Mutex<HashMap<u64, Vec<Slot>>>,
}

impl RecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&self, file_id: u64, slots: impl IntoIterator<Item = Slot>) {
        self.files
            .lock()
            .unwrap()
            .entry(file_id)
            .or_default()
            .extend(slots);
    }

    /// Remove and return a file's slots. A file with no chunks yields none.
    pub fn take_file(&self, file_id: u64) -> Vec<Slot> {
        self.files
            .lock()
            .unwrap()
            .remove(&file_id)
            .unwrap_or_default()
    }

    /// Files with slots but no end marker yet.
    pub fn open_files(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}
