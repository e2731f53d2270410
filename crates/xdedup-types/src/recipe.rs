use serde::{Deserialize, Serialize};

use crate::container_id::ContainerId;

/// Where a chunk's stored bytes live: `(container, offset, length)`.
///
/// `offset` is relative to the start of the container body and always refers
/// to the container that actually stores the chunk. `length` is the stored
/// (ciphertext) length; the chunk's IV immediately follows it in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecipeEntry {
    pub container_id: ContainerId,
    pub offset: u32,
    pub length: u32,
}

/// Reconstruction recipe of a single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    pub size: u64,
    pub entries: Vec<RecipeEntry>,
}

impl Recipe {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            entries: Vec::new(),
        }
    }
}
