//! Global fingerprint index.
//!
//! [`IndexStore`] is the untrusted persistent side; [`IndexCodec`] is the
//! trusted side that blinds keys and seals values before they cross.

pub mod codec;
pub mod store;

pub use codec::{FeatureHit, IndexCodec};
pub use store::{IndexStore, KvIndexStore, INDEX_KEY};
