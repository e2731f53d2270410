pub mod container_id;
pub mod error;
pub mod fingerprint;
pub mod recipe;
