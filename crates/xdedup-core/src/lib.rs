pub mod cache;
pub mod chunker;
pub mod compress;
pub mod config;
pub mod container;
pub mod delta;
pub mod features;
pub mod index;
pub mod pipeline;
pub mod recipe;
pub mod restore;
pub mod site;
pub mod trusted;

pub use xdedup_types::error;

#[cfg(test)]
mod tests;
#[doc(hidden)]
pub mod testutil;
