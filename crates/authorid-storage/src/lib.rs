//! Storage layer for authorid
//!
//! This crate provides the corpus reader and the artifact stores the training
//! pipeline persists models to.
//!
//! - [`JsonCorpus`]: JSON / JSON-lines message export
//! - [`FsArtifactStore`]: one directory per artifact, written atomically
//! - [`InMemoryArtifactStore`], [`MemoryCorpus`]: in-memory backends for tests

pub mod corpus;
pub mod fs;
pub mod memory;

pub use corpus::JsonCorpus;
pub use fs::FsArtifactStore;
pub use memory::{InMemoryArtifactStore, MemoryCorpus};

use sha2::{Digest, Sha256};

/// Hex SHA-256 digest of a component.
pub(crate) fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
