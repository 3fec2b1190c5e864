//! # corpora-storage
//!
//! Reference backends for the storage seams defined in `corpora-core`:
//!
//! - [`MemoryVectorStore`]: per-namespace cosine k-NN over in-memory vectors
//! - [`MemoryMetadataStore`]: the relational system of record behind a
//!   single lock, giving each trait method transaction semantics
//! - [`MemoryBlobStore`]: content-addressed blob storage
//!
//! Production deployments swap these for adapters over real stores; the
//! rest of the workspace only sees the traits.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Content-addressed blob storage
pub mod blob;

/// Relational metadata storage
pub mod metadata;

/// Namespaced vector storage
pub mod vector;

pub use blob::MemoryBlobStore;
pub use metadata::MemoryMetadataStore;
pub use vector::MemoryVectorStore;
