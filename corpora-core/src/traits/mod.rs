//! Storage trait definitions
//!
//! Concrete backends (in-memory reference implementations in
//! `corpora-storage`, or external stores in a deployment) implement
//! these seams; everything above them is backend-agnostic.

pub mod blob_store;
pub mod metadata_store;
pub mod vector_store;

pub use blob_store::{content_address, BlobRef, BlobStore};
pub use metadata_store::{CollectionFilter, CollectionSortBy, MetadataStore, Page};
pub use vector_store::VectorStore;
