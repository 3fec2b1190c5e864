//! # corpora-core
//!
//! Core building blocks shared by every corpora crate:
//!
//! - `identity`: the single mint point for opaque entity identifiers,
//!   with a deterministic mode for tests and reserved mock constants
//! - `error`: the workspace error taxonomy and its mapping to logical
//!   status codes
//! - `types`: collections, documents, chunks, conversation entities,
//!   per-user configuration records, and vector entry/query/result types
//! - `traits`: the storage seams (`VectorStore`, `MetadataStore`,
//!   `BlobStore`) that concrete backends implement
//!
//! Nothing in this crate performs I/O; it defines the vocabulary the
//! rest of the workspace speaks.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Identifier allocation and reserved constants
pub mod identity;

/// Error taxonomy and status codes
pub mod error;

/// Entity and storage data types
pub mod types;

/// Storage trait definitions
pub mod traits;

pub use error::{Error, Result, StatusCode};
pub use identity::{
    CollectionId, CorrelationId, DocumentId, JobId, MessageId, SessionId, SummaryId, UserId,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
