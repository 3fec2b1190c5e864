//! # corpora-config
//!
//! Per-user configuration resolution. Every search begins by resolving
//! the requesting user into a frozen [`ConfigSnapshot`]: the user's
//! generation parameters, prompt templates, and pipeline defaults,
//! materialized once and never re-read mid-request.
//!
//! Resolution is self-healing: a user with no profile, or a profile
//! missing template slots, gets the missing pieces created atomically on
//! first contact. A user that cannot be materialized surfaces
//! `Error::Configuration` and leaves nothing half-written.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Default template texts
pub mod templates;

/// Resolution service and snapshots
pub mod resolver;

pub use resolver::{ConfigService, ConfigSnapshot};
pub use templates::default_template;
