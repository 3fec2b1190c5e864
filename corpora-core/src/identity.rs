//! Centralized identifier allocation.
//!
//! Every entity ID in the workspace is minted here and nowhere else.
//! IDs are opaque 128-bit values wrapped in per-entity newtypes so a
//! `DocumentId` can never be passed where a `SessionId` is expected.
//!
//! Tests that need stable IDs enable deterministic mode, which hands out
//! a monotonically increasing sequence instead of random UUIDs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

static DETERMINISTIC: AtomicBool = AtomicBool::new(false);
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh opaque identifier.
///
/// This is the only function in the workspace permitted to create new
/// identifier values.
#[must_use]
pub fn new_id() -> Uuid {
    if DETERMINISTIC.load(Ordering::Relaxed) {
        let n = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Uuid::from_u128(u128::from(n))
    } else {
        Uuid::new_v4()
    }
}

/// Switch the allocator into deterministic mode, restarting the sequence.
///
/// Intended for tests; IDs become `Uuid::from_u128(1)`, `from_u128(2)`, ...
pub fn set_deterministic(enabled: bool) {
    DETERMINISTIC.store(enabled, Ordering::Relaxed);
    if enabled {
        SEQUENCE.store(1, Ordering::Relaxed);
    }
}

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Allocate a new unique identifier
            #[must_use]
            pub fn new() -> Self {
                Self(new_id())
            }

            /// Wrap an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Access the underlying UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

entity_id!(
    /// Identifies a tenant user
    UserId
);
entity_id!(
    /// Identifies a document collection
    CollectionId
);
entity_id!(
    /// Identifies a document within a collection
    DocumentId
);
entity_id!(
    /// Identifies a conversation session
    SessionId
);
entity_id!(
    /// Identifies a message within a session
    MessageId
);
entity_id!(
    /// Identifies a conversation summary
    SummaryId
);
entity_id!(
    /// Identifies a scheduled job
    JobId
);
entity_id!(
    /// Correlates the log lines, metrics, and persisted metadata of one request
    CorrelationId
);

/// Reserved identifiers used by development fixtures.
///
/// These values are stable across runs and never collide with allocated
/// IDs in deterministic mode (the sequence starts at 1; mocks live in a
/// high, fixed range).
pub mod mock {
    use super::{CollectionId, SessionId, UserId};
    use uuid::Uuid;

    const MOCK_BASE: u128 = 0xC0_4B04A_0000;

    /// The development fixture user
    #[must_use]
    pub const fn user_id() -> UserId {
        UserId::from_uuid(Uuid::from_u128(MOCK_BASE + 1))
    }

    /// The development fixture collection
    #[must_use]
    pub const fn collection_id() -> CollectionId {
        CollectionId::from_uuid(Uuid::from_u128(MOCK_BASE + 2))
    }

    /// The development fixture session
    #[must_use]
    pub const fn session_id() -> SessionId {
        SessionId::from_uuid(Uuid::from_u128(MOCK_BASE + 3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = DocumentId::new();
        let b = DocumentId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn id_round_trips_through_string() {
        let id = SessionId::new();
        let parsed = SessionId::from_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn mock_ids_are_stable() {
        assert_eq!(mock::user_id(), mock::user_id());
        assert_ne!(
            mock::user_id().as_uuid(),
            mock::collection_id().as_uuid()
        );
    }
}
