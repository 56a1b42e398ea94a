//! Last-seen bookkeeping for user identities.
//!
//! [`service::PresenceService`] owns the insert-or-refresh decision and talks to
//! storage only through the [`store::PresenceStore`] port.

use chrono::{DateTime, Utc};

pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use service::PresenceService;
pub use store::{
    FaultPoint, MemoryPresenceStore, PostgresPresenceStore, PresenceConnection, PresenceStore,
    StoreError,
};

/// One user's most recent activity time. At most one exists per `user_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: String,
    pub last_seen: DateTime<Utc>,
}

impl PresenceRecord {
    pub fn new(user_id: impl Into<String>, last_seen: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            last_seen,
        }
    }

    /// Zero value returned for a lookup miss.
    pub fn empty() -> Self {
        Self {
            user_id: String::new(),
            last_seen: DateTime::UNIX_EPOCH,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user_id.is_empty()
    }
}
