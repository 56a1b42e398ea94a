use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::presence::PresenceRecord;
use crate::presence::store::{PresenceConnection, PresenceStore, StoreError};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stateless between calls: every operation opens its own store connection and
/// releases it before returning.
///
/// Two concurrent first writes for the same user can both observe a miss. The
/// loser surfaces the store's uniqueness failure as a [`StoreError`]; no lock is
/// taken here.
pub struct PresenceService {
    store: Arc<dyn PresenceStore>,
    store_config: StoreConfig,
    clock: Clock,
}

impl PresenceService {
    pub fn new(store: Arc<dyn PresenceStore>, store_config: StoreConfig) -> Self {
        Self {
            store,
            store_config,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Creates the user's record on first sight, otherwise refreshes `last_seen`.
    /// Returns the record as written.
    pub async fn record_presence(&self, user_id: &str) -> Result<PresenceRecord, StoreError> {
        let connection = self.store.connect(&self.store_config).await?;
        let outcome = self.refresh(connection.as_ref(), user_id).await;
        release(connection.as_ref(), "record_presence").await;
        outcome
    }

    /// A miss yields [`PresenceRecord::empty`] rather than an error.
    pub async fn get_presence(&self, user_id: &str) -> Result<PresenceRecord, StoreError> {
        let connection = self.store.connect(&self.store_config).await?;
        let outcome = connection.find_one(user_id).await;
        release(connection.as_ref(), "get_presence").await;
        Ok(outcome?.unwrap_or_else(PresenceRecord::empty))
    }

    async fn refresh(
        &self,
        connection: &dyn PresenceConnection,
        user_id: &str,
    ) -> Result<PresenceRecord, StoreError> {
        let now = (self.clock)();
        match connection.find_one(user_id).await? {
            None => {
                let record = PresenceRecord::new(user_id, now);
                connection.insert_one(&record).await?;
                tracing::debug!(user_id, "presence record created");
                Ok(record)
            }
            Some(existing) => {
                // Never move last_seen backwards if the wall clock steps back.
                let last_seen = now.max(existing.last_seen);
                connection.update_one(user_id, last_seen).await?;
                Ok(PresenceRecord::new(user_id, last_seen))
            }
        }
    }
}

async fn release(connection: &dyn PresenceConnection, operation: &'static str) {
    if let Err(error) = connection.disconnect().await {
        tracing::warn!(operation, reason = %error, "presence store disconnect failed");
    }
}
