use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};

use crate::config::StoreConfig;
use crate::presence::PresenceRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Opens scoped connections to a presence store.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn connect(
        &self,
        config: &StoreConfig,
    ) -> Result<Box<dyn PresenceConnection>, StoreError>;
}

/// Operations available on one open store connection.
///
/// Callers must `disconnect` on every exit path. Dropping a connection without
/// disconnecting also releases it, so a cancelled request does not leak.
#[async_trait]
pub trait PresenceConnection: Send + Sync {
    async fn find_one(&self, user_id: &str) -> Result<Option<PresenceRecord>, StoreError>;

    async fn insert_one(&self, record: &PresenceRecord) -> Result<(), StoreError>;

    async fn update_one(&self, user_id: &str, last_seen: DateTime<Utc>)
    -> Result<(), StoreError>;

    async fn disconnect(&self) -> Result<(), StoreError>;
}

pub fn memory() -> Arc<dyn PresenceStore> {
    Arc::new(MemoryPresenceStore::new())
}

/// Connects the Postgres adapter and makes sure the presence table exists.
pub async fn postgres(
    database_url: &str,
    config: &StoreConfig,
) -> Result<Arc<dyn PresenceStore>, StoreError> {
    let store = PostgresPresenceStore::new(database_url);
    store.ensure_schema(config).await?;
    Ok(Arc::new(store))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Connect,
    Find,
    Insert,
    Update,
}

#[derive(Default)]
struct MemoryFaults {
    connect: AtomicBool,
    find: AtomicBool,
    insert: AtomicBool,
    update: AtomicBool,
}

impl MemoryFaults {
    fn flag(&self, point: FaultPoint) -> &AtomicBool {
        match point {
            FaultPoint::Connect => &self.connect,
            FaultPoint::Find => &self.find,
            FaultPoint::Insert => &self.insert,
            FaultPoint::Update => &self.update,
        }
    }

    fn check(&self, point: FaultPoint) -> Result<(), StoreError> {
        if !self.flag(point).load(Ordering::SeqCst) {
            return Ok(());
        }
        let message = format!("injected {point:?} failure").to_ascii_lowercase();
        Err(match point {
            FaultPoint::Connect => StoreError::Connection(message),
            FaultPoint::Find | FaultPoint::Insert | FaultPoint::Update => StoreError::Db(message),
        })
    }
}

type Namespace = (String, String);

#[derive(Default)]
struct MemoryInner {
    collections: Mutex<HashMap<Namespace, HashMap<String, DateTime<Utc>>>>,
    faults: MemoryFaults,
    open_connections: AtomicUsize,
    connect_count: AtomicU64,
}

/// In-process store used for development and tests.
///
/// Records are namespaced by database and collection. Every operation can be
/// made to fail on demand, and open connections are counted so callers can
/// assert that nothing leaks.
#[derive(Clone, Default)]
pub struct MemoryPresenceStore {
    inner: Arc<MemoryInner>,
}

impl MemoryPresenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fault(&self, point: FaultPoint, enabled: bool) {
        self.inner.faults.flag(point).store(enabled, Ordering::SeqCst);
    }

    pub async fn seed(&self, config: &StoreConfig, record: PresenceRecord) {
        let mut collections = self.inner.collections.lock().await;
        collections
            .entry(namespace(config))
            .or_default()
            .insert(record.user_id, record.last_seen);
    }

    pub async fn records(&self, config: &StoreConfig) -> Vec<PresenceRecord> {
        let collections = self.inner.collections.lock().await;
        let mut records: Vec<PresenceRecord> = collections
            .get(&namespace(config))
            .map(|rows| {
                rows.iter()
                    .map(|(user_id, last_seen)| PresenceRecord::new(user_id.clone(), *last_seen))
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by(|left, right| left.user_id.cmp(&right.user_id));
        records
    }

    pub fn open_connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> u64 {
        self.inner.connect_count.load(Ordering::SeqCst)
    }
}

fn namespace(config: &StoreConfig) -> Namespace {
    (config.database.clone(), config.collection.clone())
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn connect(
        &self,
        config: &StoreConfig,
    ) -> Result<Box<dyn PresenceConnection>, StoreError> {
        self.inner.faults.check(FaultPoint::Connect)?;
        self.inner.connect_count.fetch_add(1, Ordering::SeqCst);
        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryPresenceConnection {
            inner: Arc::clone(&self.inner),
            namespace: namespace(config),
            open: AtomicBool::new(true),
        }))
    }
}

struct MemoryPresenceConnection {
    inner: Arc<MemoryInner>,
    namespace: Namespace,
    open: AtomicBool,
}

impl MemoryPresenceConnection {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("connection already closed".to_string()))
        }
    }

    fn release(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            self.inner.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MemoryPresenceConnection {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl PresenceConnection for MemoryPresenceConnection {
    async fn find_one(&self, user_id: &str) -> Result<Option<PresenceRecord>, StoreError> {
        self.ensure_open()?;
        self.inner.faults.check(FaultPoint::Find)?;
        let collections = self.inner.collections.lock().await;
        Ok(collections
            .get(&self.namespace)
            .and_then(|rows| rows.get(user_id))
            .map(|last_seen| PresenceRecord::new(user_id, *last_seen)))
    }

    async fn insert_one(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.inner.faults.check(FaultPoint::Insert)?;
        let mut collections = self.inner.collections.lock().await;
        let rows = collections.entry(self.namespace.clone()).or_default();
        if rows.contains_key(&record.user_id) {
            return Err(StoreError::Conflict(format!(
                "presence record already exists for {}",
                record.user_id
            )));
        }
        rows.insert(record.user_id.clone(), record.last_seen);
        Ok(())
    }

    async fn update_one(
        &self,
        user_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.inner.faults.check(FaultPoint::Update)?;
        let mut collections = self.inner.collections.lock().await;
        let Some(slot) = collections
            .get_mut(&self.namespace)
            .and_then(|rows| rows.get_mut(user_id))
        else {
            return Err(StoreError::NotFound(format!(
                "no presence record for {user_id}"
            )));
        };
        *slot = last_seen;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        self.release();
        Ok(())
    }
}

/// Postgres adapter. Each connection is a dedicated `tokio_postgres` session;
/// the database name maps to a schema and the collection to a table in it.
pub struct PostgresPresenceStore {
    database_url: String,
}

impl PostgresPresenceStore {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }

    pub async fn ensure_schema(&self, config: &StoreConfig) -> Result<(), StoreError> {
        let client = open_client(&self.database_url, config).await?;
        let statements = format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS "{schema}";
            CREATE TABLE IF NOT EXISTS {table} (
                user_id TEXT PRIMARY KEY,
                last_seen TIMESTAMPTZ NOT NULL
            );
            "#,
            schema = config.database,
            table = qualified_table(config),
        );
        client
            .batch_execute(&statements)
            .await
            .map_err(|error| StoreError::Db(error.to_string()))
    }
}

async fn open_client(database_url: &str, config: &StoreConfig) -> Result<Client, StoreError> {
    let (client, connection) =
        tokio::time::timeout(config.connect_timeout, tokio_postgres::connect(database_url, NoTls))
            .await
            .map_err(|_| {
                StoreError::Connection(format!(
                    "timed out after {}ms",
                    config.connect_timeout.as_millis()
                ))
            })?
            .map_err(|error| StoreError::Connection(error.to_string()))?;

    tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::warn!(reason = %error, "presence postgres connection error");
        }
    });

    Ok(client)
}

// Names are validated as identifiers when the config is loaded.
fn qualified_table(config: &StoreConfig) -> String {
    format!(r#""{}"."{}""#, config.database, config.collection)
}

#[async_trait]
impl PresenceStore for PostgresPresenceStore {
    async fn connect(
        &self,
        config: &StoreConfig,
    ) -> Result<Box<dyn PresenceConnection>, StoreError> {
        let client = open_client(&self.database_url, config).await?;
        Ok(Box::new(PostgresPresenceConnection {
            client: Mutex::new(Some(client)),
            table: qualified_table(config),
        }))
    }
}

struct PostgresPresenceConnection {
    client: Mutex<Option<Client>>,
    table: String,
}

fn closed() -> StoreError {
    StoreError::Connection("connection already closed".to_string())
}

#[async_trait]
impl PresenceConnection for PostgresPresenceConnection {
    async fn find_one(&self, user_id: &str) -> Result<Option<PresenceRecord>, StoreError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        let row = client
            .query_opt(
                &format!("SELECT user_id, last_seen FROM {} WHERE user_id = $1", self.table),
                &[&user_id],
            )
            .await
            .map_err(|error| StoreError::Db(error.to_string()))?;

        row.map(|row| {
            let user_id: String = row
                .try_get("user_id")
                .map_err(|error| StoreError::Db(error.to_string()))?;
            let last_seen: DateTime<Utc> = row
                .try_get("last_seen")
                .map_err(|error| StoreError::Db(error.to_string()))?;
            Ok(PresenceRecord::new(user_id, last_seen))
        })
        .transpose()
    }

    async fn insert_one(&self, record: &PresenceRecord) -> Result<(), StoreError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        client
            .execute(
                &format!(
                    "INSERT INTO {} (user_id, last_seen) VALUES ($1, $2)",
                    self.table
                ),
                &[&record.user_id, &record.last_seen],
            )
            .await
            .map_err(|error| {
                if error.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                    StoreError::Conflict(format!(
                        "presence record already exists for {}",
                        record.user_id
                    ))
                } else {
                    StoreError::Db(error.to_string())
                }
            })?;
        Ok(())
    }

    async fn update_one(
        &self,
        user_id: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let guard = self.client.lock().await;
        let client = guard.as_ref().ok_or_else(closed)?;
        let updated = client
            .execute(
                &format!("UPDATE {} SET last_seen = $2 WHERE user_id = $1", self.table),
                &[&user_id, &last_seen],
            )
            .await
            .map_err(|error| StoreError::Db(error.to_string()))?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!(
                "no presence record for {user_id}"
            )));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), StoreError> {
        // Dropping the client ends the spawned connection task.
        self.client.lock().await.take();
        Ok(())
    }
}
