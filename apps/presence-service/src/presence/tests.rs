use std::sync::{Arc, Mutex};

use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::StoreConfig;
use crate::presence::store::{FaultPoint, MemoryPresenceStore, PresenceStore};
use crate::presence::{PresenceRecord, PresenceService, StoreError};

fn service_with(store: &MemoryPresenceStore) -> PresenceService {
    PresenceService::new(Arc::new(store.clone()), StoreConfig::default())
}

fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

fn stepping_clock(times: Vec<DateTime<Utc>>) -> crate::presence::service::Clock {
    let times = Arc::new(Mutex::new(times.into_iter()));
    Arc::new(move || {
        times
            .lock()
            .ok()
            .and_then(|mut times| times.next())
            .unwrap_or_else(Utc::now)
    })
}

#[tokio::test]
async fn first_record_lands_inside_the_call_window() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let presence = service_with(&store);

    let started = Utc::now();
    presence.record_presence("user-1").await?;
    let finished = Utc::now();

    let record = presence.get_presence("user-1").await?;
    assert_eq!(record.user_id, "user-1");
    assert!(record.last_seen >= started);
    assert!(record.last_seen <= finished);
    assert_eq!(store.open_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn second_write_refreshes_the_single_record() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let presence = service_with(&store).with_clock(stepping_clock(vec![at(1_000), at(2_000)]));

    let first = presence.record_presence("user-1").await?;
    let second = presence.record_presence("user-1").await?;
    assert_eq!(first.last_seen, at(1_000));
    assert_eq!(second.last_seen, at(2_000));

    let records = store.records(&StoreConfig::default()).await;
    assert_eq!(records, vec![PresenceRecord::new("user-1", at(2_000))]);
    assert_eq!(presence.get_presence("user-1").await?.last_seen, at(2_000));
    Ok(())
}

#[tokio::test]
async fn refresh_never_moves_last_seen_backwards() -> Result<()> {
    let store = MemoryPresenceStore::new();
    store
        .seed(
            &StoreConfig::default(),
            PresenceRecord::new("user-1", at(5_000)),
        )
        .await;
    let presence = service_with(&store).with_clock(stepping_clock(vec![at(4_000)]));

    let written = presence.record_presence("user-1").await?;
    assert_eq!(written.last_seen, at(5_000));
    Ok(())
}

#[tokio::test]
async fn lookup_miss_is_an_empty_record_not_an_error() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let presence = service_with(&store);

    let record = presence.get_presence("nobody").await?;
    assert!(record.is_empty());
    assert_eq!(record.last_seen.timestamp(), 0);
    assert_eq!(store.open_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn records_are_scoped_to_database_and_collection() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let other = StoreConfig {
        collection: "ping_archive".to_string(),
        ..StoreConfig::default()
    };
    PresenceService::new(Arc::new(store.clone()), other.clone())
        .record_presence("user-1")
        .await?;

    assert!(service_with(&store).get_presence("user-1").await?.is_empty());
    assert_eq!(store.records(&other).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn connect_failure_short_circuits_before_any_read() -> Result<()> {
    let store = MemoryPresenceStore::new();
    store.set_fault(FaultPoint::Connect, true);
    let presence = service_with(&store);

    let error = presence
        .record_presence("user-1")
        .await
        .expect_err("connect fault should surface");
    assert!(matches!(error, StoreError::Connection(_)));
    assert_eq!(store.connect_count(), 0);

    store.set_fault(FaultPoint::Connect, false);
    assert!(presence.get_presence("user-1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn operation_failures_surface_and_release_the_connection() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let presence = service_with(&store);

    store.set_fault(FaultPoint::Insert, true);
    let error = presence
        .record_presence("user-1")
        .await
        .expect_err("insert fault should surface");
    assert!(matches!(error, StoreError::Db(_)));
    assert_eq!(store.open_connections(), 0);
    store.set_fault(FaultPoint::Insert, false);

    presence.record_presence("user-1").await?;

    store.set_fault(FaultPoint::Update, true);
    let error = presence
        .record_presence("user-1")
        .await
        .expect_err("update fault should surface");
    assert!(matches!(error, StoreError::Db(_)));
    assert_eq!(store.open_connections(), 0);
    store.set_fault(FaultPoint::Update, false);

    store.set_fault(FaultPoint::Find, true);
    assert!(presence.record_presence("user-1").await.is_err());
    assert!(presence.get_presence("user-1").await.is_err());
    assert_eq!(store.open_connections(), 0);
    assert_eq!(store.connect_count(), 5);
    Ok(())
}

#[tokio::test]
async fn memory_store_enforces_one_record_per_user() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let config = StoreConfig::default();
    let connection = store.connect(&config).await?;

    connection
        .insert_one(&PresenceRecord::new("user-1", at(1)))
        .await?;
    let duplicate = connection
        .insert_one(&PresenceRecord::new("user-1", at(2)))
        .await
        .expect_err("duplicate insert");
    assert!(matches!(duplicate, StoreError::Conflict(_)));

    let missing = connection
        .update_one("user-2", at(3))
        .await
        .expect_err("update of unknown user");
    assert!(matches!(missing, StoreError::NotFound(_)));

    connection.disconnect().await?;
    connection.disconnect().await?;
    assert_eq!(store.open_connections(), 0);
    assert!(connection.find_one("user-1").await.is_err());
    Ok(())
}

#[tokio::test]
async fn dropped_connection_is_released() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let connection = store.connect(&StoreConfig::default()).await?;
    assert_eq!(store.open_connections(), 1);
    drop(connection);
    assert_eq!(store.open_connections(), 0);
    Ok(())
}

#[tokio::test]
async fn first_write_uses_the_service_clock() -> Result<()> {
    let store = MemoryPresenceStore::new();
    let fixed = Utc::now() - Duration::hours(1);
    let presence = service_with(&store).with_clock(stepping_clock(vec![fixed]));

    presence.record_presence("user-1").await?;
    assert_eq!(presence.get_presence("user-1").await?.last_seen, fixed);
    Ok(())
}
