//! Processed-event store against a real PostgreSQL schema

use chrono::{Duration, Utc};
use database::processed::entity;
use database::SeaOrmProcessedStore;
use messaging::{ProcessedRecord, ProcessedStore, StoreError};
use sea_orm::{EntityTrait, PaginatorTrait};
use test_utils::TestDatabase;
use uuid::Uuid;

fn record(subject: &str) -> ProcessedRecord {
    ProcessedRecord {
        message_id: Uuid::new_v4(),
        subject: subject.to_string(),
        processed_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_racing_transactions_record_once() {
    let db = TestDatabase::new().await;
    let store = SeaOrmProcessedStore::new(db.connection());
    let record = record("orders.created");

    let mut first = store.begin().await.unwrap();
    let mut second = store.begin().await.unwrap();

    assert!(!store.is_processed(&mut first, record.message_id).await.unwrap());
    assert!(!store.is_processed(&mut second, record.message_id).await.unwrap());

    store.record_processed(&mut first, record.clone()).await.unwrap();
    store.commit(first).await.unwrap();

    let err = store
        .record_processed(&mut second, record.clone())
        .await
        .unwrap_err();
    store.rollback(second).await.unwrap();

    assert!(matches!(err, StoreError::Duplicate(id) if id == record.message_id));
    assert_eq!(entity::Entity::find().count(&db.connection).await.unwrap(), 1);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_retention_sweep_uses_processed_at() {
    let db = TestDatabase::new().await;
    let store = SeaOrmProcessedStore::new(db.connection());

    let mut stale = record("orders.created");
    stale.processed_at = Utc::now() - Duration::days(40);
    let fresh = record("orders.paid");

    for record in [stale, fresh.clone()] {
        entity::Entity::insert(entity::ActiveModel::from(record))
            .exec_without_returning(&db.connection)
            .await
            .unwrap();
    }

    assert_eq!(store.purge_older_than(30).await.unwrap(), 1);

    let remaining = entity::Entity::find().all(&db.connection).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].message_id, fresh.message_id);
}
