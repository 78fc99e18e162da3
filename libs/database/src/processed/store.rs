use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use messaging::{ProcessedRecord, ProcessedStore, StoreError};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, QueryFilter, SqlErr,
    TransactionTrait,
};
use tracing::{debug, info};
use uuid::Uuid;

use super::entity::{self, Column, Entity};

/// Retention window, in days, for the `processed_events` sweep.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// [`ProcessedStore`] over the `processed_events` table.
///
/// The primary key on `message_id` turns a concurrent insert of the same
/// message into [`StoreError::Duplicate`].
#[derive(Clone, Debug)]
pub struct SeaOrmProcessedStore {
    db: DatabaseConnection,
}

impl SeaOrmProcessedStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Delete records processed before `cutoff`, returning how many were removed.
    pub async fn purge_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = Entity::delete_many()
            .filter(Column::ProcessedAt.lt(cutoff.fixed_offset()))
            .exec(&self.db)
            .await
            .map_err(|e| backend("failed to purge processed events", e))?;

        info!(
            cutoff = %cutoff,
            removed = result.rows_affected,
            "Purged processed events"
        );
        Ok(result.rows_affected)
    }

    /// Delete records older than `days` days.
    pub async fn purge_older_than(&self, days: u32) -> Result<u64, StoreError> {
        self.purge_processed_before(Utc::now() - Duration::days(i64::from(days)))
            .await
    }
}

#[async_trait]
impl ProcessedStore for SeaOrmProcessedStore {
    type Tx = DatabaseTransaction;

    async fn begin(&self) -> Result<DatabaseTransaction, StoreError> {
        self.db
            .begin()
            .await
            .map_err(|e| backend("failed to begin transaction", e))
    }

    async fn is_processed(
        &self,
        tx: &mut DatabaseTransaction,
        message_id: Uuid,
    ) -> Result<bool, StoreError> {
        let found = Entity::find_by_id(message_id)
            .one(&*tx)
            .await
            .map_err(|e| backend("failed to look up processed event", e))?;
        Ok(found.is_some())
    }

    async fn record_processed(
        &self,
        tx: &mut DatabaseTransaction,
        record: ProcessedRecord,
    ) -> Result<(), StoreError> {
        let message_id = record.message_id;

        match Entity::insert(entity::ActiveModel::from(record))
            .exec_without_returning(&*tx)
            .await
        {
            Ok(_) => {
                debug!(message_id = %message_id, "Recorded processed event");
                Ok(())
            }
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                Err(StoreError::Duplicate(message_id))
            }
            Err(e) => Err(backend("failed to record processed event", e)),
        }
    }

    async fn commit(&self, tx: DatabaseTransaction) -> Result<(), StoreError> {
        tx.commit()
            .await
            .map_err(|e| backend("failed to commit transaction", e))
    }

    async fn rollback(&self, tx: DatabaseTransaction) -> Result<(), StoreError> {
        tx.rollback()
            .await
            .map_err(|e| backend("failed to roll back transaction", e))
    }
}

fn backend(message: &str, err: DbErr) -> StoreError {
    StoreError::backend_with_source(message, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::{
        DeduplicationGuard, MessageEnvelope, ProcessOutcome, ProcessingError, TransactionalHandler,
    };
    use sea_orm::{ConnectOptions, ConnectionTrait, Database, PaginatorTrait};
    use std::sync::Arc;

    async fn setup() -> DatabaseConnection {
        let mut options = ConnectOptions::new("sqlite::memory:");
        options.max_connections(1).sqlx_logging(false);
        let db = Database::connect(options).await.unwrap();

        db.execute_unprepared(
            "CREATE TABLE processed_events (
                message_id BLOB NOT NULL UNIQUE,
                subject TEXT NOT NULL,
                processed_at TEXT NOT NULL
            )",
        )
        .await
        .unwrap();
        db
    }

    fn record_at(subject: &str, processed_at: DateTime<Utc>) -> ProcessedRecord {
        ProcessedRecord {
            message_id: Uuid::new_v4(),
            subject: subject.to_string(),
            processed_at,
        }
    }

    async fn insert(db: &DatabaseConnection, record: ProcessedRecord) {
        Entity::insert(entity::ActiveModel::from(record))
            .exec_without_returning(db)
            .await
            .unwrap();
    }

    async fn row_count(db: &DatabaseConnection) -> u64 {
        Entity::find().count(db).await.unwrap()
    }

    /// Writes an audit row through the transaction, then optionally fails.
    struct WriteAudit {
        fail: bool,
    }

    #[async_trait]
    impl TransactionalHandler<u32, DatabaseTransaction> for WriteAudit {
        type Output = u32;

        async fn handle(
            &self,
            envelope: &MessageEnvelope<u32>,
            tx: &mut DatabaseTransaction,
        ) -> Result<u32, ProcessingError> {
            let audit = record_at(&format!("audit.{}", envelope.data), Utc::now());
            Entity::insert(entity::ActiveModel::from(audit))
                .exec_without_returning(&*tx)
                .await
                .map_err(|e| ProcessingError::handler_with_source("audit write failed", e))?;

            if self.fail {
                return Err(ProcessingError::handler("downstream rejected order"));
            }
            Ok(envelope.data)
        }

        fn name(&self) -> &'static str {
            "write_audit"
        }
    }

    #[tokio::test]
    async fn test_first_delivery_commits_handler_writes_and_record() {
        let db = setup().await;
        let store = Arc::new(SeaOrmProcessedStore::new(db.clone()));
        let guard = DeduplicationGuard::new(store);
        let envelope = MessageEnvelope::new("orders.created", 7u32, "test");

        let outcome = guard
            .process_once(&envelope, &WriteAudit { fail: false })
            .await
            .unwrap();

        assert_eq!(outcome, ProcessOutcome::Processed(7));
        assert_eq!(row_count(&db).await, 2);

        let stored = Entity::find_by_id(envelope.id).one(&db).await.unwrap().unwrap();
        let record = ProcessedRecord::from(stored);
        assert_eq!(record.subject, "orders.created");
    }

    #[tokio::test]
    async fn test_redelivery_skips_handler() {
        let db = setup().await;
        let guard = DeduplicationGuard::new(Arc::new(SeaOrmProcessedStore::new(db.clone())));
        let envelope = MessageEnvelope::new("orders.created", 7u32, "test");
        let handler = WriteAudit { fail: false };

        guard.process_once(&envelope, &handler).await.unwrap();
        let second = guard.process_once(&envelope, &handler).await.unwrap();

        assert!(second.is_already_processed());
        assert_eq!(row_count(&db).await, 2);
    }

    #[tokio::test]
    async fn test_handler_failure_rolls_back_writes() {
        let db = setup().await;
        let guard = DeduplicationGuard::new(Arc::new(SeaOrmProcessedStore::new(db.clone())));
        let envelope = MessageEnvelope::new("orders.created", 7u32, "test");

        let err = guard
            .process_once(&envelope, &WriteAudit { fail: true })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "handler");
        assert_eq!(row_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_record_reports_duplicate_insert() {
        let db = setup().await;
        let store = SeaOrmProcessedStore::new(db.clone());
        let record = record_at("orders.created", Utc::now());
        insert(&db, record.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let err = store
            .record_processed(&mut tx, record.clone())
            .await
            .unwrap_err();
        store.rollback(tx).await.unwrap();

        assert!(matches!(err, StoreError::Duplicate(id) if id == record.message_id));
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_records() {
        let db = setup().await;
        let store = SeaOrmProcessedStore::new(db.clone());
        let now = Utc::now();
        insert(&db, record_at("orders.created", now - Duration::days(45))).await;
        insert(&db, record_at("orders.created", now - Duration::days(31))).await;
        insert(&db, record_at("orders.paid", now - Duration::days(1))).await;

        let removed = store.purge_older_than(DEFAULT_RETENTION_DAYS).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(row_count(&db).await, 1);

        let removed = store
            .purge_processed_before(now + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(row_count(&db).await, 0);
    }
}
