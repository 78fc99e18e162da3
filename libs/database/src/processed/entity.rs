use messaging::ProcessedRecord;
use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;

/// Sea-ORM Entity for the processed_events table
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "processed_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub message_id: Uuid,
    pub subject: String,
    pub processed_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for ProcessedRecord {
    fn from(model: Model) -> Self {
        Self {
            message_id: model.message_id,
            subject: model.subject,
            processed_at: model.processed_at.into(),
        }
    }
}

impl From<ProcessedRecord> for ActiveModel {
    fn from(record: ProcessedRecord) -> Self {
        Self {
            message_id: Set(record.message_id),
            subject: Set(record.subject),
            processed_at: Set(record.processed_at.fixed_offset()),
        }
    }
}
