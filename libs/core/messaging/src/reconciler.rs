//! Brings a durable consumer in line with its desired filter subjects.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::broker::ConsumerAdmin;
use crate::config::ConsumerSpec;
use crate::error::BrokerError;
use crate::metrics;

/// What [`ConsumerReconciler::reconcile`] changed on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    Unchanged,
}

impl ReconcileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileOutcome::Created => "created",
            ReconcileOutcome::Updated => "updated",
            ReconcileOutcome::Unchanged => "unchanged",
        }
    }
}

/// Brings a durable consumer in line with a [`ConsumerSpec`].
///
/// Only the filter-subject set is compared. Other policy fields are applied
/// on create and whenever the filters change, but a difference in them alone
/// does not trigger an update.
pub struct ConsumerReconciler<B> {
    broker: Arc<B>,
}

impl<B> Clone for ConsumerReconciler<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
        }
    }
}

impl<B: ConsumerAdmin> ConsumerReconciler<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    #[instrument(skip_all, fields(stream = %spec.stream_name, consumer = %spec.consumer_name))]
    pub async fn reconcile(&self, spec: &ConsumerSpec) -> Result<ReconcileOutcome, BrokerError> {
        let outcome = match self
            .broker
            .consumer_filters(&spec.stream_name, &spec.consumer_name)
            .await
        {
            Err(err) if err.is_not_found() => {
                self.broker.create_consumer(spec).await?;
                info!(filters = ?spec.subject_filters, "Created consumer");
                ReconcileOutcome::Created
            }
            Err(err) => return Err(err),
            Ok(current) if spec.filters_match(&current) => {
                debug!("Consumer already up to date");
                ReconcileOutcome::Unchanged
            }
            Ok(current) => {
                self.broker.update_consumer(spec).await?;
                info!(
                    previous = ?current,
                    filters = ?spec.subject_filters,
                    "Updated consumer filters"
                );
                ReconcileOutcome::Updated
            }
        };

        metrics::record_consumer_reconciled(&spec.stream_name, &spec.consumer_name, outcome.as_str());
        Ok(outcome)
    }
}
