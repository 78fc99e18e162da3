//! Keeps a stream's subject list covering every subject published to it.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::broker::StreamAdmin;
use crate::error::BrokerError;
use crate::metrics;
use crate::subject::is_covered;

/// What [`SubjectProvisioner::ensure_subject`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    AlreadyCovered,
    Added,
}

/// Makes sure a stream accepts a subject before anything is published on it.
///
/// If no existing filter matches, the literal subject is appended to the
/// stream's filters. Concurrent provisioners may race; the last update wins
/// and a lost subject is added again on the next publish.
pub struct SubjectProvisioner<B> {
    broker: Arc<B>,
}

impl<B> Clone for SubjectProvisioner<B> {
    fn clone(&self) -> Self {
        Self {
            broker: self.broker.clone(),
        }
    }
}

impl<B: StreamAdmin> SubjectProvisioner<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn ensure_subject(
        &self,
        stream: &str,
        subject: &str,
    ) -> Result<ProvisionOutcome, BrokerError> {
        let mut subjects = self.broker.stream_subjects(stream).await?;

        if is_covered(subject, &subjects) {
            debug!(stream, subject, "Subject already covered by stream");
            return Ok(ProvisionOutcome::AlreadyCovered);
        }

        subjects.push(subject.to_string());
        self.broker.set_stream_subjects(stream, subjects).await?;

        metrics::record_subject_provisioned(stream);
        info!(stream, subject, "Added subject to stream");
        Ok(ProvisionOutcome::Added)
    }
}
