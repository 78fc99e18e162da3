//! Metrics emitted by the pipeline through the `metrics` facade.
//!
//! No recorder is installed here; the embedding service decides on an exporter.

use metrics::{counter, histogram};
use std::time::Duration;

/// Per-consumer delivery metrics.
#[derive(Clone)]
pub struct DeliveryMetrics {
    stream_name: String,
    consumer_name: String,
}

impl DeliveryMetrics {
    pub fn new(stream_name: &str, consumer_name: &str) -> Self {
        Self {
            stream_name: stream_name.to_string(),
            consumer_name: consumer_name.to_string(),
        }
    }

    pub fn message_received(&self) {
        counter!(
            "delivery_messages_received_total",
            "stream" => self.stream_name.clone(),
            "consumer" => self.consumer_name.clone()
        )
        .increment(1);
    }

    /// Record a handler run and how long it took.
    pub fn handler_finished(&self, duration: Duration, outcome: &'static str) {
        histogram!(
            "delivery_handler_duration_seconds",
            "stream" => self.stream_name.clone(),
            "consumer" => self.consumer_name.clone(),
            "outcome" => outcome
        )
        .record(duration.as_secs_f64());
    }

    pub fn message_acked(&self) {
        counter!(
            "delivery_messages_acked_total",
            "stream" => self.stream_name.clone(),
            "consumer" => self.consumer_name.clone()
        )
        .increment(1);
    }

    pub fn message_nacked(&self, error_kind: &'static str) {
        counter!(
            "delivery_messages_nacked_total",
            "stream" => self.stream_name.clone(),
            "consumer" => self.consumer_name.clone(),
            "kind" => error_kind
        )
        .increment(1);
    }

    pub fn message_terminated(&self, error_kind: &'static str) {
        counter!(
            "delivery_messages_terminated_total",
            "stream" => self.stream_name.clone(),
            "consumer" => self.consumer_name.clone(),
            "kind" => error_kind
        )
        .increment(1);
    }
}

pub(crate) fn record_publish_attempt(stream: &str) {
    counter!("publish_attempts_total", "stream" => stream.to_string()).increment(1);
}

pub(crate) fn record_publish_failure(stream: &str) {
    counter!("publish_failures_total", "stream" => stream.to_string()).increment(1);
}

pub(crate) fn record_subject_provisioned(stream: &str) {
    counter!("subjects_provisioned_total", "stream" => stream.to_string()).increment(1);
}

pub(crate) fn record_consumer_reconciled(stream: &str, consumer: &str, outcome: &'static str) {
    counter!(
        "consumers_reconciled_total",
        "stream" => stream.to_string(),
        "consumer" => consumer.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_duplicate_skipped(handler: &'static str) {
    counter!("delivery_duplicates_skipped_total", "handler" => handler).increment(1);
}
