//! In-memory broker and store used by the unit tests.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::{
    ConnectionGuard, ConsumerAdmin, Delivery, DeliveryStream, MessagePublisher, PublishAck,
    PublishRequest, PullSubscriber, StreamAdmin,
};
use crate::config::{ConsumerSpec, PullOptions};
use crate::dedup::{ProcessedRecord, ProcessedStore};
use crate::envelope::MessageEnvelope;
use crate::error::{BrokerError, StoreError};
use crate::subject::is_covered;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settled {
    Ack,
    Nak(Duration),
    Term,
}

struct Queued {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
    delivery_count: u64,
}

#[derive(Default)]
struct State {
    streams: HashMap<String, Vec<String>>,
    stream_updates: usize,
    consumers: HashMap<(String, String), ConsumerSpec>,
    published: Vec<(PublishRequest, u64)>,
    publish_times: Vec<Instant>,
    failing_publishes: u32,
    failing_subscribes: Option<(u32, BrokerError)>,
    subscribes: usize,
    /// Subscriptions block instead of ending once the queue is empty
    hold_open: bool,
    next_sequence: u64,
    queue: VecDeque<Queued>,
    settlements: Vec<(u64, Settled)>,
}

struct Shared {
    usable: AtomicBool,
    calls: AtomicUsize,
    state: Mutex<State>,
}

impl Shared {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// A single-node broker with one queue of deliverable messages.
///
/// Nak'd messages go back to the front of the queue, which mirrors a
/// consumer with `max_ack_pending == 1`.
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn with_stream<S: Into<String>>(name: &str, subjects: impl IntoIterator<Item = S>) -> Self {
        let mut state = State {
            next_sequence: 1,
            ..State::default()
        };
        state
            .streams
            .insert(name.to_string(), subjects.into_iter().map(Into::into).collect());

        Self {
            shared: Arc::new(Shared {
                usable: AtomicBool::new(true),
                calls: AtomicUsize::new(0),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn set_usable(&self, usable: bool) {
        self.shared.usable.store(usable, Ordering::SeqCst);
    }

    /// Number of broker trait calls made so far (guard checks excluded).
    pub fn call_count(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_publishes(&self, count: u32) {
        self.shared.state().failing_publishes = count;
    }

    pub fn fail_next_subscribes(&self, count: u32, error: BrokerError) {
        self.shared.state().failing_subscribes = Some((count, error));
    }

    /// Make subscriptions wait for more messages, like a live pull, instead
    /// of ending when the queue runs dry.
    pub fn hold_subscriptions_open(&self) {
        self.shared.state().hold_open = true;
    }

    pub fn enqueue<T: Serialize>(&self, subject: &str, envelope: &MessageEnvelope<T>) {
        let payload = serde_json::to_vec(envelope).unwrap();
        self.enqueue_raw(subject, payload);
    }

    pub fn enqueue_raw(&self, subject: &str, payload: Vec<u8>) {
        let mut state = self.shared.state();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.queue.push_back(Queued {
            sequence,
            subject: subject.to_string(),
            payload,
            delivery_count: 0,
        });
    }

    pub fn subjects_of(&self, stream: &str) -> Vec<String> {
        self.shared.state().streams.get(stream).cloned().unwrap_or_default()
    }

    pub fn stream_update_count(&self) -> usize {
        self.shared.state().stream_updates
    }

    pub fn consumer_filters_of(&self, stream: &str, consumer: &str) -> Option<Vec<String>> {
        self.shared
            .state()
            .consumers
            .get(&(stream.to_string(), consumer.to_string()))
            .map(|spec| spec.subject_filters.iter().cloned().collect())
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        self.shared
            .state()
            .published
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    pub fn publish_attempt_times(&self) -> Vec<Instant> {
        self.shared.state().publish_times.clone()
    }

    pub fn subscribe_count(&self) -> usize {
        self.shared.state().subscribes
    }

    pub fn settlements(&self) -> Vec<(u64, Settled)> {
        self.shared.state().settlements.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state().queue.len()
    }
}

impl ConnectionGuard for InMemoryBroker {
    fn is_usable(&self) -> bool {
        self.shared.usable.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StreamAdmin for InMemoryBroker {
    async fn stream_subjects(&self, stream: &str) -> Result<Vec<String>, BrokerError> {
        self.shared.call();
        self.shared
            .state()
            .streams
            .get(stream)
            .cloned()
            .ok_or_else(|| BrokerError::not_found(format!("stream {}", stream)))
    }

    async fn set_stream_subjects(
        &self,
        stream: &str,
        subjects: Vec<String>,
    ) -> Result<(), BrokerError> {
        self.shared.call();
        let mut state = self.shared.state();
        match state.streams.get_mut(stream) {
            Some(current) => *current = subjects,
            None => return Err(BrokerError::not_found(format!("stream {}", stream))),
        }
        state.stream_updates += 1;
        Ok(())
    }
}

#[async_trait]
impl ConsumerAdmin for InMemoryBroker {
    async fn consumer_filters(
        &self,
        stream: &str,
        consumer: &str,
    ) -> Result<Vec<String>, BrokerError> {
        self.shared.call();
        self.shared
            .state()
            .consumers
            .get(&(stream.to_string(), consumer.to_string()))
            .map(|spec| spec.subject_filters.iter().cloned().collect())
            .ok_or_else(|| BrokerError::not_found(format!("consumer {}", consumer)))
    }

    async fn create_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        self.shared.call();
        self.shared.state().consumers.insert(
            (spec.stream_name.clone(), spec.consumer_name.clone()),
            spec.clone(),
        );
        Ok(())
    }

    async fn update_consumer(&self, spec: &ConsumerSpec) -> Result<(), BrokerError> {
        self.create_consumer(spec).await
    }
}

#[async_trait]
impl MessagePublisher for InMemoryBroker {
    async fn publish(&self, request: PublishRequest) -> Result<PublishAck, BrokerError> {
        self.shared.call();
        let mut state = self.shared.state();
        state.publish_times.push(Instant::now());

        if state.failing_publishes > 0 {
            state.failing_publishes -= 1;
            return Err(BrokerError::unavailable("no responders available"));
        }

        let subjects = state
            .streams
            .get(&request.expected_stream)
            .ok_or_else(|| BrokerError::not_found(format!("stream {}", request.expected_stream)))?;
        if !is_covered(&request.subject, subjects) {
            return Err(BrokerError::rejected("no stream matches subject"));
        }

        if let Some((_, sequence)) = state
            .published
            .iter()
            .find(|(earlier, _)| earlier.message_id == request.message_id)
        {
            return Ok(PublishAck {
                stream: request.expected_stream.clone(),
                sequence: *sequence,
                duplicate: true,
            });
        }

        let sequence = state.published.len() as u64 + 1;
        let stream = request.expected_stream.clone();
        state.published.push((request, sequence));
        Ok(PublishAck {
            stream,
            sequence,
            duplicate: false,
        })
    }
}

#[async_trait]
impl PullSubscriber for InMemoryBroker {
    type Delivery = InMemoryDelivery;

    async fn subscribe(
        &self,
        spec: &ConsumerSpec,
        _options: &PullOptions,
    ) -> Result<DeliveryStream<InMemoryDelivery>, BrokerError> {
        self.shared.call();
        {
            let mut state = self.shared.state();
            state.subscribes += 1;
            if let Some((remaining, error)) = state.failing_subscribes.as_mut() {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(error.clone());
                }
            }
            let key = (spec.stream_name.clone(), spec.consumer_name.clone());
            if !state.consumers.contains_key(&key) {
                return Err(BrokerError::not_found(format!("consumer {}", spec.consumer_name)));
            }
        }

        let hold_open = self.shared.state().hold_open;
        let shared = self.shared.clone();
        let stream = futures::stream::unfold(shared, |shared| async move {
            let next = shared.state().queue.pop_front();
            next.map(|mut queued| {
                queued.delivery_count += 1;
                let delivery = InMemoryDelivery {
                    shared: shared.clone(),
                    queued,
                };
                (Ok(delivery), shared)
            })
        });
        if hold_open {
            Ok(stream.chain(futures::stream::pending()).boxed())
        } else {
            Ok(stream.boxed())
        }
    }
}

pub struct InMemoryDelivery {
    shared: Arc<Shared>,
    queued: Queued,
}

impl InMemoryDelivery {
    fn settle(self, settled: Settled) {
        let mut state = self.shared.state();
        state.settlements.push((self.queued.sequence, settled.clone()));
        if let Settled::Nak(_) = settled {
            state.queue.push_front(self.queued);
        }
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn subject(&self) -> &str {
        &self.queued.subject
    }

    fn payload(&self) -> &[u8] {
        &self.queued.payload
    }

    fn stream_sequence(&self) -> u64 {
        self.queued.sequence
    }

    fn delivery_count(&self) -> u64 {
        self.queued.delivery_count
    }

    async fn ack(self) -> Result<(), BrokerError> {
        self.settle(Settled::Ack);
        Ok(())
    }

    async fn nak(self, delay: Duration) -> Result<(), BrokerError> {
        self.settle(Settled::Nak(delay));
        Ok(())
    }

    async fn term(self) -> Result<(), BrokerError> {
        self.settle(Settled::Term);
        Ok(())
    }
}

#[derive(Default)]
struct StoreState {
    committed: HashMap<Uuid, ProcessedRecord>,
    racing: HashSet<Uuid>,
    writes: Vec<String>,
    rollbacks: usize,
}

/// Transaction of [`MemoryStore`]; buffers writes until commit.
#[derive(Default)]
pub struct MemoryTx {
    records: Vec<ProcessedRecord>,
    writes: Vec<String>,
}

impl MemoryTx {
    pub fn write(&mut self, value: String) {
        self.writes.push(value);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    fn state(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap()
    }

    pub fn contains(&self, message_id: Uuid) -> bool {
        self.state().committed.contains_key(&message_id)
    }

    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    pub fn rollback_count(&self) -> usize {
        self.state().rollbacks
    }

    /// Simulate another worker committing `record` after our existence check.
    pub fn commit_behind_back(&self, record: ProcessedRecord) {
        self.state().racing.insert(record.message_id);
    }
}

#[async_trait]
impl ProcessedStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        Ok(MemoryTx::default())
    }

    async fn is_processed(&self, tx: &mut MemoryTx, message_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state().committed.contains_key(&message_id)
            || tx.records.iter().any(|r| r.message_id == message_id))
    }

    async fn record_processed(
        &self,
        tx: &mut MemoryTx,
        record: ProcessedRecord,
    ) -> Result<(), StoreError> {
        let state = self.state();
        if state.committed.contains_key(&record.message_id) || state.racing.contains(&record.message_id)
        {
            return Err(StoreError::Duplicate(record.message_id));
        }
        tx.records.push(record);
        Ok(())
    }

    async fn commit(&self, tx: MemoryTx) -> Result<(), StoreError> {
        let mut state = self.state();
        for record in tx.records {
            state.committed.insert(record.message_id, record);
        }
        state.writes.extend(tx.writes);
        Ok(())
    }

    async fn rollback(&self, _tx: MemoryTx) -> Result<(), StoreError> {
        self.state().rollbacks += 1;
        Ok(())
    }
}
