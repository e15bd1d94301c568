//! In-process work queue.
//!
//! Same delivery semantics as the Redis queue: one delivery per receive,
//! explicit resolution, attempt counting and a dead-letter list. Used by
//! tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::QueueMessage;
use crate::queue::{Delivery, WorkQueue};

/// A message that left the queue without succeeding.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub payload: String,
    pub reason: String,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    payload: String,
    attempt: u32,
}

#[derive(Debug)]
struct InFlight {
    entry: Entry,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, InFlight>,
    dead_letters: Vec<DeadLetter>,
    acked: Vec<String>,
    published: Vec<String>,
}

impl State {
    fn push(&mut self, payload: String, attempt: u32) -> String {
        self.next_id += 1;
        let id = format!("{}-0", self.next_id);
        self.ready.push_back(Entry {
            id: id.clone(),
            payload,
            attempt,
        });
        id
    }

    fn take(&mut self, id: &str) -> QueueResult<Entry> {
        self.in_flight
            .remove(id)
            .map(|f| f.entry)
            .ok_or_else(|| QueueError::UnknownDelivery(id.to_string()))
    }
}

/// In-memory [`WorkQueue`].
pub struct MemoryQueue {
    state: Mutex<State>,
    max_deliveries: u32,
    visibility_timeout: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(5)
    }
}

impl MemoryQueue {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_deliveries,
            visibility_timeout: Duration::from_secs(600),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an arbitrary payload, bypassing message encoding.
    pub fn push_raw(&self, payload: impl Into<String>) -> String {
        self.state().push(payload.into(), 1)
    }

    /// Every payload published through [`WorkQueue::publish`], in order.
    pub fn published(&self) -> Vec<String> {
        self.state().published.clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state().dead_letters.clone()
    }

    pub fn acked_count(&self) -> usize {
        self.state().acked.len()
    }

    pub fn ready_len(&self) -> usize {
        self.state().ready.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.state().in_flight.len()
    }

    /// Unresolved deliveries currently held by `consumer`.
    pub fn held_by(&self, consumer: &str) -> usize {
        self.state()
            .in_flight
            .values()
            .filter(|f| f.consumer == consumer)
            .count()
    }
}

/// Publish order of a `<seq>-0` entry ID.
fn sequence(id: &str) -> u64 {
    id.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(u64::MAX)
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn publish(&self, message: &QueueMessage) -> QueueResult<String> {
        let payload = message.to_payload()?;
        let mut state = self.state();
        state.published.push(payload.clone());
        let id = state.push(payload, 1);
        debug!("Published {} as {}", message.label(), id);
        Ok(id)
    }

    async fn receive(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut state = self.state();
        let Some(entry) = state.ready.pop_front() else {
            return Ok(None);
        };

        let delivery = Delivery {
            id: entry.id.clone(),
            attempt: entry.attempt,
            payload: entry.payload.clone(),
        };
        state.in_flight.insert(
            entry.id.clone(),
            InFlight {
                entry,
                consumer: consumer.to_string(),
                delivered_at: Instant::now(),
            },
        );
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state();
        let entry = state.take(&delivery.id)?;
        state.acked.push(entry.id);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut state = self.state();
        let entry = state.take(&delivery.id)?;
        state.push(entry.payload, delivery.attempt + 1);
        Ok(())
    }

    async fn discard(&self, delivery: &Delivery, reason: &str) -> QueueResult<()> {
        let mut state = self.state();
        let entry = state.take(&delivery.id)?;
        warn!("Moved message {} to DLQ: {}", entry.id, reason);
        state.dead_letters.push(DeadLetter {
            payload: entry.payload,
            reason: reason.to_string(),
            attempt: delivery.attempt,
        });
        Ok(())
    }

    async fn claim_stale(&self, consumer: &str) -> QueueResult<Option<Delivery>> {
        let mut state = self.state();
        let now = Instant::now();

        let Some(in_flight) = state
            .in_flight
            .values_mut()
            .filter(|f| now.duration_since(f.delivered_at) >= self.visibility_timeout)
            .min_by_key(|f| (f.delivered_at, sequence(&f.entry.id)))
        else {
            return Ok(None);
        };

        debug!(
            "Claiming stale message {} from consumer {}",
            in_flight.entry.id, in_flight.consumer
        );
        in_flight.entry.attempt += 1;
        in_flight.consumer = consumer.to_string();
        in_flight.delivered_at = now;
        Ok(Some(Delivery {
            id: in_flight.entry.id.clone(),
            attempt: in_flight.entry.attempt,
            payload: in_flight.entry.payload.clone(),
        }))
    }

    async fn depth(&self) -> QueueResult<u64> {
        let state = self.state();
        Ok((state.ready.len() + state.in_flight.len()) as u64)
    }

    async fn dead_letter_depth(&self) -> QueueResult<u64> {
        Ok(self.state().dead_letters.len() as u64)
    }

    fn max_deliveries(&self) -> u32 {
        self.max_deliveries
    }
}
