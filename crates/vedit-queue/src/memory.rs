//! In-process [`StageQueue`] with the same delivery semantics as Redis.
//!
//! Used by tests and single-process runs. Unacked deliveries stay pending
//! until acked or claimed; dedup keys expire after the configured TTL.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, warn};
use vedit_models::{StageMessage, StageName};

use crate::backend::{Delivery, EnqueueOutcome, QueueDepth, StageQueue};
use crate::error::{QueueError, QueueResult};

struct PendingEntry {
    payload: String,
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct StageState {
    ready: VecDeque<(String, String)>,
    pending: BTreeMap<String, PendingEntry>,
    delayed: Vec<(Instant, String)>,
}

#[derive(Default)]
struct Inner {
    stages: HashMap<StageName, StageState>,
    dedup: HashMap<String, Instant>,
    next_id: u64,
    enqueued_total: u64,
}

impl Inner {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}-0", self.next_id)
    }

    fn take_dedup(&mut self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.dedup.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                self.dedup.insert(key.to_string(), now + ttl);
                true
            }
        }
    }
}

/// In-memory stage queues.
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    dedup_ttl: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            dedup_ttl: Duration::from_secs(86400),
        }
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| QueueError::connection_failed("memory queue lock poisoned"))
    }

    /// Push a raw payload, bypassing serialization. For malformed-message tests.
    pub fn push_raw(&self, stage: StageName, payload: impl Into<String>) -> QueueResult<()> {
        let mut inner = self.lock()?;
        let id = inner.next_id();
        inner
            .stages
            .entry(stage)
            .or_default()
            .ready
            .push_back((id, payload.into()));
        drop(inner);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Messages added to any ready queue since creation, promotions included.
    pub fn enqueued_total(&self) -> u64 {
        self.lock().map(|inner| inner.enqueued_total).unwrap_or(0)
    }

    /// Messages currently waiting in a stage's ready queue.
    pub fn ready_messages(&self, stage: StageName) -> Vec<StageMessage> {
        let Ok(inner) = self.lock() else {
            return Vec::new();
        };
        inner
            .stages
            .get(&stage)
            .map(|state| {
                state
                    .ready
                    .iter()
                    .filter_map(|(_, payload)| serde_json::from_str(payload).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Decode taken entries, dropping malformed ones the way the Redis queue does.
    fn decode(stage: StageName, state: &mut StageState, taken: Vec<String>) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(taken.len());
        for id in taken {
            let Some(entry) = state.pending.get(&id) else {
                continue;
            };
            match serde_json::from_str::<StageMessage>(&entry.payload) {
                Ok(message) if message.stage == stage => {
                    deliveries.push(Delivery { id, message })
                }
                Ok(_) | Err(_) => {
                    warn!("Dropping malformed message {} on {}", id, stage);
                    state.pending.remove(&id);
                }
            }
        }
        deliveries
    }
}

#[async_trait]
impl StageQueue for MemoryQueue {
    async fn init(&self, stages: &[StageName]) -> QueueResult<()> {
        let mut inner = self.lock()?;
        for stage in stages {
            inner.stages.entry(*stage).or_default();
        }
        Ok(())
    }

    async fn enqueue(
        &self,
        message: &StageMessage,
        dedup_key: &str,
    ) -> QueueResult<EnqueueOutcome> {
        let payload = serde_json::to_string(message)?;
        {
            let mut inner = self.lock()?;
            if !inner.take_dedup(dedup_key, self.dedup_ttl) {
                debug!("Duplicate enqueue suppressed: {}", dedup_key);
                return Ok(EnqueueOutcome::Duplicate);
            }
            let id = inner.next_id();
            inner.enqueued_total += 1;
            inner
                .stages
                .entry(message.stage)
                .or_default()
                .ready
                .push_back((id, payload));
        }
        self.notify.notify_waiters();
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn enqueue_delayed(
        &self,
        message: &StageMessage,
        delay: Duration,
        dedup_key: &str,
    ) -> QueueResult<EnqueueOutcome> {
        let payload = serde_json::to_string(message)?;
        let mut inner = self.lock()?;
        if !inner.take_dedup(dedup_key, self.dedup_ttl) {
            debug!("Duplicate delayed enqueue suppressed: {}", dedup_key);
            return Ok(EnqueueOutcome::Duplicate);
        }
        let state = inner.stages.entry(message.stage).or_default();
        // Same payload scheduled twice keeps one entry, like a sorted set member.
        state.delayed.retain(|(_, p)| *p != payload);
        state.delayed.push((Instant::now() + delay, payload));
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn promote_due(&self, stages: &[StageName]) -> QueueResult<usize> {
        let now = Instant::now();
        let mut moved = 0;
        {
            let mut inner = self.lock()?;
            for stage in stages {
                let due: Vec<String> = match inner.stages.get_mut(stage) {
                    Some(state) => {
                        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut state.delayed)
                            .into_iter()
                            .partition(|(at, _)| *at <= now);
                        state.delayed = later;
                        due.into_iter().map(|(_, payload)| payload).collect()
                    }
                    None => continue,
                };
                for payload in due {
                    let id = inner.next_id();
                    inner.enqueued_total += 1;
                    inner
                        .stages
                        .entry(*stage)
                        .or_default()
                        .ready
                        .push_back((id, payload));
                    moved += 1;
                }
            }
        }
        if moved > 0 {
            self.notify.notify_waiters();
        }
        Ok(moved)
    }

    async fn consume(
        &self,
        stage: StageName,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let deadline = Instant::now() + block;

        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock()?;
                let state = inner.stages.entry(stage).or_default();
                let mut taken = Vec::new();
                while taken.len() < count.max(1) {
                    let Some((id, payload)) = state.ready.pop_front() else {
                        break;
                    };
                    state.pending.insert(
                        id.clone(),
                        PendingEntry {
                            payload,
                            consumer: consumer.to_string(),
                            delivered_at: Instant::now(),
                        },
                    );
                    taken.push(id);
                }
                if !taken.is_empty() {
                    let deliveries = Self::decode(stage, state, taken);
                    if !deliveries.is_empty() {
                        return Ok(deliveries);
                    }
                    continue;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(remaining, notified).await;
        }
    }

    async fn claim_stale(
        &self,
        stage: StageName,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> QueueResult<Vec<Delivery>> {
        let now = Instant::now();
        let mut inner = self.lock()?;
        let state = inner.stages.entry(stage).or_default();

        let mut taken = Vec::new();
        for (id, entry) in state.pending.iter_mut() {
            if taken.len() >= count {
                break;
            }
            if now.duration_since(entry.delivered_at) >= min_idle {
                entry.consumer = consumer.to_string();
                entry.delivered_at = now;
                taken.push(id.clone());
            }
        }

        Ok(Self::decode(stage, state, taken))
    }

    async fn keep_alive(&self, delivery: &Delivery, consumer: &str) -> QueueResult<()> {
        let mut inner = self.lock()?;
        if let Some(entry) = inner
            .stages
            .get_mut(&delivery.stage())
            .and_then(|state| state.pending.get_mut(&delivery.id))
        {
            entry.consumer = consumer.to_string();
            entry.delivered_at = Instant::now();
        }
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        let mut inner = self.lock()?;
        if let Some(state) = inner.stages.get_mut(&delivery.stage()) {
            state.pending.remove(&delivery.id);
        }
        Ok(())
    }

    async fn depth(&self, stage: StageName) -> QueueResult<QueueDepth> {
        let inner = self.lock()?;
        Ok(inner
            .stages
            .get(&stage)
            .map(|state| QueueDepth {
                ready: state.ready.len() as u64,
                pending: state.pending.len() as u64,
                delayed: state.delayed.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn ping(&self) -> QueueResult<()> {
        self.lock().map(|_| ())
    }
}
