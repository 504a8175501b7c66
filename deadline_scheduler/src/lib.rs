//! Deadline enforcement for money collections: every `pending` collection is
//! guaranteed a terminal state no later than its `deadline_at` (plus a small
//! firing budget). The in-process queue is a latency aid only; the persisted
//! `deadline_at` column is the source of truth, re-scanned on startup and by
//! a periodic sweep.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use approval_engine::{Actor, ApprovalAction, ApprovalEngine, DeadlineTimers, EngineError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::EntityKind;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    NotRunning,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

enum Event {
    Command(Option<Command>),
    Sweep,
    TimerDue,
}

#[derive(Debug)]
enum Command {
    Register {
        entity_id: Uuid,
        deadline_at: DateTime<Utc>,
    },
    Cancel {
        entity_id: Uuid,
    },
}

/// Cheap clonable handle used by the resource services (register at creation)
/// and by the approval engine (cancel inside approve/reject).
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SchedulerHandle {
    /// Called inside the creation path, before the creating transaction
    /// commits; an error here must roll the creation back.
    pub fn register(&self, entity_id: Uuid, deadline_at: DateTime<Utc>) -> Result<(), SchedulerError> {
        self.tx
            .send(Command::Register {
                entity_id,
                deadline_at,
            })
            .map_err(|_| SchedulerError::NotRunning)
    }

    pub fn cancel_timer(&self, entity_id: Uuid) {
        // A cancel racing a fire is safe: the expiry transition re-checks the
        // row status, so a missed cancel is only a wasted no-op fire.
        let _ = self.tx.send(Command::Cancel { entity_id });
    }
}

#[async_trait]
impl DeadlineTimers for SchedulerHandle {
    async fn cancel(&self, entity_id: Uuid) {
        self.cancel_timer(entity_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    deadline_at: DateTime<Utc>,
    entity_id: Uuid,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Ascending deadline, ties broken by entity id, for fair firing.
        self.deadline_at
            .cmp(&other.deadline_at)
            .then(self.entity_id.cmp(&other.entity_id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The pure timer wheel: a min-heap over `(deadline_at, id)` plus a lazy
/// cancellation set.
struct DeadlineQueue {
    heap: BinaryHeap<Reverse<QueueEntry>>,
    cancelled: HashSet<Uuid>,
}

impl DeadlineQueue {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
        }
    }

    fn push(&mut self, entity_id: Uuid, deadline_at: DateTime<Utc>) {
        self.cancelled.remove(&entity_id);
        self.heap.push(Reverse(QueueEntry {
            deadline_at,
            entity_id,
        }));
    }

    fn cancel(&mut self, entity_id: Uuid) {
        self.cancelled.insert(entity_id);
    }

    fn next_deadline(&mut self) -> Option<DateTime<Utc>> {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.cancelled.contains(&entry.entity_id) {
                let Reverse(entry) = self.heap.pop().expect("peeked entry");
                self.cancelled.remove(&entry.entity_id);
                continue;
            }
            return Some(entry.deadline_at);
        }
        None
    }

    /// Pops every live entry due at `now`, in firing order.
    fn pop_ready(&mut self, now: DateTime<Utc>) -> Vec<QueueEntry> {
        let mut ready = Vec::new();
        loop {
            match self.heap.peek() {
                Some(Reverse(entry)) if entry.deadline_at <= now => {
                    let Reverse(entry) = self.heap.pop().expect("peeked entry");
                    if self.cancelled.remove(&entry.entity_id) {
                        continue;
                    }
                    ready.push(entry);
                }
                _ => break,
            }
        }
        ready
    }
}

pub struct DeadlineScheduler {
    pool: PgPool,
    rx: mpsc::UnboundedReceiver<Command>,
    sweep_interval: Duration,
}

impl DeadlineScheduler {
    pub fn new(pool: PgPool, sweep_interval: Duration) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                pool,
                rx,
                sweep_interval,
            },
            SchedulerHandle { tx },
        )
    }

    /// Re-arms from storage and runs the fire loop until the process exits.
    pub fn spawn(self, engine: Arc<ApprovalEngine>) {
        tokio::spawn(async move {
            if let Err(err) = self.run(engine).await {
                error!(error = %err, "deadline scheduler stopped");
            }
        });
    }

    async fn run(mut self, engine: Arc<ApprovalEngine>) -> Result<(), SchedulerError> {
        let mut queue = DeadlineQueue::new();

        // Durability: pending deadlines survive restarts. Overdue rows are
        // expired immediately, ascending by (deadline_at, id); the rest are
        // re-armed.
        let pending = self.load_pending().await?;
        info!(count = pending.len(), "re-arming pending collection deadlines");
        for entry in pending {
            queue.push(entry.entity_id, entry.deadline_at);
        }

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let sleep_for = match queue.next_deadline() {
                Some(deadline) => {
                    let now = Utc::now();
                    if deadline <= now {
                        Duration::ZERO
                    } else {
                        (deadline - now).to_std().unwrap_or(Duration::ZERO)
                    }
                }
                // Nothing armed; wait for commands or the next sweep.
                None => Duration::from_secs(3600),
            };

            let event = tokio::select! {
                command = self.rx.recv() => Event::Command(command),
                _ = sweep.tick() => Event::Sweep,
                _ = tokio::time::sleep(sleep_for) => Event::TimerDue,
            };

            match event {
                Event::Command(Some(Command::Register {
                    entity_id,
                    deadline_at,
                })) => {
                    debug!(entity = %entity_id, %deadline_at, "deadline registered");
                    queue.push(entity_id, deadline_at);
                }
                Event::Command(Some(Command::Cancel { entity_id })) => {
                    debug!(entity = %entity_id, "deadline cancelled");
                    queue.cancel(entity_id);
                }
                Event::Command(None) => return Ok(()),
                Event::Sweep => {
                    // Backstop: anything the queue missed (lost command,
                    // clock weirdness) is picked up from the column.
                    match self.load_overdue().await {
                        Ok(entries) => {
                            for entry in entries {
                                queue.push(entry.entity_id, entry.deadline_at);
                            }
                        }
                        Err(err) => warn!(error = %err, "deadline sweep failed"),
                    }
                }
                Event::TimerDue => {}
            }

            let now = Utc::now();
            for entry in queue.pop_ready(now) {
                // Wall clock is the deadline authority. If the clock jumped
                // backwards since the entry was queued, firing would be
                // early; re-queue instead.
                if Utc::now() < entry.deadline_at {
                    queue.push(entry.entity_id, entry.deadline_at);
                    continue;
                }
                fire_expiry(&engine, entry.entity_id).await;
            }
        }
    }

    async fn load_pending(&self) -> Result<Vec<QueueEntry>, SchedulerError> {
        let rows = sqlx::query(
            "SELECT id, deadline_at FROM money_collections
             WHERE status = 'pending'
             ORDER BY deadline_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(QueueEntry {
                    entity_id: row.try_get("id")?,
                    deadline_at: row.try_get("deadline_at")?,
                })
            })
            .collect()
    }

    async fn load_overdue(&self) -> Result<Vec<QueueEntry>, SchedulerError> {
        let rows = sqlx::query(
            "SELECT id, deadline_at FROM money_collections
             WHERE status = 'pending' AND deadline_at <= NOW()
             ORDER BY deadline_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(QueueEntry {
                    entity_id: row.try_get("id")?,
                    deadline_at: row.try_get("deadline_at")?,
                })
            })
            .collect()
    }
}

/// One fire per entry; the engine's row lock and idempotency suppress any
/// duplicate fire from the sweep racing the queue.
async fn fire_expiry(engine: &ApprovalEngine, entity_id: Uuid) {
    match engine
        .transition(
            EntityKind::MoneyCollection,
            entity_id,
            None,
            Actor::System,
            ApprovalAction::Expire,
            None,
        )
        .await
    {
        Ok(outcome) => {
            info!(entity = %entity_id, status = ?outcome.head().status, "collection expired");
        }
        // Approved or rejected in the meantime; already handled.
        Err(EngineError::InvalidStateTransition { current, .. }) => {
            debug!(entity = %entity_id, current = ?current, "expiry skipped, already terminal");
        }
        Err(EngineError::NotFound) => {
            warn!(entity = %entity_id, "expiry fired for missing collection");
        }
        Err(err) => {
            // The sweep will retry; the deadline promise survives a transient
            // database failure.
            warn!(entity = %entity_id, error = %err, "expiry transition failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn entry_id(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn queue_pops_in_deadline_order_with_id_ties() {
        let mut queue = DeadlineQueue::new();
        let base = Utc::now();
        queue.push(entry_id(3), base + ChronoDuration::seconds(5));
        queue.push(entry_id(1), base);
        queue.push(entry_id(2), base);

        let ready = queue.pop_ready(base + ChronoDuration::seconds(10));
        let ids: Vec<Uuid> = ready.iter().map(|e| e.entity_id).collect();
        // Same deadline ties break on the entity id.
        assert_eq!(ids, vec![entry_id(1), entry_id(2), entry_id(3)]);
    }

    #[test]
    fn queue_only_pops_due_entries() {
        let mut queue = DeadlineQueue::new();
        let base = Utc::now();
        queue.push(entry_id(1), base);
        queue.push(entry_id(2), base + ChronoDuration::seconds(60));

        let ready = queue.pop_ready(base);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].entity_id, entry_id(1));
        assert_eq!(
            queue.next_deadline(),
            Some(base + ChronoDuration::seconds(60))
        );
    }

    #[test]
    fn cancelled_entries_never_fire() {
        let mut queue = DeadlineQueue::new();
        let base = Utc::now();
        queue.push(entry_id(1), base);
        queue.push(entry_id(2), base);
        queue.cancel(entry_id(1));

        let ready = queue.pop_ready(base);
        let ids: Vec<Uuid> = ready.iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec![entry_id(2)]);
    }

    #[test]
    fn cancel_then_reregister_is_live_again() {
        let mut queue = DeadlineQueue::new();
        let base = Utc::now();
        queue.push(entry_id(1), base);
        queue.cancel(entry_id(1));
        queue.push(entry_id(1), base);

        let ready = queue.pop_ready(base);
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn next_deadline_skips_cancelled_head() {
        let mut queue = DeadlineQueue::new();
        let base = Utc::now();
        queue.push(entry_id(1), base);
        queue.push(entry_id(2), base + ChronoDuration::seconds(30));
        queue.cancel(entry_id(1));

        assert_eq!(
            queue.next_deadline(),
            Some(base + ChronoDuration::seconds(30))
        );
    }

    #[test]
    fn handle_register_fails_after_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SchedulerHandle { tx };
        drop(rx);
        assert!(matches!(
            handle.register(entry_id(1), Utc::now()),
            Err(SchedulerError::NotRunning)
        ));
    }
}
