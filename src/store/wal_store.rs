use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::engine::{lifecycle, SlotCalendar};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

use super::{ReservationStore, StoreError};

/// Every reservation of one pitch on one date, any status, sorted by start.
#[derive(Debug)]
pub struct DayState {
    pub key: SlotKey,
    pub reservations: Vec<Reservation>,
}

impl DayState {
    fn new(key: SlotKey) -> Self {
        Self {
            key,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping start order; equal starts stay in arrival order.
    fn insert(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.interval.start <= reservation.interval.start);
        self.reservations.insert(pos, reservation);
    }

    fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    fn conflict_for(&self, interval: &TimeInterval, excluding: Option<Ulid>) -> Option<Ulid> {
        SlotCalendar::build(self.key.resource_id, self.key.date, &self.reservations, excluding)
            .first_conflict(interval, None)
    }
}

type SharedDay = Arc<RwLock<DayState>>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, write the
/// batch, fsync once, and answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray buffered bytes don't leak into
    // the next batch; every sender in this batch is told it failed.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Apply an event to the day(s) it touches. Caller holds the write locks.
/// `secondary` is the replacement's day for a reschedule across dates.
fn apply_event(
    primary: &mut DayState,
    secondary: Option<&mut DayState>,
    event: &Event,
    index: &DashMap<Ulid, SlotKey>,
) {
    match event {
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.key());
            primary.insert(reservation.clone());
        }
        Event::StatusChanged { id, update, .. } => {
            if let Some(r) = primary.get_mut(*id) {
                update.apply_to(r);
            }
        }
        Event::Rescheduled {
            old_id,
            cancellation,
            replacement,
            ..
        } => {
            if let Some(old) = primary.get_mut(*old_id) {
                old.status = Status::Cancelled;
                old.cancellation = Some(cancellation.clone());
                old.updated_at = cancellation.at;
            }
            index.insert(replacement.id, replacement.key());
            match secondary {
                Some(day) => day.insert(replacement.clone()),
                None => primary.insert(replacement.clone()),
            }
        }
    }
}

/// The day an event is applied to first.
fn event_key(event: &Event) -> SlotKey {
    match event {
        Event::ReservationCreated { reservation } => reservation.key(),
        Event::StatusChanged { key, .. } => *key,
        Event::Rescheduled { old_key, .. } => *old_key,
    }
}

/// Reservation store backed by a write-ahead log and an in-memory day index.
///
/// Writes for one (resource, date) serialize on that day's lock; the overlap
/// check and the log append happen under it, so a losing writer always sees
/// `StoreError::Duplicate`. Each write runs on its own task, so an event that
/// reached the log is applied in memory even if the caller stops waiting.
pub struct WalStore {
    shared: Arc<Shared>,
}

struct Shared {
    days: DashMap<SlotKey, SharedDay>,
    /// Reservation id → the day holding it. Reservations never change day.
    index: DashMap<Ulid, SlotKey>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
    /// Writers share it, compaction takes it exclusively, so a snapshot never
    /// misses an event that is already queued for the old log.
    gate: RwLock<()>,
}

fn replay_contended(key: SlotKey) -> io::Error {
    io::Error::other(format!("replay found day {key} locked"))
}

/// Rejects a status change the reservation state machine does not allow.
fn ensure_transition(current: &Reservation, to: Status) -> Result<(), StoreError> {
    if lifecycle::can_transition(current.status, to) {
        Ok(())
    } else {
        Err(StoreError::InvalidTransition {
            id: current.id,
            from: current.status,
        })
    }
}

impl Shared {
    fn day(&self, key: SlotKey) -> SharedDay {
        self.days
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(key))))
            .clone()
    }

    fn existing_day(&self, key: &SlotKey) -> Option<SharedDay> {
        self.days.get(key).map(|e| e.value().clone())
    }

    fn days_where(&self, pred: impl Fn(&SlotKey) -> bool) -> Vec<SharedDay> {
        self.days
            .iter()
            .filter(|e| pred(e.key()))
            .map(|e| e.value().clone())
            .collect()
    }

    fn key_of(&self, id: Ulid) -> Result<SlotKey, StoreError> {
        self.index
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))
    }

    /// Apply a logged event during open. Nothing else holds a lock yet.
    fn replay(&self, event: &Event) -> io::Result<()> {
        let key = event_key(event);
        let primary = self.day(key);
        let mut primary = primary.try_write().map_err(|_| replay_contended(key))?;
        match event {
            Event::Rescheduled { old_key, replacement, .. } if *old_key != replacement.key() => {
                let key = replacement.key();
                let secondary = self.day(key);
                let mut secondary = secondary.try_write().map_err(|_| replay_contended(key))?;
                apply_event(&mut primary, Some(&mut *secondary), event, &self.index);
            }
            _ => apply_event(&mut primary, None, event, &self.index),
        }
        Ok(())
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(format!("WAL error: {e}")))
    }

    /// WAL-append + apply + notify. Caller holds the gate and the day locks.
    async fn commit(
        &self,
        primary: &mut DayState,
        secondary: Option<&mut DayState>,
        event: Event,
    ) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        apply_event(primary, secondary, &event, &self.index);
        debug!("committed {} on {}", event.name(), primary.key);
        self.notify.send(event.resource_id(), &event);
        Ok(())
    }

    async fn insert(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        if self.index.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        let mut day = self.day(reservation.key()).write_owned().await;
        if day.get(reservation.id).is_some() {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        if reservation.occupies_slot() {
            if let Some(winner) = day.conflict_for(&reservation.interval, None) {
                return Err(StoreError::Duplicate(winner));
            }
        }

        self.commit(
            &mut day,
            None,
            Event::ReservationCreated {
                reservation: reservation.clone(),
            },
        )
        .await?;
        Ok(reservation)
    }

    async fn update_status(&self, id: Ulid, update: StatusUpdate) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        let key = self.key_of(id)?;
        let mut day = self.day(key).write_owned().await;
        let current = day.get(id).ok_or(StoreError::NotFound(id))?;
        ensure_transition(current, update.status)?;
        if update.status == Status::Confirmed {
            if let Some(winner) = day.conflict_for(&current.interval, Some(id)) {
                return Err(StoreError::Duplicate(winner));
            }
        }

        self.commit(&mut day, None, Event::StatusChanged { id, key, update })
            .await?;
        day.get(id).cloned().ok_or(StoreError::NotFound(id))
    }

    async fn replace(
        &self,
        old_id: Ulid,
        cancellation: Cancellation,
        replacement: Reservation,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        let old_key = self.key_of(old_id)?;
        if self.index.contains_key(&replacement.id) {
            return Err(StoreError::AlreadyExists(replacement.id));
        }
        let new_key = replacement.key();
        let event = Event::Rescheduled {
            old_id,
            old_key,
            cancellation,
            replacement: replacement.clone(),
        };

        if old_key == new_key {
            let mut day = self.day(old_key).write_owned().await;
            Self::ensure_movable(&day, old_id)?;
            if replacement.occupies_slot() {
                if let Some(winner) = day.conflict_for(&replacement.interval, Some(old_id)) {
                    return Err(StoreError::Duplicate(winner));
                }
            }
            self.commit(&mut day, None, event).await?;
        } else {
            // Lock both days in key order, the same order every two-day writer uses.
            let (first, second) = if old_key < new_key {
                (old_key, new_key)
            } else {
                (new_key, old_key)
            };
            let first = self.day(first).write_owned().await;
            let second = self.day(second).write_owned().await;
            let (mut old_day, mut new_day) = if old_key < new_key {
                (first, second)
            } else {
                (second, first)
            };

            Self::ensure_movable(&old_day, old_id)?;
            if replacement.occupies_slot() {
                if let Some(winner) = new_day.conflict_for(&replacement.interval, None) {
                    return Err(StoreError::Duplicate(winner));
                }
            }
            self.commit(&mut old_day, Some(&mut *new_day), event).await?;
        }
        Ok(replacement)
    }

    /// Only a confirmed reservation can be swapped for a replacement.
    fn ensure_movable(day: &DayState, old_id: Ulid) -> Result<(), StoreError> {
        let old = day.get(old_id).ok_or(StoreError::NotFound(old_id))?;
        match old.status {
            Status::Confirmed => Ok(()),
            from => Err(StoreError::InvalidTransition { id: old_id, from }),
        }
    }
}

impl WalStore {
    /// Replay the log at `wal_path` and start its writer task. Needs a Tokio runtime.
    pub fn open(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (wal, events) = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);

        let shared = Shared {
            days: DashMap::new(),
            index: DashMap::new(),
            wal_tx,
            notify,
            gate: RwLock::new(()),
        };
        for event in &events {
            shared.replay(event)?;
        }
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        info!(
            "reservation log {} replayed: {} events, {} reservations",
            wal_path.display(),
            events.len(),
            shared.index.len()
        );
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.shared.notify
    }

    pub fn reservation_count(&self) -> usize {
        self.shared.index.len()
    }

    async fn collect(days: Vec<SharedDay>, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut out = Vec::new();
        for day in days {
            let guard = day.read().await;
            out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
        }
        out.sort_by_key(|r| (r.date, r.interval.start));
        out
    }

    /// Run a write on its own task. Dropping the returned future detaches the
    /// write instead of abandoning it between the log append and the apply.
    async fn detached<T, F>(&self, write: impl FnOnce(Arc<Shared>) -> F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, StoreError>> + Send + 'static,
    {
        tokio::spawn(write(Arc::clone(&self.shared)))
            .await
            .map_err(|e| StoreError::Unavailable(format!("store write task failed: {e}")))?
    }

    /// Rewrite the log as one creation record per reservation in its current state.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let shared = &self.shared;
        let _gate = shared.gate.write().await;

        let mut events = Vec::with_capacity(shared.index.len());
        for day in shared.days_where(|_| true) {
            let guard = day.read().await;
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        shared
            .wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Unavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Unavailable("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Unavailable(format!("WAL compaction failed: {e}")))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("reservation log compacted to {count} records");
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .shared
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn load_reservations(&self, resource_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, StoreError> {
        let Some(day) = self.shared.existing_day(&SlotKey::new(resource_id, date)) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard.reservations.clone())
    }

    async fn get_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        let Ok(key) = self.shared.key_of(id) else {
            return Ok(None);
        };
        let Some(day) = self.shared.existing_day(&key) else {
            return Ok(None);
        };
        let guard = day.read().await;
        Ok(guard.get(id).cloned())
    }

    async fn insert_reservation(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        self.detached(move |s| async move { s.insert(reservation).await })
            .await
    }

    async fn update_status(&self, id: Ulid, update: StatusUpdate) -> Result<Reservation, StoreError> {
        self.detached(move |s| async move { s.update_status(id, update).await })
            .await
    }

    async fn replace_reservation(
        &self,
        old_id: Ulid,
        cancellation: Cancellation,
        replacement: Reservation,
    ) -> Result<Reservation, StoreError> {
        self.detached(move |s| async move { s.replace(old_id, cancellation, replacement).await })
            .await
    }

    async fn reservations_for_holder(&self, holder: &Holder) -> Result<Vec<Reservation>, StoreError> {
        Ok(Self::collect(self.shared.days_where(|_| true), |r| &r.holder == holder).await)
    }

    async fn reservations_for_resource(&self, resource_id: Ulid) -> Result<Vec<Reservation>, StoreError> {
        Ok(Self::collect(self.shared.days_where(|k| k.resource_id == resource_id), |_| true).await)
    }

    async fn pending_reservations(&self) -> Result<Vec<Reservation>, StoreError> {
        Ok(Self::collect(self.shared.days_where(|_| true), |r| r.status == Status::Pending).await)
    }
}
