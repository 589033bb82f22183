mod availability;
mod conflict;
mod error;
mod invitations;
mod mutations;
mod notifications;
mod queries;
mod store;

pub use availability::{free_windows, merge_overlapping, subtract_intervals};
pub use error::EngineError;
pub use store::{BookingRepository, InMemoryStore, NotificationRepository};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::TimeDelta;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedMutexGuard, RwLock};

use crate::clock::Clock;
use crate::directory::{RoomDirectory, StaticDirectory, UserDirectory};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

/// Default slack for reminder matching: a booking qualifies while
/// `now + 1h` is within this much of its start.
pub const DEFAULT_REMINDER_TOLERANCE: TimeDelta = TimeDelta::minutes(5);

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// All events of one engine operation; durable together or not at all.
    Append {
        events: Vec<Event>,
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

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                        Ok(other) => {
                            // Flush what we have before the non-append command.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
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
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("wal flush of {} operations failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    'outer: for (events, _) in batch {
        for event in events {
            if let Err(e) = wal.append_buffered(event) {
                append_err = Some(e);
                break 'outer;
            }
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { events, response } => {
            let mut batch = vec![(events, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// Everything the engine consults but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub rooms: Arc<dyn RoomDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub bookings: Arc<dyn BookingRepository>,
    pub notifications: Arc<dyn NotificationRepository>,
    pub clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
}

impl Collaborators {
    /// One static directory for rooms and users, one in-memory store for both repositories.
    pub fn in_memory(directory: Arc<StaticDirectory>, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            rooms: directory.clone(),
            users: directory,
            bookings: store.clone(),
            notifications: store,
            clock,
            notify: Arc::new(NotifyHub::new()),
        }
    }
}

/// The booking lifecycle engine.
///
/// Every mutation takes the lock of each room it touches, validates against
/// the repositories, appends its events to the WAL and only then applies them.
pub struct Engine {
    pub(super) rooms: Arc<dyn RoomDirectory>,
    pub(super) users: Arc<dyn UserDirectory>,
    pub(super) bookings: Arc<dyn BookingRepository>,
    pub(super) notifications: Arc<dyn NotificationRepository>,
    pub(super) clock: Arc<dyn Clock>,
    pub notify: Arc<NotifyHub>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    room_locks: DashMap<RoomId, Arc<Mutex<()>>>,
    /// Held shared by every commit, exclusively while a compaction snapshot is taken.
    commit_gate: RwLock<()>,
    next_booking_id: AtomicU64,
    next_notification_id: AtomicU64,
    pub(super) reminder_tolerance: TimeDelta,
}

impl Engine {
    /// Replay the WAL at `wal_path` into the repositories and start the writer task.
    pub fn new(wal_path: PathBuf, parts: Collaborators) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: parts.rooms,
            users: parts.users,
            bookings: parts.bookings,
            notifications: parts.notifications,
            clock: parts.clock,
            notify: parts.notify,
            wal_tx,
            room_locks: DashMap::new(),
            commit_gate: RwLock::new(()),
            next_booking_id: AtomicU64::new(1),
            next_notification_id: AtomicU64::new(1),
            reminder_tolerance: DEFAULT_REMINDER_TOLERANCE,
        };

        for event in &events {
            engine.apply_event(event);
        }
        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}; next booking id {}",
                events.len(),
                wal_path.display(),
                engine.next_booking_id.load(Ordering::SeqCst)
            );
        }

        Ok(engine)
    }

    pub fn with_reminder_tolerance(mut self, tolerance: TimeDelta) -> Self {
        self.reminder_tolerance = tolerance;
        self
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(super) fn allocate_booking_id(&self) -> BookingId {
        self.next_booking_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(super) fn allocate_notification_id(&self) -> NotificationId {
        self.next_notification_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Write events to the WAL via the background group-commit writer.
    async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Internal(format!("WAL write failed: {e}")))
    }

    /// WAL-append + apply + push notifications. The caller holds the room lock(s).
    pub(super) async fn persist_and_apply(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(events.clone()).await?;
        for event in &events {
            self.apply_event(event);
            if let Event::NotificationCreated(n) = event {
                metrics::counter!(crate::observability::NOTIFICATIONS_TOTAL, "kind" => n.kind.as_str())
                    .increment(1);
                self.notify.send(n);
            }
        }
        Ok(())
    }

    /// Apply a committed event to the repositories (validated before commit).
    fn apply_event(&self, event: &Event) {
        match event {
            Event::BookingCreated(booking) | Event::BookingUpdated(booking) => {
                self.next_booking_id.fetch_max(booking.id + 1, Ordering::SeqCst);
                self.bookings.put(booking.clone());
            }
            Event::BookingCancelled { id, .. } => {
                self.bookings.remove(*id);
            }
            Event::InvitationAccepted { booking_id, user_id } => {
                self.modify_booking(*booking_id, |b| {
                    b.pending_attendee_ids.remove(user_id);
                    b.accepted_attendee_ids.insert(*user_id);
                });
            }
            Event::InvitationDeclined { booking_id, user_id } => {
                self.modify_booking(*booking_id, |b| {
                    b.pending_attendee_ids.remove(user_id);
                    b.accepted_attendee_ids.remove(user_id);
                });
            }
            Event::AttendeeRegistered { booking_id, user_id } => {
                self.modify_booking(*booking_id, |b| {
                    b.accepted_attendee_ids.insert(*user_id);
                });
            }
            Event::ReminderSent { booking_id } => {
                self.modify_booking(*booking_id, |b| b.reminder_sent = true);
            }
            Event::NotificationCreated(n) => {
                self.next_notification_id.fetch_max(n.id + 1, Ordering::SeqCst);
                self.notifications.put(n.clone());
            }
            Event::NotificationRead { id } => {
                if let Some(mut n) = self.notifications.get(*id) {
                    n.is_read = true;
                    self.notifications.put(n);
                }
            }
            Event::NotificationDeleted { id } => {
                self.notifications.remove(*id);
            }
            Event::IdWatermark { booking, notification } => {
                self.next_booking_id.fetch_max(booking + 1, Ordering::SeqCst);
                self.next_notification_id.fetch_max(notification + 1, Ordering::SeqCst);
            }
        }
    }

    fn modify_booking(&self, id: BookingId, f: impl FnOnce(&mut Booking)) {
        if let Some(mut booking) = self.bookings.get(id) {
            f(&mut booking);
            self.bookings.put(booking);
        }
    }

    // ── Per-room mutation locks ──────────────────────────────

    fn room_lock(&self, room_id: RoomId) -> Arc<Mutex<()>> {
        self.room_locks.entry(room_id).or_default().clone()
    }

    /// Lock several rooms in ascending id order so concurrent callers can't deadlock.
    pub(super) async fn lock_rooms(&self, mut room_ids: Vec<RoomId>) -> Vec<OwnedMutexGuard<()>> {
        room_ids.sort_unstable();
        room_ids.dedup();
        let mut guards = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            guards.push(self.room_lock(room_id).lock_owned().await);
        }
        guards
    }

    /// Lock the room a booking lives on (plus `also`, if given) and return a
    /// fresh copy of the booking read under that lock. Retries if the booking
    /// moved rooms while we waited.
    pub(super) async fn lock_booking(
        &self,
        id: BookingId,
        also: Option<RoomId>,
    ) -> Result<(Booking, Vec<OwnedMutexGuard<()>>), EngineError> {
        loop {
            let room_id = self
                .bookings
                .get(id)
                .ok_or_else(|| EngineError::NotFound(format!("booking {id}")))?
                .room_id;
            let mut rooms = vec![room_id];
            rooms.extend(also);
            let guards = self.lock_rooms(rooms).await;
            match self.bookings.get(id) {
                Some(booking) if booking.room_id == room_id => return Ok((booking, guards)),
                Some(_) => continue,
                None => return Err(EngineError::NotFound(format!("booking {id}"))),
            }
        }
    }

    // ── Compaction ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = vec![Event::IdWatermark {
            booking: self.next_booking_id.load(Ordering::SeqCst).saturating_sub(1),
            notification: self.next_notification_id.load(Ordering::SeqCst).saturating_sub(1),
        }];
        let mut bookings = self.bookings.all();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(Event::BookingCreated));
        let mut notifications = self.notifications.all();
        notifications.sort_by_key(|n| n.id);
        events.extend(notifications.into_iter().map(Event::NotificationCreated));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Internal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Internal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Internal(format!("WAL compaction failed: {e}")))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
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
