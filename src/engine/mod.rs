mod allocation;
mod capacity;
mod clips;
mod error;
mod groups;
mod lottery;
mod mutations;
mod phases;
mod queries;
mod scheduler;
mod store;

pub use capacity::{
    available_by_size, blocking_sizes, capacity_index, oversubscribed_sizes, selectable_by_size,
};
pub use error::{EngineError, SuiteUnavailable};
pub use lottery::{Candidate, assign_numbers, eligible_units, sorting_size};
pub use scheduler::{is_selected, lottery_rows, next_eligible};
pub use store::{InMemoryStore, SharedDraw, SharedGroup, SharedSuite};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::sync::{
    Mutex, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot,
};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notice, Notification, NotifyHub};
use crate::wal::Wal;

use store::{apply_to_draw, apply_to_group, apply_to_suite};

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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
/// take the first append, drain whatever else is already queued, then
/// fsync once for the whole batch and answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    // Flush what we have before compaction sees the file.
                    deferred = Some(other);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
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

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch; every caller in this batch is told it failed.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

/// Millisecond wall clock.
pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// One college's lottery engine: the repository, the WAL writer and the
/// tenant's notification hub.
pub struct Engine {
    pub tenant: String,
    pub store: InMemoryStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) sort_config: RwLock<SortConfig>,
    pub(super) lottery_rng: Mutex<ChaCha8Rng>,
}

/// Rebuild state from the log. We're the sole owner of every lock here, so
/// try_read/try_write always succeed instantly. Never use blocking_write:
/// this may run inside an async context (lazy tenant creation).
fn replay(store: &InMemoryStore, events: &[Event]) -> SortConfig {
    let mut config = SortConfig::default();
    for event in events {
        store.apply_index(event);
        if let Event::SortConfigured { config: c } = event {
            config = *c;
        }
        if let Some(draw_id) = event.draw_id()
            && let Some(draw) = store.get_draw(&draw_id)
        {
            let mut guard = draw.try_write().expect("replay: uncontended write");
            apply_to_draw(&mut guard, event);
        }
        if let Some(group_id) = event.group_id()
            && let Some(group) = store.get_group(&group_id)
        {
            let mut guard = group.try_write().expect("replay: uncontended write");
            apply_to_group(&mut guard, event);
        }
        if let Some(suite_id) = event.suite_id()
            && let Some(suite) = store.get_suite(&suite_id)
        {
            let mut guard = suite.try_lock().expect("replay: uncontended lock");
            apply_to_suite(&mut guard, event);
        }
    }
    config
}

impl Engine {
    pub fn new(tenant: String, wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = InMemoryStore::new();
        let sort_config = replay(&store, &events);
        if !events.is_empty() {
            info!(tenant = %tenant, events = events.len(), "replayed WAL");
        }

        Ok(Self {
            tenant,
            store,
            wal_tx,
            notify,
            sort_config: RwLock::new(sort_config),
            lottery_rng: Mutex::new(ChaCha8Rng::seed_from_u64(rand::random())),
        })
    }

    /// Make shuffle tie-breaks reproducible.
    pub async fn seed_lottery(&self, seed: u64) {
        *self.lottery_rng.lock().await = ChaCha8Rng::seed_from_u64(seed);
    }

    pub async fn sort_config(&self) -> SortConfig {
        *self.sort_config.read().await
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then index + entity apply, then notify. Nothing is
    /// mutated unless the append succeeded.
    pub(super) async fn persist_and_apply(
        &self,
        event: Event,
        apply: impl FnOnce(&Event),
    ) -> Result<(), EngineError> {
        self.wal_append(&event).await?;
        self.store.apply_index(&event);
        apply(&event);
        self.publish(&event);
        Ok(())
    }

    pub(super) fn publish(&self, event: &Event) {
        let notices: Vec<(Option<Ulid>, Notification)> = match event {
            Event::PhaseChanged {
                draw_id, from, to, ..
            } => vec![(
                Some(*draw_id),
                Notification::DrawPhaseChanged {
                    draw_id: *draw_id,
                    old_phase: *from,
                    new_phase: *to,
                },
            )],
            Event::DrawArchived { draw_id } => vec![(
                Some(*draw_id),
                Notification::DrawArchived { draw_id: *draw_id },
            )],
            Event::GroupLocked { group_id } => vec![(
                self.store.draw_of_group(group_id),
                Notification::GroupLocked {
                    group_id: *group_id,
                },
            )],
            Event::GroupDisbanded {
                group_id,
                draw_id,
                suite_id,
                former_members,
                ..
            } => {
                let mut out = vec![(
                    *draw_id,
                    Notification::GroupDisbanded {
                        group_id: *group_id,
                        former_members: former_members.clone(),
                    },
                )];
                if let Some(suite_id) = suite_id {
                    out.push((
                        *draw_id,
                        Notification::SuiteUnassigned {
                            group_id: *group_id,
                            suite_id: *suite_id,
                        },
                    ));
                }
                out
            }
            Event::SuiteAssigned { group_id, suite_id } => vec![(
                self.store.draw_of_group(group_id),
                Notification::SuiteAssigned {
                    group_id: *group_id,
                    suite_id: *suite_id,
                },
            )],
            Event::SuiteUnassigned { group_id, suite_id } => vec![(
                self.store.draw_of_group(group_id),
                Notification::SuiteUnassigned {
                    group_id: *group_id,
                    suite_id: *suite_id,
                },
            )],
            _ => return,
        };
        for (draw_id, notification) in notices {
            self.notify.send(Notice {
                tenant: self.tenant.clone(),
                draw_id,
                notification,
            });
        }
    }

    // ── Lock helpers (draw → group → suite) ──────────────────

    pub(super) async fn draw_read(
        &self,
        draw_id: &Ulid,
    ) -> Result<OwnedRwLockReadGuard<DrawState>, EngineError> {
        let draw = self
            .store
            .get_draw(draw_id)
            .ok_or(EngineError::NotFound(*draw_id))?;
        Ok(draw.read_owned().await)
    }

    pub(super) async fn draw_write(
        &self,
        draw_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DrawState>, EngineError> {
        let draw = self
            .store
            .get_draw(draw_id)
            .ok_or(EngineError::NotFound(*draw_id))?;
        Ok(draw.write_owned().await)
    }

    /// Group write lock. Re-checks existence after acquiring, since a
    /// disband may have won the race for the lock.
    pub(super) async fn group_write(
        &self,
        group_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<Group>, EngineError> {
        let group = self
            .store
            .get_group(group_id)
            .ok_or(EngineError::NotFound(*group_id))?;
        let guard = group.write_owned().await;
        if !self.store.contains_group(group_id) {
            return Err(EngineError::NotFound(*group_id));
        }
        Ok(guard)
    }

    /// The group's draw read-locked (none for special groups), then the
    /// group write-locked.
    pub(super) async fn lock_group_for_update(
        &self,
        group_id: &Ulid,
    ) -> Result<(Option<OwnedRwLockReadGuard<DrawState>>, OwnedRwLockWriteGuard<Group>), EngineError>
    {
        let draw = match self.store.draw_of_group(group_id) {
            Some(draw_id) => Some(self.draw_read(&draw_id).await?),
            None => None,
        };
        let group = self.group_write(group_id).await?;
        Ok((draw, group))
    }

    /// Eligible units of a draw under the current sort configuration.
    pub(super) async fn candidates(
        &self,
        ds: &DrawState,
        groups: &std::collections::BTreeMap<Ulid, Group>,
    ) -> Vec<Candidate> {
        let config = self.sort_config().await;
        eligible_units(groups, &ds.clips, &config, |id| self.store.surname_of(id))
    }
}

pub(super) fn ensure_active(ds: &DrawState) -> Result<(), EngineError> {
    if ds.active {
        Ok(())
    } else {
        Err(EngineError::Precondition(format!("draw {} is archived", ds.id)))
    }
}
