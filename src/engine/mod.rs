mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use conflict::{Calendar, SharedCalendar};
pub use error::EngineError;
pub use store::Tables;

use std::io;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::SCHEMA_VERSION;
use crate::location::Location;
use crate::model::*;
use crate::wal::Wal;

pub const ENGINE_VERSION: &str = concat!("zeroq ", env!("CARGO_PKG_VERSION"));

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

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("{}: WAL flush failed: {e}", wal.path().display());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_and_respond(wal, &mut batch);
        }
    }
}

/// One logical database: in-memory tables, per-resource calendars and,
/// for file locations, a WAL owned by a group-commit writer task.
pub struct Engine {
    location: Location,
    schema_version: u32,
    pub(super) tables: Tables,
    pub(super) calendars: DashMap<Ulid, SharedCalendar>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
    /// Commits hold this shared; compaction holds it exclusive so no commit
    /// lands between the snapshot and the file swap.
    commit_gate: RwLock<()>,
    /// Serializes organization registry changes (slug uniqueness, tier).
    pub(super) registry_lock: Mutex<()>,
    /// Per-organization gate. Bookings hold it shared; changes to the
    /// entities a reservation references hold it exclusive.
    org_gates: DashMap<Ulid, Arc<RwLock<()>>>,
}

impl Engine {
    /// Open a database, replaying its log if it has one. A new or empty log
    /// starts with a `SchemaApplied` event; a torn tail is cut off before
    /// anything is appended. A non-empty file without a single valid entry is
    /// refused untouched.
    pub fn open(location: &Location) -> Result<Self, EngineError> {
        let (events, wal_tx) = match location {
            Location::Memory(_) => (Vec::new(), None),
            Location::File(path) => {
                let recovered = Wal::recover(path)?;
                if recovered.events.is_empty() && recovered.file_len > 0 {
                    return Err(EngineError::NotADatabase(path.display().to_string()));
                }
                if recovered.has_torn_tail() {
                    warn!(
                        "{location}: truncating {} bytes of torn tail",
                        recovered.file_len - recovered.valid_len
                    );
                    Wal::truncate_tail(path, recovered.valid_len)?;
                }
                let events = recovered.events;
                let mut wal = Wal::open(path)?;
                if events.is_empty() {
                    wal.append_buffered(&Event::SchemaApplied { version: SCHEMA_VERSION })?;
                    wal.flush_sync()?;
                }
                (events, Some(wal))
            }
        };

        let schema_version = events
            .iter()
            .filter_map(|e| match e {
                Event::SchemaApplied { version } => Some(*version),
                _ => None,
            })
            .max()
            .unwrap_or(SCHEMA_VERSION);
        if schema_version > SCHEMA_VERSION {
            return Err(EngineError::SchemaTooNew(schema_version));
        }

        let wal_tx = wal_tx.map(|wal| {
            let (tx, rx) = mpsc::channel(4096);
            tokio::spawn(wal_writer_loop(wal, rx));
            tx
        });

        let engine = Self {
            location: location.clone(),
            schema_version,
            tables: Tables::default(),
            calendars: DashMap::new(),
            wal_tx,
            commit_gate: RwLock::new(()),
            registry_lock: Mutex::new(()),
            org_gates: DashMap::new(),
        };

        for event in &events {
            engine.tables.apply(event);
        }
        engine.rebuild_calendars();

        if !events.is_empty() {
            info!(
                "{location}: replayed {} events ({} reservations)",
                events.len(),
                engine.tables.reservations.len()
            );
        }
        Ok(engine)
    }

    /// Rebuild every calendar from the reservation table. Only called while
    /// nothing else can see the engine, so `try_write` never contends.
    fn rebuild_calendars(&self) {
        for r in self.tables.reservations.iter() {
            if !r.status.occupies_calendar() {
                continue;
            }
            let cal = self.calendar(r.resource_id);
            if let Ok(mut guard) = cal.try_write() {
                guard.insert(r.id, r.span());
            }
        }
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub(super) fn calendar(&self, resource_id: Ulid) -> SharedCalendar {
        self.calendars.entry(resource_id).or_default().value().clone()
    }

    pub(super) fn org_gate(&self, organization_id: Ulid) -> Arc<RwLock<()>> {
        self.org_gates.entry(organization_id).or_default().value().clone()
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
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

    /// WAL-append + apply. Calendar changes are the caller's job since it
    /// already holds the calendar guard.
    pub(super) async fn commit(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        self.tables.apply(event);
        match event {
            Event::ResourceDeleted { .. }
            | Event::ServiceDeleted { .. }
            | Event::OrganizationDeleted { .. } => {
                self.calendars
                    .retain(|id, _| self.tables.resources.contains_key(id));
            }
            _ => {}
        }
        Ok(())
    }

    /// Rewrite the WAL with only the events needed to recreate current state.
    /// No-op for in-memory databases.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().await;
        let events = self.tables.snapshot(self.schema_version);
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
