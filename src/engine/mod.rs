mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedJobCard = Arc<RwLock<JobCard>>;
pub type SharedWorkOrder = Arc<RwLock<WorkOrder>>;
pub type SharedAllocation = Arc<RwLock<ResourceAllocation>>;
pub(crate) type AllocationGuard = OwnedRwLockWriteGuard<ResourceAllocation>;

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
/// 5. Respond Ok to all senders.
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

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(ref e) = result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes do not
    // land in front of the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Job card ledger: work orders, workstations, job cards and the per-resource
/// allocation index the overlap check runs against.
///
/// Lock order is always job card → allocations (sorted by resource) → work order.
pub struct Engine {
    pub(super) workstations: DashSet<String>,
    pub(super) work_orders: DashMap<Ulid, SharedWorkOrder>,
    pub(super) job_cards: DashMap<Ulid, SharedJobCard>,
    pub(super) allocations: DashMap<ResourceId, SharedAllocation>,
    /// Work order → job cards index.
    pub(super) by_work_order: DashMap<Ulid, Vec<Ulid>>,
    /// Held from the duplicate check of a create until its insert.
    pub(super) creates: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            workstations: DashSet::new(),
            work_orders: DashMap::new(),
            job_cards: DashMap::new(),
            allocations: DashMap::new(),
            by_work_order: DashMap::new(),
            creates: Mutex::new(()),
            wal_tx,
        };

        // Replay runs before the engine is shared, so every try_read/try_write
        // succeeds. Never block here: this may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }
        tracing::info!(
            "replayed {} events: {} work orders, {} job cards",
            events.len(),
            engine.work_orders.len(),
            engine.job_cards.len()
        );

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::WorkstationCreated { name } => {
                self.workstations.insert(name.clone());
            }
            Event::WorkOrderCreated {
                id,
                production_item,
                qty,
                operations,
            } => {
                let wo = WorkOrder::new(*id, production_item.clone(), *qty, operations);
                self.work_orders.insert(*id, Arc::new(RwLock::new(wo)));
            }
            Event::JobCardCreated {
                id,
                work_order_id,
                operation_id,
                operation,
                workstation,
                for_quantity,
            } => {
                self.insert_job_card(JobCard {
                    id: *id,
                    work_order_id: *work_order_id,
                    operation_row: *operation_id,
                    operation_id: *operation_id,
                    operation: operation.clone(),
                    workstation: workstation.clone(),
                    for_quantity: *for_quantity,
                    time_logs: Vec::new(),
                    docstatus: DocStatus::Draft,
                });
            }
            Event::JobCardSaved { id, update } => {
                let Some(card) = self.get_job_card_state(id) else { return };
                let mut card = card.try_write_owned().expect("replay: uncontended write");
                let mut resources = card.resources();
                let mut next = JobCard::clone(&card);
                next.apply_update(update);
                resources.extend(next.resources());
                let mut guards = self.lock_allocations_uncontended(resources);
                apply_saved(&mut card, &mut guards, update);
            }
            Event::JobCardSubmitted { id } => {
                let Some(card) = self.get_job_card_state(id) else { return };
                let mut card = card.try_write_owned().expect("replay: uncontended write");
                card.docstatus = DocStatus::Submitted;
                if let Some(wo) = self.get_work_order_state(&card.work_order_id) {
                    let mut wo = wo.try_write_owned().expect("replay: uncontended write");
                    wo.record_completion(&card);
                }
            }
            Event::JobCardCancelled { id } => {
                let Some(card) = self.get_job_card_state(id) else { return };
                let mut card = card.try_write_owned().expect("replay: uncontended write");
                let mut guards = self.lock_allocations_uncontended(card.resources());
                release(card.id, &mut guards);
                card.docstatus = DocStatus::Cancelled;
                if let Some(wo) = self.get_work_order_state(&card.work_order_id) {
                    let mut wo = wo.try_write_owned().expect("replay: uncontended write");
                    wo.clear_completion(card.id);
                }
            }
            Event::JobCardDeleted { id } => {
                let Some(card) = self.get_job_card_state(id) else { return };
                let card = card.try_read_owned().expect("replay: uncontended read");
                let mut guards = self.lock_allocations_uncontended(card.resources());
                release(card.id, &mut guards);
                self.remove_job_card(&card);
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub(super) fn get_job_card_state(&self, id: &Ulid) -> Option<SharedJobCard> {
        self.job_cards.get(id).map(|e| e.value().clone())
    }

    /// Write-lock a job card, failing if it was deleted while we waited.
    pub(super) async fn lock_job_card(&self, id: Ulid) -> Result<OwnedRwLockWriteGuard<JobCard>, EngineError> {
        let card = self.get_job_card_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = card.write_owned().await;
        if !self.job_cards.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    pub(super) fn get_work_order_state(&self, id: &Ulid) -> Option<SharedWorkOrder> {
        self.work_orders.get(id).map(|e| e.value().clone())
    }

    /// Allocation for a resource, created empty on first use.
    pub(super) fn allocation(&self, resource: &ResourceId) -> SharedAllocation {
        self.allocations
            .entry(resource.clone())
            .or_insert_with(|| Arc::new(RwLock::new(ResourceAllocation::new(resource.clone()))))
            .value()
            .clone()
    }

    /// Write-lock allocations in sorted resource order to prevent deadlocks.
    pub(super) async fn lock_allocations(&self, mut resources: Vec<ResourceId>) -> Vec<AllocationGuard> {
        resources.sort();
        resources.dedup();
        let mut guards = Vec::with_capacity(resources.len());
        for resource in &resources {
            guards.push(self.allocation(resource).write_owned().await);
        }
        guards
    }

    /// Replay only: nothing else holds these locks yet.
    fn lock_allocations_uncontended(&self, mut resources: Vec<ResourceId>) -> Vec<AllocationGuard> {
        resources.sort();
        resources.dedup();
        resources
            .iter()
            .map(|r| {
                self.allocation(r)
                    .try_write_owned()
                    .expect("replay: uncontended write")
            })
            .collect()
    }

    pub(super) fn insert_job_card(&self, card: JobCard) {
        self.by_work_order.entry(card.work_order_id).or_default().push(card.id);
        self.job_cards.insert(card.id, Arc::new(RwLock::new(card)));
    }

    pub(super) fn remove_job_card(&self, card: &JobCard) {
        if let Some(mut ids) = self.by_work_order.get_mut(&card.work_order_id) {
            ids.retain(|id| id != &card.id);
        }
        self.job_cards.remove(&card.id);
    }
}

/// Apply a save to a locked card and re-index its intervals.
/// `guards` must cover the card's old and new resources.
pub(super) fn apply_saved(card: &mut JobCard, guards: &mut [AllocationGuard], update: &JobCardUpdate) {
    card.apply_update(update);
    let intervals = card.intervals();
    for guard in guards.iter_mut() {
        guard.replace_record(card.id, &intervals);
    }
}

/// Drop a card's intervals from every locked allocation.
pub(super) fn release(card_id: Ulid, guards: &mut [AllocationGuard]) {
    for guard in guards.iter_mut() {
        guard.remove_record(card_id);
    }
}
