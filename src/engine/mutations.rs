use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::record_mutation;

use super::conflict::{
    check_no_overlap, check_operation, check_quantity, check_submittable, resolve_intervals,
    validate_name,
};
use super::{apply_saved, release, AllocationGuard, Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_workstation(&self, name: String) -> Result<(), EngineError> {
        validate_name(&name, "empty workstation name")?;
        let _creating = self.creates.lock().await;
        if self.workstations.contains(&name) {
            return Err(EngineError::WorkstationExists(name));
        }
        let event = Event::WorkstationCreated { name: name.clone() };
        self.wal_append(&event).await?;
        self.workstations.insert(name);
        Ok(())
    }

    /// Create a work order and one draft job card per operation row.
    /// Returns the job card ids in row order.
    pub async fn create_work_order(
        &self,
        id: Ulid,
        production_item: String,
        qty: Qty,
        operations: Vec<OperationRow>,
    ) -> Result<Vec<Ulid>, EngineError> {
        let started = Instant::now();
        let result = self.create_work_order_inner(id, production_item, qty, operations).await;
        record_mutation("create_work_order", started, &result);
        result
    }

    async fn create_work_order_inner(
        &self,
        id: Ulid,
        production_item: String,
        qty: Qty,
        operations: Vec<OperationRow>,
    ) -> Result<Vec<Ulid>, EngineError> {
        validate_name(&production_item, "empty production item")?;
        if qty == 0 {
            return Err(EngineError::InvalidQuantity("qty to manufacture must be positive"));
        }
        if qty > MAX_QTY {
            return Err(EngineError::LimitExceeded("qty too large"));
        }
        if operations.len() > MAX_OPERATIONS_PER_WORK_ORDER {
            return Err(EngineError::LimitExceeded("too many operations on work order"));
        }
        let mut seen = HashSet::new();
        for row in &operations {
            validate_name(&row.operation, "empty operation name")?;
            if !seen.insert(row.id) {
                return Err(EngineError::AlreadyExists(row.id));
            }
            if let Some(ref w) = row.workstation
                && !self.workstations.contains(w)
            {
                return Err(EngineError::UnknownWorkstation(w.clone()));
            }
        }
        let _creating = self.creates.lock().await;
        if self.work_orders.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::WorkOrderCreated {
            id,
            production_item: production_item.clone(),
            qty,
            operations: operations.clone(),
        };
        self.wal_append(&event).await?;
        let wo = WorkOrder::new(id, production_item, qty, &operations);
        self.work_orders.insert(id, Arc::new(RwLock::new(wo)));

        let mut card_ids = Vec::with_capacity(operations.len());
        for row in &operations {
            let card_id = Ulid::new();
            self.append_job_card(card_id, id, row, qty).await?;
            card_ids.push(card_id);
        }
        info!("work order {id} created with {} job cards", card_ids.len());
        Ok(card_ids)
    }

    /// Create a draft job card for one operation row of an existing work order.
    pub async fn create_job_card(
        &self,
        id: Ulid,
        work_order_id: Ulid,
        operation_id: Ulid,
    ) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.create_job_card_inner(id, work_order_id, operation_id).await;
        record_mutation("create_job_card", started, &result);
        result
    }

    async fn create_job_card_inner(
        &self,
        id: Ulid,
        work_order_id: Ulid,
        operation_id: Ulid,
    ) -> Result<(), EngineError> {
        let _creating = self.creates.lock().await;
        if self.job_cards.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let wo = self
            .get_work_order_state(&work_order_id)
            .ok_or(EngineError::NotFound(work_order_id))?;
        let wo = wo.read().await;
        let op = wo
            .operation(operation_id)
            .ok_or(EngineError::NotFound(operation_id))?;
        let row = OperationRow {
            id: op.id,
            operation: op.operation.clone(),
            workstation: op.workstation.clone(),
        };
        self.append_job_card(id, work_order_id, &row, wo.qty).await
    }

    async fn append_job_card(
        &self,
        id: Ulid,
        work_order_id: Ulid,
        row: &OperationRow,
        for_quantity: Qty,
    ) -> Result<(), EngineError> {
        let event = Event::JobCardCreated {
            id,
            work_order_id,
            operation_id: row.id,
            operation: row.operation.clone(),
            workstation: row.workstation.clone(),
            for_quantity,
        };
        self.wal_append(&event).await?;
        self.insert_job_card(JobCard {
            id,
            work_order_id,
            operation_row: row.id,
            operation_id: row.id,
            operation: row.operation.clone(),
            workstation: row.workstation.clone(),
            for_quantity,
            time_logs: Vec::new(),
            docstatus: DocStatus::Draft,
        });
        debug!("job card {id} created for operation {}", row.id);
        Ok(())
    }

    /// Validate a card as it would be saved and lock every allocation it
    /// touches. `extra` adds resources to lock (the card's previous rows).
    /// On success the returned guards are held until the caller applies.
    async fn validate_and_lock(
        &self,
        card: &JobCard,
        extra: Vec<ResourceId>,
    ) -> Result<Vec<AllocationGuard>, EngineError> {
        let wo = self
            .get_work_order_state(&card.work_order_id)
            .ok_or(EngineError::NotFound(card.work_order_id))?;
        {
            let wo = wo.read().await;
            check_operation(card, &wo)?;
        }
        if let Some(ref w) = card.workstation
            && !self.workstations.contains(w)
        {
            return Err(EngineError::UnknownWorkstation(w.clone()));
        }
        let intervals = resolve_intervals(card)?;
        check_quantity(card)?;

        let mut resources = extra;
        resources.extend(intervals.iter().map(|i| i.resource_id.clone()));
        let guards = self.lock_allocations(resources).await;
        check_no_overlap(&intervals, &guards)?;
        Ok(guards)
    }

    /// Replace the editable fields of a draft job card.
    ///
    /// Rejected saves leave the stored card and the allocation index unchanged.
    pub async fn save_job_card(&self, id: Ulid, update: JobCardUpdate) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.save_job_card_inner(id, update).await;
        record_mutation("save_job_card", started, &result);
        result
    }

    async fn save_job_card_inner(&self, id: Ulid, update: JobCardUpdate) -> Result<(), EngineError> {
        let mut card = self.lock_job_card(id).await?;
        if card.docstatus != DocStatus::Draft {
            return Err(EngineError::NotDraft(id));
        }

        let mut candidate = JobCard::clone(&card);
        candidate.apply_update(&update);
        let mut guards = self.validate_and_lock(&candidate, card.resources()).await?;

        let event = Event::JobCardSaved {
            id,
            update: update.clone(),
        };
        self.wal_append(&event).await?;
        apply_saved(&mut card, &mut guards, &update);
        debug!("job card {id} saved with {} time logs", card.time_logs.len());
        Ok(())
    }

    /// Finalize a draft job card and roll its completed qty into the
    /// work order operation.
    pub async fn submit_job_card(&self, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.submit_job_card_inner(id).await;
        record_mutation("submit_job_card", started, &result);
        result
    }

    async fn submit_job_card_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let mut card = self.lock_job_card(id).await?;
        if card.docstatus != DocStatus::Draft {
            return Err(EngineError::NotDraft(id));
        }
        check_submittable(&card)?;
        let _guards = self.validate_and_lock(&card, Vec::new()).await?;

        let wo = self
            .get_work_order_state(&card.work_order_id)
            .ok_or(EngineError::NotFound(card.work_order_id))?;
        let mut wo = wo.write().await;

        self.wal_append(&Event::JobCardSubmitted { id }).await?;
        card.docstatus = DocStatus::Submitted;
        wo.record_completion(&card);
        info!(
            "job card {id} submitted: {} completed on operation {}",
            card.total_completed_qty(),
            card.operation_id
        );
        Ok(())
    }

    /// Cancel a submitted job card: free its time slots and take its qty
    /// back out of the work order operation.
    pub async fn cancel_job_card(&self, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.cancel_job_card_inner(id).await;
        record_mutation("cancel_job_card", started, &result);
        result
    }

    async fn cancel_job_card_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let mut card = self.lock_job_card(id).await?;
        if card.docstatus != DocStatus::Submitted {
            return Err(EngineError::NotSubmitted(id));
        }
        let mut guards = self.lock_allocations(card.resources()).await;
        let wo = self
            .get_work_order_state(&card.work_order_id)
            .ok_or(EngineError::NotFound(card.work_order_id))?;
        let mut wo = wo.write().await;

        self.wal_append(&Event::JobCardCancelled { id }).await?;
        release(id, &mut guards);
        card.docstatus = DocStatus::Cancelled;
        wo.clear_completion(id);
        info!("job card {id} cancelled");
        Ok(())
    }

    /// Delete a draft or cancelled job card.
    pub async fn delete_job_card(&self, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.delete_job_card_inner(id).await;
        record_mutation("delete_job_card", started, &result);
        result
    }

    async fn delete_job_card_inner(&self, id: Ulid) -> Result<(), EngineError> {
        let card = self.lock_job_card(id).await?;
        if card.docstatus == DocStatus::Submitted {
            return Err(EngineError::NotDeletable(id));
        }
        let mut guards = self.lock_allocations(card.resources()).await;

        self.wal_append(&Event::JobCardDeleted { id }).await?;
        release(id, &mut guards);
        self.remove_job_card(&card);
        debug!("job card {id} deleted");
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut workstations: Vec<String> = self.workstations.iter().map(|w| w.key().clone()).collect();
        workstations.sort();
        events.extend(workstations.into_iter().map(|name| Event::WorkstationCreated { name }));

        let mut wo_ids: Vec<Ulid> = self.work_orders.iter().map(|e| *e.key()).collect();
        wo_ids.sort();
        for wo_id in wo_ids {
            let Some(wo) = self.get_work_order_state(&wo_id) else { continue };
            let wo = wo.read().await;
            events.push(Event::WorkOrderCreated {
                id: wo.id,
                production_item: wo.production_item.clone(),
                qty: wo.qty,
                operations: wo
                    .operations
                    .iter()
                    .map(|op| OperationRow {
                        id: op.id,
                        operation: op.operation.clone(),
                        workstation: op.workstation.clone(),
                    })
                    .collect(),
            });
        }

        let mut card_ids: Vec<Ulid> = self.job_cards.iter().map(|e| *e.key()).collect();
        card_ids.sort();
        for card_id in card_ids {
            let Some(card) = self.get_job_card_state(&card_id) else { continue };
            let card = card.read().await;
            events.extend(card_events(&card));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!("WAL compacted to {count} events");
        Ok(())
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

/// Minimal events that recreate one job card.
fn card_events(card: &JobCard) -> Vec<Event> {
    let mut events = vec![Event::JobCardCreated {
        id: card.id,
        work_order_id: card.work_order_id,
        operation_id: card.operation_row,
        operation: card.operation.clone(),
        workstation: card.workstation.clone(),
        for_quantity: card.for_quantity,
    }];
    if !card.time_logs.is_empty() {
        events.push(Event::JobCardSaved {
            id: card.id,
            update: JobCardUpdate::from(card),
        });
    }
    match card.docstatus {
        DocStatus::Draft => {}
        DocStatus::Submitted => events.push(Event::JobCardSubmitted { id: card.id }),
        DocStatus::Cancelled => {
            events.push(Event::JobCardSubmitted { id: card.id });
            events.push(Event::JobCardCancelled { id: card.id });
        }
    }
    events
}
