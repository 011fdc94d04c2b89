use ulid::Ulid;

use crate::model::*;

use super::Engine;

impl Engine {
    pub async fn get_job_card(&self, id: Ulid) -> Option<JobCard> {
        let card = self.get_job_card_state(&id)?;
        let guard = card.read().await;
        Some(JobCard::clone(&guard))
    }

    /// Job cards of one work order, in creation order.
    pub async fn job_cards_for_work_order(&self, work_order_id: Ulid) -> Vec<JobCard> {
        let ids: Vec<Ulid> = self
            .by_work_order
            .get(&work_order_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut cards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(card) = self.get_job_card(id).await {
                cards.push(card);
            }
        }
        cards
    }

    pub async fn list_job_cards(&self) -> Vec<JobCard> {
        let mut ids: Vec<Ulid> = self.job_cards.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut cards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(card) = self.get_job_card(id).await {
                cards.push(card);
            }
        }
        cards
    }

    pub async fn get_work_order(&self, id: Ulid) -> Option<WorkOrder> {
        let wo = self.get_work_order_state(&id)?;
        let guard = wo.read().await;
        Some(WorkOrder::clone(&guard))
    }

    pub async fn list_work_orders(&self) -> Vec<WorkOrder> {
        let mut ids: Vec<Ulid> = self.work_orders.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut orders = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(wo) = self.get_work_order(id).await {
                orders.push(wo);
            }
        }
        orders
    }

    /// Aggregated state of one operation row.
    pub async fn get_operation(&self, work_order_id: Ulid, operation_id: Ulid) -> Option<WorkOrderOperation> {
        let wo = self.get_work_order_state(&work_order_id)?;
        let guard = wo.read().await;
        guard.operation(operation_id).cloned()
    }

    pub fn list_workstations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workstations.iter().map(|w| w.key().clone()).collect();
        names.sort();
        names
    }

    /// Every persisted interval booked on a resource, sorted by start.
    pub async fn allocations_for(&self, resource: &ResourceId) -> Vec<TimeInterval> {
        let alloc = match self.allocations.get(resource) {
            Some(e) => e.value().clone(),
            None => return vec![],
        };
        let guard = alloc.read().await;
        guard.intervals.clone()
    }
}
