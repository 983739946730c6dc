//! In-memory store, useful for testing and ephemeral runs.
//!
//! Supports fault injection so failure paths (unreachable database, lost
//! writes) can be exercised without a real outage.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use tides_core::error::StoreError;
use tides_core::message::SessionId;
use tides_core::store::{
    ConciergeStore, Exchange, ItemStatus, NewExchange, NewReservation, PendingItem,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    exchanges: Vec<Exchange>,
    items: Vec<PendingItem>,
    reservations: Vec<NewReservation>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// A store that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    fail_all: AtomicBool,
    fail_exchange_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    /// Make only `append_exchange` fail.
    pub fn set_fail_exchange_writes(&self, fail: bool) {
        self.fail_exchange_writes.store(fail, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }

    /// Every recorded exchange, in insertion order.
    pub async fn exchanges(&self) -> Vec<Exchange> {
        self.state.read().await.exchanges.clone()
    }

    /// Every reservation, in insertion order.
    pub async fn reservations(&self) -> Vec<NewReservation> {
        self.state.read().await.reservations.clone()
    }

    /// Every item for a unit regardless of status.
    pub async fn items_for(&self, unit_number: &str) -> Vec<PendingItem> {
        self.state
            .read()
            .await
            .items
            .iter()
            .filter(|i| i.unit_number == unit_number)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ConciergeStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_recent_exchanges(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<Exchange>, StoreError> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut matching: Vec<Exchange> = state
            .exchanges
            .iter()
            .filter(|e| &e.session_id == session_id)
            .cloned()
            .collect();
        matching.sort_by_key(|e| (e.created_at, e.id));
        let skip = matching.len().saturating_sub(limit);
        Ok(matching.split_off(skip))
    }

    async fn append_exchange(&self, exchange: NewExchange) -> Result<(), StoreError> {
        self.check_available()?;
        if self.fail_exchange_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed("injected write failure".into()));
        }
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.exchanges.push(Exchange {
            id,
            session_id: exchange.session_id,
            unit_number: exchange.unit_number,
            messages: exchange.messages,
            created_at: exchange.created_at,
        });
        Ok(())
    }

    async fn query_pending_items(&self, unit_number: &str) -> Result<Vec<PendingItem>, StoreError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .items
            .iter()
            .filter(|i| i.unit_number == unit_number && i.status == ItemStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_items_status(
        &self,
        unit_number: &str,
        status: ItemStatus,
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let mut changed = 0;
        for item in state
            .items
            .iter_mut()
            .filter(|i| i.unit_number == unit_number && i.status == ItemStatus::Pending)
        {
            item.status = status;
            changed += 1;
        }
        Ok(changed)
    }

    async fn insert_reservation(&self, reservation: NewReservation) -> Result<(), StoreError> {
        self.check_available()?;
        self.state.write().await.reservations.push(reservation);
        Ok(())
    }

    async fn add_package(&self, unit_number: &str, courier: &str) -> Result<i64, StoreError> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let id = state.next_id();
        state.items.push(PendingItem {
            id,
            unit_number: unit_number.to_string(),
            courier: courier.to_string(),
            status: ItemStatus::Pending,
            created_at: Utc::now(),
        });
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tides_core::message::Message;

    fn exchange(session: &str, text: &str, offset_secs: i64) -> NewExchange {
        NewExchange {
            session_id: SessionId(session.into()),
            unit_number: None,
            messages: vec![Message::user(text)],
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[tokio::test]
    async fn recent_exchanges_are_bounded_and_ascending() {
        let store = InMemoryStore::new();
        for i in (0..12).rev() {
            store.append_exchange(exchange("s", &format!("t{i}"), i)).await.unwrap();
        }
        let history = store.fetch_recent_exchanges(&SessionId("s".into()), 10).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history.first().unwrap().messages[0].text(), "t2");
        assert_eq!(history.last().unwrap().messages[0].text(), "t11");
    }

    #[tokio::test]
    async fn pickup_only_touches_pending_items_of_the_unit() {
        let store = InMemoryStore::new();
        store.add_package("101", "FedEx").await.unwrap();
        store.add_package("202", "UPS").await.unwrap();

        assert_eq!(store.update_items_status("101", ItemStatus::PickedUp).await.unwrap(), 1);
        assert_eq!(store.update_items_status("101", ItemStatus::PickedUp).await.unwrap(), 0);
        assert_eq!(store.items_for("101").await[0].status, ItemStatus::PickedUp);
        assert_eq!(store.query_pending_items("202").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fail_all_injects_unavailable() {
        let store = InMemoryStore::new();
        store.set_fail_all(true);
        let err = store.query_pending_items("101").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_fail_all(false);
        assert!(store.query_pending_items("101").await.is_ok());
    }

    #[tokio::test]
    async fn failing_exchange_writes_leave_reads_working() {
        let store = InMemoryStore::new();
        store.set_fail_exchange_writes(true);
        assert!(store.append_exchange(exchange("s", "x", 0)).await.is_err());
        assert!(store.fetch_recent_exchanges(&SessionId("s".into()), 10).await.unwrap().is_empty());
    }
}
