//! Store trait: the narrow read/write surface the concierge needs from
//! persistent storage.
//!
//! Three kinds of records live behind it:
//! - recorded exchanges, keyed by session (conversation history)
//! - delivered items waiting at the front desk (packages)
//! - amenity reservations

use crate::error::StoreError;
use crate::message::{Message, SessionId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One persisted user/assistant exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: i64,

    pub session_id: SessionId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<String>,

    /// Every message of the exchange, in conversation order
    pub messages: Vec<Message>,

    pub created_at: DateTime<Utc>,
}

/// An exchange about to be recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExchange {
    pub session_id: SessionId,

    /// Which unit the conversation concerns, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_number: Option<String>,

    /// Every message of the exchange, in conversation order
    pub messages: Vec<Message>,

    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a delivered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    PickedUp,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::PickedUp => "picked_up",
        }
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "picked_up" => Ok(ItemStatus::PickedUp),
            other => Err(StoreError::Corrupt(format!("unknown item status '{other}'"))),
        }
    }
}

/// A package held at the front desk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingItem {
    pub id: i64,
    pub unit_number: String,
    /// Who delivered it (e.g., "FedEx")
    pub courier: String,
    pub status: ItemStatus,
    pub created_at: DateTime<Utc>,
}

/// Bookable building amenities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amenity {
    Gym,
    Pool,
    PartyRoom,
    RooftopTerrace,
    GuestSuite,
}

impl Amenity {
    pub const ALL: [Amenity; 5] = [
        Amenity::Gym,
        Amenity::Pool,
        Amenity::PartyRoom,
        Amenity::RooftopTerrace,
        Amenity::GuestSuite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Amenity::Gym => "gym",
            Amenity::Pool => "pool",
            Amenity::PartyRoom => "party_room",
            Amenity::RooftopTerrace => "rooftop_terrace",
            Amenity::GuestSuite => "guest_suite",
        }
    }

    /// Human-readable name used in tool results.
    pub fn display_name(&self) -> &'static str {
        match self {
            Amenity::Gym => "gym",
            Amenity::Pool => "pool",
            Amenity::PartyRoom => "party room",
            Amenity::RooftopTerrace => "rooftop terrace",
            Amenity::GuestSuite => "guest suite",
        }
    }
}

impl std::str::FromStr for Amenity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amenity::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown amenity '{s}'")))
    }
}

/// A new amenity booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReservation {
    pub unit_number: String,
    pub amenity: Amenity,
    /// Caller-described time, already resolved by the model
    pub time: String,
    pub created_at: DateTime<Utc>,
}

/// The storage collaborator.
///
/// Implementations: SQLite, in-memory (for testing and ephemeral runs).
/// Every operation is individually atomic; no cross-operation transactions.
#[async_trait]
pub trait ConciergeStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "memory").
    fn name(&self) -> &str;

    /// The most recent `limit` exchanges for a session, oldest first.
    async fn fetch_recent_exchanges(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> std::result::Result<Vec<Exchange>, StoreError>;

    /// Append an exchange. Pure insert.
    async fn append_exchange(&self, exchange: NewExchange) -> std::result::Result<(), StoreError>;

    /// Items for a unit that are still waiting to be collected.
    async fn query_pending_items(&self, unit_number: &str) -> std::result::Result<Vec<PendingItem>, StoreError>;

    /// Move every pending item of a unit to `status`. Returns how many changed.
    async fn update_items_status(
        &self,
        unit_number: &str,
        status: ItemStatus,
    ) -> std::result::Result<u64, StoreError>;

    /// Insert a reservation. No conflict detection.
    async fn insert_reservation(&self, reservation: NewReservation) -> std::result::Result<(), StoreError>;

    /// Log a delivery at the front desk. Returns the new item's id.
    async fn add_package(&self, unit_number: &str, courier: &str) -> std::result::Result<i64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amenity_parses_wire_names() {
        assert_eq!("party_room".parse::<Amenity>().unwrap(), Amenity::PartyRoom);
        assert!("spa".parse::<Amenity>().is_err());
        let json = serde_json::to_string(&Amenity::RooftopTerrace).unwrap();
        assert_eq!(json, "\"rooftop_terrace\"");
    }

    #[test]
    fn item_status_round_trips_through_str() {
        for status in [ItemStatus::Pending, ItemStatus::PickedUp] {
            assert_eq!(status.as_str().parse::<ItemStatus>().unwrap(), status);
        }
        assert!("lost".parse::<ItemStatus>().is_err());
    }

    #[test]
    fn exchange_serialization_omits_missing_unit() {
        let exchange = NewExchange {
            session_id: SessionId("s-1".into()),
            unit_number: None,
            messages: vec![Message::user("Hi")],
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&exchange).unwrap();
        assert!(!json.contains("unit_number"));
        assert!(json.contains("\"session_id\":\"s-1\""));
    }
}
