//! Amenity booking tool.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tides_core::error::ToolError;
use tides_core::store::{Amenity, ConciergeStore, NewReservation};
use tides_core::tool::{Tool, ToolResult, parse_arguments, require_non_empty};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookAmenityArgs {
    unit_number: String,
    amenity: Amenity,
    time: String,
}

/// Reserves a building amenity. No conflict detection; overlapping
/// bookings are accepted.
pub struct BookAmenityTool {
    store: Arc<dyn ConciergeStore>,
}

impl BookAmenityTool {
    pub fn new(store: Arc<dyn ConciergeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for BookAmenityTool {
    fn name(&self) -> &str {
        "book_amenity"
    }

    fn description(&self) -> &str {
        "Book a building amenity for a unit. Resolve the requested time to an ISO 8601 \
         timestamp or a precise description before calling."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        let amenities: Vec<&str> = Amenity::ALL.iter().map(|a| a.as_str()).collect();
        serde_json::json!({
            "type": "object",
            "properties": {
                "unitNumber": {
                    "type": "string",
                    "description": "The resident's unit number"
                },
                "amenity": {
                    "type": "string",
                    "enum": amenities,
                    "description": "Which amenity to reserve"
                },
                "time": {
                    "type": "string",
                    "description": "When the reservation starts, e.g. '2026-10-20T19:00:00-05:00'"
                }
            },
            "required": ["unitNumber", "amenity", "time"]
        })
    }

    fn validate(&self, arguments: &serde_json::Value) -> Result<(), ToolError> {
        let args: BookAmenityArgs = parse_arguments(self.name(), arguments)?;
        require_non_empty(self.name(), "unitNumber", &args.unit_number)?;
        require_non_empty(self.name(), "time", &args.time)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: BookAmenityArgs = parse_arguments(self.name(), &arguments)?;
        let reservation = NewReservation {
            unit_number: args.unit_number,
            amenity: args.amenity,
            time: args.time,
            created_at: Utc::now(),
        };
        let amenity = reservation.amenity.display_name();
        let time = reservation.time.clone();
        let unit = reservation.unit_number.clone();

        match self.store.insert_reservation(reservation).await {
            Ok(()) => {
                info!(unit = %unit, amenity, time = %time, "Amenity booked");
                Ok(ToolResult::ok(format!("Successfully booked the {amenity} for {time}.")))
            }
            Err(e) => {
                error!(unit = %unit, amenity, error = %e, "Booking failed");
                Ok(ToolResult::failed(format!("Failed to book the {amenity}.")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tides_store::InMemoryStore;

    #[tokio::test]
    async fn books_known_amenity() {
        let store = Arc::new(InMemoryStore::new());
        let tool = BookAmenityTool::new(store.clone());
        let result = tool
            .execute(serde_json::json!({
                "unitNumber": "101",
                "amenity": "party_room",
                "time": "2026-10-24T18:00:00Z"
            }))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Successfully booked the party room for 2026-10-24T18:00:00Z.");

        let reservations = store.reservations().await;
        assert_eq!(reservations.len(), 1);
        assert_eq!(reservations[0].amenity, Amenity::PartyRoom);
    }

    #[test]
    fn amenity_outside_the_set_fails_validation() {
        let tool = BookAmenityTool::new(Arc::new(InMemoryStore::new()));
        let err = tool
            .validate(&serde_json::json!({
                "unitNumber": "101",
                "amenity": "spa",
                "time": "tomorrow 7pm"
            }))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
        assert!(err.to_string().contains("spa"));
    }

    #[test]
    fn empty_time_fails_validation() {
        let tool = BookAmenityTool::new(Arc::new(InMemoryStore::new()));
        assert!(tool
            .validate(&serde_json::json!({"unitNumber": "101", "amenity": "gym", "time": " "}))
            .is_err());
    }

    #[test]
    fn schema_lists_every_amenity() {
        let tool = BookAmenityTool::new(Arc::new(InMemoryStore::new()));
        let schema = tool.parameters_schema();
        let values = schema["properties"]["amenity"]["enum"].as_array().unwrap();
        assert_eq!(values.len(), Amenity::ALL.len());
        assert!(values.contains(&serde_json::json!("guest_suite")));
    }

    #[tokio::test]
    async fn storage_failure_reports_failed_booking() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fail_all(true);
        let result = BookAmenityTool::new(store)
            .execute(serde_json::json!({"unitNumber": "101", "amenity": "pool", "time": "noon"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "Failed to book the pool.");
    }
}
