//! Pickup logging tool.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tides_core::error::ToolError;
use tides_core::store::{ConciergeStore, ItemStatus};
use tides_core::tool::{Tool, ToolResult, parse_arguments, require_non_empty};
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogPickupArgs {
    unit_number: String,
}

/// Marks every pending package of a unit as picked up.
///
/// Idempotent: a unit with nothing pending succeeds without changes.
pub struct LogPickupTool {
    store: Arc<dyn ConciergeStore>,
}

impl LogPickupTool {
    pub fn new(store: Arc<dyn ConciergeStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for LogPickupTool {
    fn name(&self) -> &str {
        "log_pickup"
    }

    fn description(&self) -> &str {
        "Mark all packages for a unit as picked up."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "unitNumber": {
                    "type": "string",
                    "description": "The resident's unit number"
                }
            },
            "required": ["unitNumber"]
        })
    }

    fn validate(&self, arguments: &serde_json::Value) -> Result<(), ToolError> {
        let args: LogPickupArgs = parse_arguments(self.name(), arguments)?;
        require_non_empty(self.name(), "unitNumber", &args.unit_number)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: LogPickupArgs = parse_arguments(self.name(), &arguments)?;

        match self
            .store
            .update_items_status(&args.unit_number, ItemStatus::PickedUp)
            .await
        {
            Ok(changed) => {
                info!(unit = %args.unit_number, changed, "Pickup logged");
                Ok(ToolResult::ok("Successfully logged pickup."))
            }
            Err(e) => {
                error!(unit = %args.unit_number, error = %e, "Pickup update failed");
                Ok(ToolResult::failed("Failed to update."))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tides_store::InMemoryStore;

    #[tokio::test]
    async fn marks_pending_items_picked_up() {
        let store = Arc::new(InMemoryStore::new());
        store.add_package("101", "FedEx").await.unwrap();
        let tool = LogPickupTool::new(store.clone());

        let result = tool.execute(serde_json::json!({"unitNumber": "101"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Successfully logged pickup.");
        assert!(store.query_pending_items("101").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn nothing_pending_still_succeeds() {
        let tool = LogPickupTool::new(Arc::new(InMemoryStore::new()));
        let result = tool.execute(serde_json::json!({"unitNumber": "101"})).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Successfully logged pickup.");
    }

    #[tokio::test]
    async fn storage_failure_reports_failed_update() {
        let store = Arc::new(InMemoryStore::new());
        store.set_fail_all(true);
        let result = LogPickupTool::new(store)
            .execute(serde_json::json!({"unitNumber": "101"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.output, "Failed to update.");
    }
}
