//! Package lookup tool: tells a resident what is waiting at the front desk.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tides_core::error::ToolError;
use tides_core::store::ConciergeStore;
use tides_core::tool::{Tool, ToolResult, parse_arguments, require_non_empty};
use tracing::{debug, error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckPackagesArgs {
    unit_number: String,
}

/// Read-only lookup of pending deliveries for a unit.
pub struct CheckPackagesTool {
    store: Arc<dyn ConciergeStore>,
}

impl CheckPackagesTool {
    pub fn new(store: Arc<dyn ConciergeStore>) -> Self {
        Self { store }
    }
}

/// "Found 2 packages from FedEx and UPS."
fn summarize(couriers: &[String]) -> String {
    let noun = if couriers.len() == 1 { "package" } else { "packages" };
    format!("Found {} {noun} from {}.", couriers.len(), couriers.join(" and "))
}

#[async_trait]
impl Tool for CheckPackagesTool {
    fn name(&self) -> &str {
        "check_packages"
    }

    fn description(&self) -> &str {
        "Check if a specific unit has pending packages."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "unitNumber": {
                    "type": "string",
                    "description": "The resident's unit number, e.g. '101'"
                }
            },
            "required": ["unitNumber"]
        })
    }

    fn validate(&self, arguments: &serde_json::Value) -> Result<(), ToolError> {
        let args: CheckPackagesArgs = parse_arguments(self.name(), arguments)?;
        require_non_empty(self.name(), "unitNumber", &args.unit_number)
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let args: CheckPackagesArgs = parse_arguments(self.name(), &arguments)?;
        debug!(unit = %args.unit_number, "Checking packages");

        match self.store.query_pending_items(&args.unit_number).await {
            Ok(items) if items.is_empty() => Ok(ToolResult::ok("No pending packages found.")),
            Ok(items) => {
                let couriers: Vec<String> = items.into_iter().map(|i| i.courier).collect();
                debug!(unit = %args.unit_number, count = couriers.len(), "Found packages");
                Ok(ToolResult::ok(summarize(&couriers)))
            }
            Err(e) => {
                error!(unit = %args.unit_number, error = %e, "Package lookup failed");
                Ok(ToolResult::failed("System Error: Database unreachable."))
            }
        }
    }
}
