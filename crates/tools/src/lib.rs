//! Concierge tools for Tides.
//!
//! Tools give the model access to the building's records: pending
//! deliveries, pickups, and amenity bookings. Each one converts storage
//! failures into a descriptive result the model can relay to the resident.

pub mod book_amenity;
pub mod check_packages;
pub mod log_pickup;

use std::sync::Arc;
use tides_core::store::ConciergeStore;
use tides_core::tool::ToolRegistry;

pub use book_amenity::BookAmenityTool;
pub use check_packages::CheckPackagesTool;
pub use log_pickup::LogPickupTool;

/// Create the registry of every concierge tool, backed by `store`.
pub fn default_registry(store: Arc<dyn ConciergeStore>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(CheckPackagesTool::new(store.clone())));
    registry.register(Box::new(LogPickupTool::new(store.clone())));
    registry.register(Box::new(BookAmenityTool::new(store)));
    registry
}
