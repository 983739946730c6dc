//! `tides seed-package`: log a delivery so the concierge can report it.

pub async fn run(unit: &str, courier: &str) -> Result<(), Box<dyn std::error::Error>> {
    let unit = unit.trim();
    let courier = courier.trim();
    if unit.is_empty() || courier.is_empty() {
        return Err("Both --unit and --courier must be non-empty".into());
    }

    let config = super::load_config()?;
    let store = tides_store::build_from_config(&config.storage).await?;
    let id = store.add_package(unit, courier).await?;

    println!("📦 Logged package #{id} for unit {unit} from {courier}");
    if config.storage.backend == "memory" {
        eprintln!("  Note: the memory backend does not persist between runs.");
    }

    Ok(())
}
