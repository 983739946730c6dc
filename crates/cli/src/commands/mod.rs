pub mod chat;
pub mod gateway;
pub mod onboard;
pub mod seed;

use tides_config::AppConfig;

/// Load the config, turning failures into a readable message.
pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}
