//! `tides gateway`: start the HTTP API server.

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("🌊 Tides Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.default_model);
    println!("   Storage:   {} ({})", config.storage.backend, config.storage.path.display());

    tides_gateway::start(config).await?;

    Ok(())
}
