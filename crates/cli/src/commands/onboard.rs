//! `tides onboard`: first-time setup.

use tides_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("🌊 Tides: First-Time Setup");
    println!("==========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Set OPENAI_API_KEY (and ELEVENLABS_API_KEY for voice)");
        println!("   2. Run: tides seed-package --unit 101 --courier FedEx");
        println!("   3. Run: tides chat --unit 101 -m \"Do I have any packages?\"\n");
    }

    println!("🎉 Setup complete! Run `tides gateway` to serve the voice front-end.\n");

    Ok(())
}
