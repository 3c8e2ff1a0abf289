//! `crank onboard` — write a default config file.

use crank_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    std::fs::create_dir_all(&config_dir)?;
    std::fs::write(&config_path, AppConfig::default_toml())?;

    println!("Wrote default config to {}", config_path.display());
    println!("Set your API key there, or export CRANK_API_KEY.");
    Ok(())
}
