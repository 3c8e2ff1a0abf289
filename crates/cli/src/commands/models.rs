//! `crank models` — list models from the configured provider.

use crank_config::AppConfig;

use crate::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let provider = runtime::build_provider(&config)?;

    let models = provider.list_models().await?;
    if models.is_empty() {
        println!("No models reported by provider '{}'.", config.default_provider);
        return Ok(());
    }
    for model in models {
        println!("{model}");
    }
    Ok(())
}
