use arbitrage_optimizer::config::AppConfig;
use arbitrage_optimizer::services::{
    JsonFileRepository, PortfolioOptimizationService, PositionRepository, RiskManagementService,
};

use anyhow::Result;
use log::{info, warn};
use serde_json::json;
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG not set
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }
    env_logger::init();
    info!("Starting merger arbitrage portfolio optimizer");

    let args: Vec<String> = env::args().collect();
    let config_file = args.get(1).map_or("config.json", String::as_str);
    let positions_file = args.get(2).map_or("data/sample_positions.json", String::as_str);

    info!("Loading configuration from: {}", config_file);
    let config = AppConfig::load_from_file(config_file)?;

    let repository = JsonFileRepository::new(positions_file).with_output("allocation.json");
    let risk_service = RiskManagementService::new(config.risk.clone());
    let service = PortfolioOptimizationService::new(repository, config);

    let allocation = service.optimize_with_timeout(None, Vec::new()).await?;
    if !allocation.warnings.is_empty() {
        warn!("Allocation warnings: {}", allocation.warnings.join("; "));
    }

    let book = service.repository().load_book()?;
    let report = risk_service.assess_allocation(&book, &allocation)?;

    let output = json!({
        "allocation": allocation,
        "risk_report": report,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
