use crate::types::{OptimizationObjective, OptimizationStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// An open merger-arbitrage position: long the target at `current_price`, expecting the
/// `offer_price` on completion or a fall to `break_price` if the deal fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealPosition {
    pub id: String,
    pub target: String,
    #[serde(default)]
    pub acquirer: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    pub current_price: f64,
    pub offer_price: f64,
    pub break_price: f64,
    /// Probability the deal closes, in [0, 1]
    pub completion_probability: f64,
    pub days_to_close: u32,
}

/// Everything stored about the book being optimized
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionBook {
    #[serde(default = "default_available_capital")]
    pub available_capital: f64,
    pub positions: Vec<DealPosition>,
    /// Rows and columns ordered like `positions`
    #[serde(default)]
    pub correlation_matrix: Option<Vec<Vec<f64>>>,
    /// Periodic returns of the book, used for historical risk metrics
    #[serde(default)]
    pub return_history: Option<Vec<f64>>,
}

fn default_available_capital() -> f64 {
    1_000_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionAllocation {
    pub deal_id: String,
    pub weight: f64,
    pub amount: f64,
}

/// A persisted optimization outcome, weights mapped back to deals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioAllocation {
    pub created_at: DateTime<Utc>,
    pub objective: OptimizationObjective,
    pub status: OptimizationStatus,
    pub constraints_satisfied: bool,
    pub expected_return: f64,
    pub risk: f64,
    pub sharpe_ratio: f64,
    pub total_capital: f64,
    pub allocations: Vec<PositionAllocation>,
    pub warnings: Vec<String>,
}

/// Storage seam for the service layer
#[cfg_attr(test, mockall::automock)]
pub trait PositionRepository: Send + Sync {
    fn load_book(&self) -> Result<PositionBook>;
    fn save_allocation(&self, allocation: &PortfolioAllocation) -> Result<()>;
}

/// Reads the book from a JSON file and optionally writes allocations as pretty JSON
#[derive(Debug, Clone)]
pub struct JsonFileRepository {
    positions_path: PathBuf,
    output_path: Option<PathBuf>,
}

impl JsonFileRepository {
    pub fn new(positions_path: impl AsRef<Path>) -> Self {
        Self {
            positions_path: positions_path.as_ref().to_path_buf(),
            output_path: None,
        }
    }

    pub fn with_output(mut self, output_path: impl AsRef<Path>) -> Self {
        self.output_path = Some(output_path.as_ref().to_path_buf());
        self
    }
}

impl PositionRepository for JsonFileRepository {
    fn load_book(&self) -> Result<PositionBook> {
        let contents = fs::read_to_string(&self.positions_path).with_context(|| {
            format!("failed to read positions file {}", self.positions_path.display())
        })?;
        let book: PositionBook = serde_json::from_str(&contents).with_context(|| {
            format!("failed to parse positions file {}", self.positions_path.display())
        })?;
        info!(
            "Loaded {} positions from {}",
            book.positions.len(),
            self.positions_path.display()
        );
        Ok(book)
    }

    fn save_allocation(&self, allocation: &PortfolioAllocation) -> Result<()> {
        let Some(path) = &self.output_path else {
            debug!("No output path configured; allocation not written");
            return Ok(());
        };
        let json = serde_json::to_string_pretty(allocation)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write allocation to {}", path.display()))?;
        info!("Saved allocation to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_defaults() {
        let json = r#"{
            "positions": [{
                "id": "D1",
                "target": "TGT",
                "current_price": 48.0,
                "offer_price": 50.0,
                "break_price": 40.0,
                "completion_probability": 0.9,
                "days_to_close": 120
            }]
        }"#;
        let book: PositionBook = serde_json::from_str(json).unwrap();
        assert_eq!(book.available_capital, 1_000_000.0);
        assert!(book.correlation_matrix.is_none());
        assert_eq!(book.positions[0].sector, None);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let repository = JsonFileRepository::new("/nonexistent/positions.json");
        assert!(repository.load_book().is_err());
    }

    #[test]
    fn test_round_trip_through_files() -> Result<()> {
        let dir = std::env::temp_dir();
        let positions_path = dir.join("arbitrage_optimizer_repository_test_positions.json");
        let output_path = dir.join("arbitrage_optimizer_repository_test_allocation.json");

        let book = PositionBook {
            available_capital: 250_000.0,
            positions: vec![],
            correlation_matrix: None,
            return_history: Some(vec![0.01, -0.02]),
        };
        fs::write(&positions_path, serde_json::to_string(&book)?)?;

        let repository = JsonFileRepository::new(&positions_path).with_output(&output_path);
        assert_eq!(repository.load_book()?, book);

        let allocation = PortfolioAllocation {
            created_at: Utc::now(),
            objective: OptimizationObjective::RiskParity,
            status: OptimizationStatus::Success,
            constraints_satisfied: true,
            expected_return: 0.1,
            risk: 0.05,
            sharpe_ratio: 1.6,
            total_capital: 250_000.0,
            allocations: vec![],
            warnings: vec![],
        };
        repository.save_allocation(&allocation)?;
        let saved: PortfolioAllocation = serde_json::from_str(&fs::read_to_string(&output_path)?)?;
        assert_eq!(saved, allocation);

        fs::remove_file(positions_path)?;
        fs::remove_file(output_path)?;
        Ok(())
    }
}
