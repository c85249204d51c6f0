//! Orchestration around the optimization core: deal analysis, persistence and reporting.

pub mod arbitrage;
pub mod optimization;
pub mod repository;
pub mod risk_management;

pub use arbitrage::{ArbitrageAnalysisService, DealAnalysis};
pub use optimization::{PortfolioOptimizationService, to_allocation};
pub use repository::{
    DealPosition, JsonFileRepository, PortfolioAllocation, PositionAllocation, PositionBook,
    PositionRepository,
};
pub use risk_management::{RiskManagementService, RiskReport};
