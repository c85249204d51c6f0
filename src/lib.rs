//! Portfolio construction and risk analysis for merger-arbitrage books.

pub mod config;
pub mod error;
pub mod optimizer;
pub mod performance;
pub mod risk_model;
pub mod services;
pub mod stats;
pub mod types;
pub mod validation;

pub use config::{AppConfig, BoundsPolicy, OptimizerConfig, PerformanceConfig, RiskConfig};
pub use error::{PortfolioError, Result, SolverError};
pub use optimizer::{EfficientFrontier, PortfolioOptimizer};
pub use performance::{PerformanceAnalyzer, PerformanceMetrics};
pub use risk_model::{CorrelationMethod, RiskModel, StressScenario, VarMethod};
pub use types::{
    AssetInput, Constraint, OptimizationObjective, OptimizationRequest, OptimizationResult,
    OptimizationStatus,
};
