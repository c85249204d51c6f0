use crate::types::OptimizationObjective;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub performance: PerformanceConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// How repeated MaxWeight/MinWeight constraints combine into per-asset bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundsPolicy {
    /// Tightest bounds win: lower = max of MinWeights, upper = min of MaxWeights
    #[default]
    Intersect,
    /// Each MaxWeight/MinWeight overwrites all bounds; the last one in list order wins
    LastWins,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_constraint_tolerance")]
    pub constraint_tolerance: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_risk_aversion")]
    pub default_risk_aversion: f64,
    #[serde(default)]
    pub bounds_policy: BoundsPolicy,
    #[serde(default = "default_fallback_to_equal_weight")]
    pub fallback_to_equal_weight: bool,
    #[serde(default = "default_frontier_points")]
    pub frontier_points: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            constraint_tolerance: default_constraint_tolerance(),
            risk_free_rate: default_risk_free_rate(),
            default_risk_aversion: default_risk_aversion(),
            bounds_policy: BoundsPolicy::default(),
            fallback_to_equal_weight: default_fallback_to_equal_weight(),
            frontier_points: default_frontier_points(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Tail probabilities used for VaR / Expected Shortfall (0.05 = 5th percentile)
    #[serde(default = "default_confidence_levels")]
    pub confidence_levels: Vec<f64>,
    #[serde(default = "default_monte_carlo_simulations")]
    pub monte_carlo_simulations: usize,
    /// Fixed seed for reproducible Monte Carlo VaR; entropy-seeded when absent
    #[serde(default)]
    pub monte_carlo_seed: Option<u64>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            confidence_levels: default_confidence_levels(),
            monte_carlo_simulations: default_monte_carlo_simulations(),
            monte_carlo_seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            periods_per_year: default_periods_per_year(),
            risk_free_rate: default_risk_free_rate(),
            rolling_window: default_rolling_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_optimization_timeout_secs")]
    pub optimization_timeout_secs: u64,
    #[serde(default)]
    pub default_objective: OptimizationObjective,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            optimization_timeout_secs: default_optimization_timeout_secs(),
            default_objective: OptimizationObjective::default(),
        }
    }
}

fn default_max_iterations() -> usize {
    1000
}

fn default_tolerance() -> f64 {
    1e-9
}

fn default_constraint_tolerance() -> f64 {
    1e-6
}

fn default_risk_free_rate() -> f64 {
    0.02 // 2% annual
}

fn default_risk_aversion() -> f64 {
    3.0
}

fn default_fallback_to_equal_weight() -> bool {
    true
}

fn default_frontier_points() -> usize {
    20
}

fn default_confidence_levels() -> Vec<f64> {
    vec![0.01, 0.05]
}

fn default_monte_carlo_simulations() -> usize {
    10_000
}

fn default_periods_per_year() -> f64 {
    252.0 // trading days
}

fn default_rolling_window() -> usize {
    252
}

fn default_optimization_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when the file is missing
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse config file {}", path.display()))?,
            Err(e) => {
                warn!(
                    "Config file {} not readable ({}), using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        };

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
