//! Inputs and outputs of the optimization core.

use crate::error::{PortfolioError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// One arbitrage position under consideration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetInput {
    #[serde(default)]
    pub identifier: Option<String>,
    /// Annualized fractional return (0.12 = 12%)
    pub expected_return: f64,
    /// Return variance, must be >= 0
    pub risk_estimate: f64,
    #[serde(default)]
    pub sector: Option<String>,
}

impl AssetInput {
    pub fn new(identifier: impl Into<String>, expected_return: f64, risk_estimate: f64) -> Self {
        Self {
            identifier: Some(identifier.into()),
            expected_return,
            risk_estimate,
            sector: None,
        }
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn volatility(&self) -> f64 {
        self.risk_estimate.max(0.0).sqrt()
    }
}

/// Portfolio constraint. Repeated weight constraints combine according to `BoundsPolicy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Constraint {
    MaxWeight(f64),
    MinWeight(f64),
    MaxSectorExposure(f64),
    MaxPortfolioRisk(f64),
    /// Widens the fully invested budget `sum(w) = 1` to the band between 1 and the limit.
    /// Above 1 it caps gross exposure at the limit. Below 1 it is not a cap: it only lets the
    /// book hold as little as the limit, and `sum(w) = 1` stays allowed.
    LeverageLimit(f64),
}

impl Constraint {
    pub fn value(&self) -> f64 {
        match *self {
            Constraint::MaxWeight(v)
            | Constraint::MinWeight(v)
            | Constraint::MaxSectorExposure(v)
            | Constraint::MaxPortfolioRisk(v)
            | Constraint::LeverageLimit(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationObjective {
    #[default]
    SharpeRatio,
    ReturnMaximization,
    RiskMinimization,
    UtilityMaximization,
    RiskParity,
    /// Classic Markowitz quadratic utility, solved as `UtilityMaximization`
    MeanVariance,
}

impl OptimizationObjective {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationObjective::SharpeRatio => "sharpe_ratio",
            OptimizationObjective::ReturnMaximization => "return_maximization",
            OptimizationObjective::RiskMinimization => "risk_minimization",
            OptimizationObjective::UtilityMaximization => "utility_maximization",
            OptimizationObjective::RiskParity => "risk_parity",
            OptimizationObjective::MeanVariance => "mean_variance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OptimizationStatus {
    Success,
    FallbackEqualWeight,
    Failed,
}

/// Outcome of one optimization call. Callers must check `status` and
/// `constraints_satisfied`; neither a fallback nor a violation is reported as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub weights: Vec<f64>,
    pub expected_return: f64,
    /// Portfolio standard deviation
    pub risk: f64,
    pub sharpe_ratio: f64,
    pub status: OptimizationStatus,
    pub constraints_satisfied: bool,
    pub violations: Vec<String>,
    pub method: String,
    pub iterations: usize,
    pub message: Option<String>,
    /// True when no correlation matrix was supplied and positions were treated as uncorrelated
    pub assumed_uncorrelated: bool,
    pub available_capital: f64,
}

impl OptimizationResult {
    /// Currency allocation per asset (weight x available capital)
    pub fn allocations(&self) -> Vec<f64> {
        self.weights
            .iter()
            .map(|w| w * self.available_capital)
            .collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.status != OptimizationStatus::Success || !self.constraints_satisfied
    }
}

/// Everything `PortfolioOptimizer::optimize` needs for one call.
///
/// Index `i` of every vector (and row/column `i` of the correlation matrix) refers to the
/// same asset.
#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub expected_returns: Vec<f64>,
    pub risk_estimates: Vec<f64>,
    /// Defaults to the identity matrix (uncorrelated positions) when absent. This
    /// understates co-movement such as several deals breaking together.
    pub correlation_matrix: Option<Array2<f64>>,
    pub constraints: Vec<Constraint>,
    pub objective: OptimizationObjective,
    pub available_capital: f64,
    pub risk_aversion: Option<f64>,
    pub sectors: Option<Vec<Option<String>>>,
}

impl OptimizationRequest {
    pub fn new(expected_returns: Vec<f64>, risk_estimates: Vec<f64>) -> Self {
        Self {
            expected_returns,
            risk_estimates,
            correlation_matrix: None,
            constraints: Vec::new(),
            objective: OptimizationObjective::default(),
            available_capital: 1.0,
            risk_aversion: None,
            sectors: None,
        }
    }

    /// Build a request from asset records, carrying their sector labels along
    pub fn from_assets(assets: &[AssetInput]) -> Self {
        let mut request = Self::new(
            assets.iter().map(|a| a.expected_return).collect(),
            assets.iter().map(|a| a.risk_estimate).collect(),
        );
        if assets.iter().any(|a| a.sector.is_some()) {
            request.sectors = Some(assets.iter().map(|a| a.sector.clone()).collect());
        }
        request
    }

    pub fn with_correlation(mut self, correlation: Array2<f64>) -> Self {
        self.correlation_matrix = Some(correlation);
        self
    }

    pub fn with_constraints(mut self, constraints: Vec<Constraint>) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_objective(mut self, objective: OptimizationObjective) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_capital(mut self, available_capital: f64) -> Self {
        self.available_capital = available_capital;
        self
    }

    pub fn with_risk_aversion(mut self, risk_aversion: f64) -> Self {
        self.risk_aversion = Some(risk_aversion);
        self
    }

    pub fn with_sectors(mut self, sectors: Vec<Option<String>>) -> Self {
        self.sectors = Some(sectors);
        self
    }

    pub fn num_assets(&self) -> usize {
        self.expected_returns.len()
    }
}

/// Convert nested rows (as found in JSON payloads) into a matrix
pub fn matrix_from_rows(rows: &[Vec<f64>]) -> Result<Array2<f64>> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, |r| r.len());
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(PortfolioError::invalid("matrix rows have different lengths"));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| PortfolioError::invalid(format!("cannot build matrix: {e}")))
}
