use super::arbitrage::ArbitrageAnalysisService;
use super::repository::{PortfolioAllocation, PositionBook};
use crate::config::RiskConfig;
use crate::optimizer::build_covariance;
use crate::risk_model::{Concentration, RiskDecomposition, RiskMetrics, RiskModel, StressTestResult};
use crate::types::{OptimizationObjective, OptimizationStatus};
use anyhow::{Result, ensure};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Concentration above which a report carries a warning
const HHI_WARNING: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub decomposition: RiskDecomposition,
    pub concentration: Concentration,
    pub stress_results: Vec<StressTestResult>,
    pub metrics: Option<RiskMetrics>,
    pub warnings: Vec<String>,
}

/// Risk view of a weighted position book
pub struct RiskManagementService {
    risk_model: RiskModel,
    analysis: ArbitrageAnalysisService,
}

impl RiskManagementService {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            risk_model: RiskModel::new(config),
            analysis: ArbitrageAnalysisService::new(),
        }
    }

    /// Report on an optimizer allocation. A `FAILED` allocation holds no positions, so it
    /// gets no report.
    pub fn assess_allocation(
        &self,
        book: &PositionBook,
        allocation: &PortfolioAllocation,
    ) -> Result<Option<RiskReport>> {
        if allocation.status == OptimizationStatus::Failed {
            warn!("Optimization failed; skipping risk report for an empty allocation");
            return Ok(None);
        }
        let weights: Vec<f64> = allocation.allocations.iter().map(|a| a.weight).collect();
        self.assess(book, &weights).map(Some)
    }

    pub fn assess(&self, book: &PositionBook, weights: &[f64]) -> Result<RiskReport> {
        ensure!(
            weights.len() == book.positions.len(),
            "{} weights for {} positions",
            weights.len(),
            book.positions.len()
        );

        let request =
            self.analysis
                .build_request(book, OptimizationObjective::default(), vec![])?;
        let (covariance, assumed_uncorrelated) =
            build_covariance(&request.risk_estimates, request.correlation_matrix.as_ref())?;

        let decomposition = self
            .risk_model
            .calculate_risk_decomposition(weights, &covariance)?;
        let concentration = self.risk_model.portfolio_concentration(weights)?;
        let stress_results = self.risk_model.stress_test_portfolio(
            weights,
            &request.expected_returns,
            &covariance,
            &RiskModel::predefined_scenarios(weights.len()),
        )?;

        let metrics = match &book.return_history {
            Some(history) if !history.is_empty() => Some(self.risk_model.calculate_risk_metrics(
                history,
                None,
                &self.risk_model.config().confidence_levels,
            )?),
            _ => None,
        };

        let mut warnings = Vec::new();
        if assumed_uncorrelated {
            warnings.push(
                "no correlation data: decomposition and stress results ignore co-movement"
                    .to_string(),
            );
        }
        if concentration.hhi > HHI_WARNING {
            warnings.push(format!(
                "book is concentrated: HHI {:.3}, {:.1} effective positions",
                concentration.hhi, concentration.effective_positions
            ));
        }
        for warning in &warnings {
            warn!("{}", warning);
        }

        info!(
            "Risk report: portfolio risk {:.4}, HHI {:.3}, {} stress scenarios",
            decomposition.portfolio_risk,
            concentration.hhi,
            stress_results.len()
        );

        Ok(RiskReport {
            decomposition,
            concentration,
            stress_results,
            metrics,
            warnings,
        })
    }
}
