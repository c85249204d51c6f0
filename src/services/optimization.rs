use super::arbitrage::ArbitrageAnalysisService;
use super::repository::{PortfolioAllocation, PositionAllocation, PositionBook, PositionRepository};
use crate::config::AppConfig;
use crate::optimizer::{EfficientFrontier, PortfolioOptimizer, build_covariance};
use crate::types::{Constraint, OptimizationObjective, OptimizationResult};
use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use log::{info, warn};
use std::time::Duration;

/// Loads the book, optimizes it and persists the resulting allocation.
///
/// A fresh `PortfolioOptimizer` is built for every call from the configuration.
pub struct PortfolioOptimizationService<R: PositionRepository> {
    repository: R,
    config: AppConfig,
    analysis: ArbitrageAnalysisService,
}

impl<R: PositionRepository> PortfolioOptimizationService<R> {
    pub fn new(repository: R, config: AppConfig) -> Self {
        Self {
            repository,
            config,
            analysis: ArbitrageAnalysisService::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    fn optimizer(&self) -> PortfolioOptimizer {
        PortfolioOptimizer::new(self.config.optimizer.clone())
    }

    /// Optimize the stored book, falling back to the configured default objective
    pub fn optimize(
        &self,
        objective: Option<OptimizationObjective>,
        constraints: Vec<Constraint>,
    ) -> Result<PortfolioAllocation> {
        let objective = objective.unwrap_or(self.config.service.default_objective);
        let book = self.repository.load_book()?;
        let request = self.analysis.build_request(&book, objective, constraints)?;

        let result = self
            .optimizer()
            .optimize(&request)
            .context("portfolio optimization rejected its inputs")?;
        self.finish(&book, objective, &result)
    }

    /// Same as `optimize`, with the solve moved off the async runtime and bounded by the
    /// configured wall-clock limit.
    pub async fn optimize_with_timeout(
        &self,
        objective: Option<OptimizationObjective>,
        constraints: Vec<Constraint>,
    ) -> Result<PortfolioAllocation> {
        let objective = objective.unwrap_or(self.config.service.default_objective);
        let book = self.repository.load_book()?;
        let request = self.analysis.build_request(&book, objective, constraints)?;
        let optimizer = self.optimizer();
        let limit = Duration::from_secs(self.config.service.optimization_timeout_secs);

        let task = tokio::task::spawn_blocking(move || optimizer.optimize(&request));
        let result = tokio::time::timeout(limit, task)
            .await
            .map_err(|_| anyhow!("optimization timed out after {}s", limit.as_secs()))?
            .context("optimization task failed")?
            .context("portfolio optimization rejected its inputs")?;

        self.finish(&book, objective, &result)
    }

    /// Efficient frontier of the stored book with the configured number of points
    pub fn efficient_frontier(&self, constraints: &[Constraint]) -> Result<EfficientFrontier> {
        let book = self.repository.load_book()?;
        let request = self
            .analysis
            .build_request(&book, OptimizationObjective::RiskMinimization, vec![])?;
        let (covariance, _) =
            build_covariance(&request.risk_estimates, request.correlation_matrix.as_ref())?;

        let frontier = self.optimizer().efficient_frontier(
            &request.expected_returns,
            &covariance,
            self.config.optimizer.frontier_points,
            constraints,
        )?;
        Ok(frontier)
    }

    fn finish(
        &self,
        book: &PositionBook,
        objective: OptimizationObjective,
        result: &OptimizationResult,
    ) -> Result<PortfolioAllocation> {
        let allocation = to_allocation(book, objective, result);

        if result.is_degraded() {
            warn!(
                "Allocation for {} positions is degraded (status {:?}, constraints satisfied: {})",
                book.positions.len(),
                result.status,
                result.constraints_satisfied
            );
        }

        self.repository.save_allocation(&allocation)?;
        info!(
            "Allocated {:.2} across {} positions ({}): expected return {:.4}, risk {:.4}",
            allocation.total_capital,
            allocation.allocations.len(),
            objective.name(),
            allocation.expected_return,
            allocation.risk
        );
        Ok(allocation)
    }
}

/// Map weights back to deal ids and currency amounts
pub fn to_allocation(
    book: &PositionBook,
    objective: OptimizationObjective,
    result: &OptimizationResult,
) -> PortfolioAllocation {
    let allocations = book
        .positions
        .iter()
        .zip(result.weights.iter().zip(result.allocations()))
        .map(|(position, (weight, amount))| PositionAllocation {
            deal_id: position.id.clone(),
            weight: *weight,
            amount,
        })
        .collect();

    let mut warnings = result.violations.clone();
    if let Some(message) = &result.message {
        warnings.push(message.clone());
    }
    if result.assumed_uncorrelated {
        warnings.push("no correlation data: positions assumed uncorrelated".to_string());
    }

    PortfolioAllocation {
        created_at: Utc::now(),
        objective,
        status: result.status,
        constraints_satisfied: result.constraints_satisfied,
        expected_return: result.expected_return,
        risk: result.risk,
        sharpe_ratio: result.sharpe_ratio,
        total_capital: book.available_capital,
        allocations,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::repository::{DealPosition, MockPositionRepository};
    use crate::types::OptimizationStatus;

    fn book() -> PositionBook {
        let deal = |id: &str, offer: f64, probability: f64| DealPosition {
            id: id.to_string(),
            target: id.to_string(),
            acquirer: None,
            sector: None,
            current_price: 100.0,
            offer_price: offer,
            break_price: 85.0,
            completion_probability: probability,
            days_to_close: 180,
        };
        PositionBook {
            available_capital: 10_000.0,
            positions: vec![deal("A", 104.0, 0.95), deal("B", 110.0, 0.8)],
            correlation_matrix: None,
            return_history: None,
        }
    }

    #[test]
    fn test_optimize_saves_allocation() {
        let mut repository = MockPositionRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));
        repository
            .expect_save_allocation()
            .withf(|allocation: &PortfolioAllocation| allocation.allocations.len() == 2)
            .times(1)
            .returning(|_| Ok(()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let allocation = service
            .optimize(Some(OptimizationObjective::RiskMinimization), vec![])
            .unwrap();

        let total: f64 = allocation.allocations.iter().map(|a| a.amount).sum();
        assert!((total - 10_000.0).abs() < 1e-3);
        assert_eq!(allocation.status, OptimizationStatus::Success);
        assert!(allocation.warnings.iter().any(|w| w.contains("uncorrelated")));
    }

    #[test]
    fn test_storage_failure_propagates() {
        let mut repository = MockPositionRepository::new();
        repository
            .expect_load_book()
            .returning(|| Err(anyhow!("disk unavailable")));
        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        assert!(service.optimize(None, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_optimize_with_timeout() {
        let mut repository = MockPositionRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));
        repository.expect_save_allocation().returning(|_| Ok(()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let allocation = service
            .optimize_with_timeout(Some(OptimizationObjective::RiskParity), vec![])
            .await
            .unwrap();
        assert_eq!(allocation.allocations[0].deal_id, "A");
        assert_eq!(allocation.objective, OptimizationObjective::RiskParity);
    }
}
