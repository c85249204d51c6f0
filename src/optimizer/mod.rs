//! Constrained portfolio optimization over merger-arbitrage positions.
//!
//! `PortfolioOptimizer` is stateless apart from its configuration and cheap to construct;
//! build one per request or per worker rather than sharing a global instance.

pub mod constraints;
pub mod frontier;
pub mod objectives;
pub mod solver;

pub use constraints::{ConstraintSet, build_covariance};
pub use frontier::EfficientFrontier;
pub use solver::{ConstrainedSolver, FeasibleSet, Objective};

use crate::config::OptimizerConfig;
use crate::error::{PortfolioError, Result, SolverError};
use crate::types::{
    Constraint, OptimizationObjective, OptimizationRequest, OptimizationResult, OptimizationStatus,
};
use crate::validation;
use frontier::FrontierProblem;
use log::{debug, info, warn};
use ndarray::Array2;
use objectives::{
    NegativeReturn, NegativeSharpe, NegativeUtility, RiskParity, Variance, ZERO_RISK,
    portfolio_return, portfolio_volatility, sharpe_is_unbounded,
};
use solver::SolverOutcome;

#[derive(Debug, Clone, Default)]
pub struct PortfolioOptimizer {
    config: OptimizerConfig,
}

/// Validated numerical inputs for one call
struct Problem<'a> {
    request: &'a OptimizationRequest,
    covariance: Array2<f64>,
    constraint_set: ConstraintSet,
    assumed_uncorrelated: bool,
    risk_aversion: f64,
}

impl PortfolioOptimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    fn solver(&self) -> ConstrainedSolver {
        ConstrainedSolver::new(
            self.config.max_iterations,
            self.config.tolerance,
            self.config.constraint_tolerance * 0.01,
        )
    }

    /// Solve for portfolio weights under the requested objective.
    ///
    /// Invalid input is returned as an error before any solving happens. A solver failure
    /// never surfaces as an error: the result falls back to equal weights
    /// (`FALLBACK_EQUAL_WEIGHT`), or to `FAILED` when the fallback is disabled.
    /// Constraint violations in the returned weights only clear `constraints_satisfied`.
    pub fn optimize(&self, request: &OptimizationRequest) -> Result<OptimizationResult> {
        let problem = self.prepare(request)?;
        let n = request.num_assets();
        let objective = request.objective;

        let (weights, status, iterations, message) = match self.solve(&problem) {
            Ok(outcome) => {
                debug!(
                    "{} solved in {} iterations (objective {:.6e}, max violation {:.2e})",
                    objective.name(),
                    outcome.iterations,
                    outcome.objective_value,
                    outcome.max_violation
                );
                (outcome.weights, OptimizationStatus::Success, outcome.iterations, None)
            }
            Err(PortfolioError::Solver(e)) if self.config.fallback_to_equal_weight => {
                warn!(
                    "{} optimization failed ({}); falling back to equal weights",
                    objective.name(),
                    e
                );
                (
                    vec![1.0 / n as f64; n],
                    OptimizationStatus::FallbackEqualWeight,
                    0,
                    Some(e.to_string()),
                )
            }
            Err(PortfolioError::Solver(e)) => {
                warn!("{} optimization failed: {}", objective.name(), e);
                (vec![0.0; n], OptimizationStatus::Failed, 0, Some(e.to_string()))
            }
            Err(other) => return Err(other),
        };

        let result = self.build_result(&problem, weights, status, iterations, message);
        if !result.constraints_satisfied {
            warn!(
                "{} result violates constraints: {}",
                objective.name(),
                result.violations.join("; ")
            );
        }
        info!(
            "{} over {} positions: return {:.4}, risk {:.4}, sharpe {:.3}, status {:?}",
            objective.name(),
            n,
            result.expected_return,
            result.risk,
            result.sharpe_ratio,
            result.status
        );
        Ok(result)
    }

    /// Minimum-variance portfolios for target returns spaced linearly between the lowest and
    /// highest expected return. Points whose sub-problem fails are omitted.
    pub fn efficient_frontier(
        &self,
        expected_returns: &[f64],
        covariance: &Array2<f64>,
        num_points: usize,
        constraints: &[Constraint],
    ) -> Result<EfficientFrontier> {
        validation::require_non_empty(expected_returns, "expected_returns")?;
        validation::require_finite(expected_returns, "expected_returns")?;
        validation::validate_covariance(covariance, expected_returns.len())?;
        let constraint_set =
            ConstraintSet::parse(constraints, expected_returns.len(), self.config.bounds_policy)?;

        let problem = FrontierProblem {
            expected_returns,
            covariance,
            constraint_set: &constraint_set,
            risk_free_rate: self.config.risk_free_rate,
            constraint_tolerance: self.config.constraint_tolerance,
        };
        let frontier = problem.sweep(&self.solver(), num_points);
        debug!(
            "Efficient frontier: {} of {} points solved",
            frontier.len(),
            num_points
        );
        Ok(frontier)
    }

    fn prepare<'a>(&self, request: &'a OptimizationRequest) -> Result<Problem<'a>> {
        let n = request.num_assets();
        validation::require_non_empty(&request.expected_returns, "expected_returns")?;
        validation::require_same_length(
            n,
            request.risk_estimates.len(),
            "expected_returns vs risk_estimates",
        )?;
        validation::require_finite(&request.expected_returns, "expected_returns")?;
        validation::require_finite(&request.risk_estimates, "risk_estimates")?;
        if let Some(i) = request.risk_estimates.iter().position(|r| *r < 0.0) {
            return Err(PortfolioError::invalid(format!(
                "risk_estimates[{i}] is negative"
            )));
        }
        if !(request.available_capital.is_finite() && request.available_capital > 0.0) {
            return Err(PortfolioError::invalid(format!(
                "available_capital must be positive, got {}",
                request.available_capital
            )));
        }
        if let Some(sectors) = &request.sectors {
            validation::require_same_length(n, sectors.len(), "expected_returns vs sectors")?;
        }

        let risk_aversion = request
            .risk_aversion
            .unwrap_or(self.config.default_risk_aversion);
        if !(risk_aversion.is_finite() && risk_aversion >= 0.0) {
            return Err(PortfolioError::invalid(format!(
                "risk_aversion must be a non-negative number, got {risk_aversion}"
            )));
        }

        let (covariance, assumed_uncorrelated) =
            build_covariance(&request.risk_estimates, request.correlation_matrix.as_ref())?;
        let constraint_set =
            ConstraintSet::parse(&request.constraints, n, self.config.bounds_policy)?;

        Ok(Problem {
            request,
            covariance,
            constraint_set,
            assumed_uncorrelated,
            risk_aversion,
        })
    }

    fn solve(&self, problem: &Problem<'_>) -> Result<SolverOutcome> {
        let request = problem.request;
        let covariance = &problem.covariance;
        let returns = request.expected_returns.as_slice();

        let feasible = problem.constraint_set.feasible_set()?;
        let constraints = problem
            .constraint_set
            .nonlinear_constraints(covariance, request.sectors.as_deref());
        let n = request.num_assets();
        let initial = vec![1.0 / n as f64; n];
        let solver = self.solver();

        let outcome = match request.objective {
            OptimizationObjective::SharpeRatio => {
                if sharpe_is_unbounded(returns, covariance, &feasible, self.config.risk_free_rate)
                {
                    return Err(SolverError::Unbounded(
                        "a riskless portfolio beats the risk-free rate".to_string(),
                    )
                    .into());
                }
                solver.minimize(
                    &NegativeSharpe {
                        expected_returns: returns,
                        covariance,
                        risk_free_rate: self.config.risk_free_rate,
                    },
                    &feasible,
                    &constraints,
                    &initial,
                )
            }
            OptimizationObjective::ReturnMaximization => solver.minimize(
                &NegativeReturn {
                    expected_returns: returns,
                },
                &feasible,
                &constraints,
                &initial,
            ),
            OptimizationObjective::RiskMinimization => {
                solver.minimize(&Variance { covariance }, &feasible, &constraints, &initial)
            }
            OptimizationObjective::UtilityMaximization | OptimizationObjective::MeanVariance => {
                solver.minimize(
                    &NegativeUtility {
                        expected_returns: returns,
                        covariance,
                        risk_aversion: problem.risk_aversion,
                    },
                    &feasible,
                    &constraints,
                    &initial,
                )
            }
            OptimizationObjective::RiskParity => {
                solver.minimize(&RiskParity { covariance }, &feasible, &constraints, &initial)
            }
        }?;

        Ok(outcome)
    }

    fn build_result(
        &self,
        problem: &Problem<'_>,
        weights: Vec<f64>,
        status: OptimizationStatus,
        iterations: usize,
        message: Option<String>,
    ) -> OptimizationResult {
        let request = problem.request;
        let expected_return = portfolio_return(&weights, &request.expected_returns);
        let risk = portfolio_volatility(&weights, &problem.covariance);
        let sharpe_ratio = if risk >= ZERO_RISK {
            (expected_return - self.config.risk_free_rate) / risk
        } else {
            0.0
        };

        let mut violations = problem.constraint_set.violations(
            &weights,
            &problem.covariance,
            request.sectors.as_deref(),
            self.config.constraint_tolerance,
        );
        if status == OptimizationStatus::Failed && violations.is_empty() {
            violations.push("optimization failed".to_string());
        }

        OptimizationResult {
            constraints_satisfied: violations.is_empty(),
            violations,
            weights,
            expected_return,
            risk,
            sharpe_ratio,
            status,
            method: request.objective.name().to_string(),
            iterations,
            message,
            assumed_uncorrelated: problem.assumed_uncorrelated,
            available_capital: request.available_capital,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_asset_request(objective: OptimizationObjective) -> OptimizationRequest {
        OptimizationRequest::new(vec![0.10, 0.20], vec![0.04, 0.09]).with_objective(objective)
    }

    #[test]
    fn test_risk_minimization_two_assets() {
        let optimizer = PortfolioOptimizer::default();
        let result = optimizer
            .optimize(&two_asset_request(OptimizationObjective::RiskMinimization))
            .unwrap();

        assert_eq!(result.status, OptimizationStatus::Success);
        assert!(result.constraints_satisfied);
        // Minimum variance for uncorrelated assets: w_i proportional to 1 / variance
        assert!((result.weights[0] - 0.09 / 0.13).abs() < 1e-4);
        assert!((result.weights[1] - 0.04 / 0.13).abs() < 1e-4);
        assert!(result.risk < 0.20);
        assert!(result.assumed_uncorrelated);
    }

    #[test]
    fn test_return_maximization_picks_best_asset() {
        let optimizer = PortfolioOptimizer::default();
        let result = optimizer
            .optimize(&two_asset_request(OptimizationObjective::ReturnMaximization))
            .unwrap();
        assert_eq!(result.status, OptimizationStatus::Success);
        assert!((result.weights[1] - 1.0).abs() < 1e-6);
        assert!((result.expected_return - 0.20).abs() < 1e-6);
    }

    #[test]
    fn test_return_maximization_respects_risk_ceiling() {
        let optimizer = PortfolioOptimizer::default();
        let request = two_asset_request(OptimizationObjective::ReturnMaximization)
            .with_constraints(vec![Constraint::MaxPortfolioRisk(0.22)]);
        let result = optimizer.optimize(&request).unwrap();
        assert_eq!(result.status, OptimizationStatus::Success);
        assert!(result.constraints_satisfied, "{:?}", result.violations);
        assert!(result.risk <= 0.22 + 1e-6);
        assert!(result.weights[1] > 0.5);
    }

    #[test]
    fn test_utility_closed_form() {
        // Interior optimum of w.r - A/2 w'Sw on the budget line for uncorrelated assets
        let optimizer = PortfolioOptimizer::default();
        let request = two_asset_request(OptimizationObjective::MeanVariance).with_risk_aversion(3.0);
        let result = optimizer.optimize(&request).unwrap();

        // d/dw1 of f(1 - w1, w1) = 0  =>  w1 = (0.1 + 3 * 0.04) / (3 * 0.13)
        let expected_w1 = (0.10 + 3.0 * 0.04) / (3.0 * 0.13);
        assert_eq!(result.status, OptimizationStatus::Success);
        assert!((result.weights[1] - expected_w1).abs() < 1e-4);
        assert_eq!(result.method, "mean_variance");
    }

    #[test]
    fn test_risk_parity_equalizes_contributions() {
        let optimizer = PortfolioOptimizer::default();
        let result = optimizer
            .optimize(&two_asset_request(OptimizationObjective::RiskParity))
            .unwrap();
        assert_eq!(result.status, OptimizationStatus::Success);
        // Uncorrelated assets: inverse-volatility weights (0.6, 0.4)
        assert!((result.weights[0] - 0.6).abs() < 1e-2);
        assert!((result.weights[1] - 0.4).abs() < 1e-2);
    }

    #[test]
    fn test_sharpe_ratio_beats_equal_weight() {
        let optimizer = PortfolioOptimizer::default();
        let correlation = array![[1.0, 0.3, 0.1], [0.3, 1.0, 0.2], [0.1, 0.2, 1.0]];
        let request = OptimizationRequest::new(vec![0.08, 0.12, 0.15], vec![0.01, 0.04, 0.09])
            .with_correlation(correlation);
        let result = optimizer.optimize(&request).unwrap();
        assert_eq!(result.status, OptimizationStatus::Success);
        assert!(!result.assumed_uncorrelated);

        let equal = OptimizationRequest {
            constraints: vec![Constraint::MaxWeight(1.0 / 3.0), Constraint::MinWeight(1.0 / 3.0)],
            ..request.clone()
        };
        let baseline = optimizer.optimize(&equal).unwrap();
        assert!(result.sharpe_ratio >= baseline.sharpe_ratio - 1e-9);
    }

    #[test]
    fn test_infeasible_bounds_fall_back_to_equal_weight() {
        let optimizer = PortfolioOptimizer::default();
        let request = two_asset_request(OptimizationObjective::SharpeRatio)
            .with_constraints(vec![Constraint::MaxWeight(0.01)]);
        let result = optimizer.optimize(&request).unwrap();

        assert_eq!(result.status, OptimizationStatus::FallbackEqualWeight);
        assert_eq!(result.weights, vec![0.5, 0.5]);
        assert!(!result.constraints_satisfied);
        assert!(result.message.is_some());
    }

    #[test]
    fn test_disabled_fallback_reports_failed() {
        let optimizer = PortfolioOptimizer::new(OptimizerConfig {
            fallback_to_equal_weight: false,
            ..OptimizerConfig::default()
        });
        let request = two_asset_request(OptimizationObjective::RiskMinimization)
            .with_constraints(vec![Constraint::MaxWeight(0.01)]);
        let result = optimizer.optimize(&request).unwrap();
        assert_eq!(result.status, OptimizationStatus::Failed);
        assert!(!result.constraints_satisfied);
        assert_eq!(result.weights, vec![0.0, 0.0]);
    }

    #[test]
    fn test_zero_risk_sharpe_falls_back() {
        let optimizer = PortfolioOptimizer::default();
        let request = OptimizationRequest::new(vec![0.05, 0.07], vec![0.0, 0.0]);
        let result = optimizer.optimize(&request).unwrap();
        assert_eq!(result.status, OptimizationStatus::FallbackEqualWeight);
        assert_eq!(result.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_single_asset() {
        let optimizer = PortfolioOptimizer::default();
        for objective in [
            OptimizationObjective::SharpeRatio,
            OptimizationObjective::RiskMinimization,
            OptimizationObjective::RiskParity,
        ] {
            let request = OptimizationRequest::new(vec![0.12], vec![0.09]).with_objective(objective);
            let result = optimizer.optimize(&request).unwrap();
            assert_eq!(result.weights, vec![1.0]);
            assert!((result.expected_return - 0.12).abs() < 1e-12);
            assert!((result.risk - 0.3).abs() < 1e-12);
            assert!(result.constraints_satisfied);
        }
    }

    #[test]
    fn test_riskless_asset_sharpe_falls_back() {
        let optimizer = PortfolioOptimizer::default();
        // The first deal is certain to close: zero variance, return above the risk-free rate
        let request = OptimizationRequest::new(vec![0.152, 0.073], vec![0.0, 0.026]);
        let result = optimizer.optimize(&request).unwrap();

        assert_eq!(result.status, OptimizationStatus::FallbackEqualWeight);
        assert!(result.message.as_deref().unwrap_or_default().contains("unbounded"));
        assert!(result.risk > 0.05);
        assert!(result.sharpe_ratio < 10.0);
    }

    #[test]
    fn test_invalid_inputs_are_errors() {
        let optimizer = PortfolioOptimizer::default();

        let mismatched = OptimizationRequest::new(vec![0.1, 0.2], vec![0.04]);
        assert!(matches!(
            optimizer.optimize(&mismatched),
            Err(PortfolioError::InvalidInput(_))
        ));

        let empty = OptimizationRequest::new(vec![], vec![]);
        assert!(optimizer.optimize(&empty).is_err());

        let asymmetric = two_asset_request(OptimizationObjective::SharpeRatio)
            .with_correlation(array![[1.0, 0.2], [0.4, 1.0]]);
        assert!(optimizer.optimize(&asymmetric).is_err());

        let non_square = two_asset_request(OptimizationObjective::SharpeRatio)
            .with_correlation(Array2::ones((2, 3)));
        assert!(optimizer.optimize(&non_square).is_err());

        let no_capital = two_asset_request(OptimizationObjective::SharpeRatio).with_capital(0.0);
        assert!(optimizer.optimize(&no_capital).is_err());
    }

    #[test]
    fn test_leverage_limit_relaxes_budget() {
        let optimizer = PortfolioOptimizer::default();
        let request = two_asset_request(OptimizationObjective::ReturnMaximization)
            .with_constraints(vec![Constraint::LeverageLimit(1.5)]);
        let result = optimizer.optimize(&request).unwrap();
        let total: f64 = result.weights.iter().sum();
        assert!(result.constraints_satisfied);
        assert!((total - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_leverage_below_one_only_lowers_the_floor() {
        let optimizer = PortfolioOptimizer::default();
        let constraints = vec![Constraint::LeverageLimit(0.5)];

        // Shrinking the book lowers variance, down to the 0.5 floor
        let minimum = optimizer
            .optimize(
                &two_asset_request(OptimizationObjective::RiskMinimization)
                    .with_constraints(constraints.clone()),
            )
            .unwrap();
        let total: f64 = minimum.weights.iter().sum();
        assert!(minimum.constraints_satisfied, "{:?}", minimum.violations);
        assert!((total - 0.5).abs() < 1e-6);

        // A fully invested book is still inside the band
        let maximum = optimizer
            .optimize(
                &two_asset_request(OptimizationObjective::ReturnMaximization)
                    .with_constraints(constraints),
            )
            .unwrap();
        let total: f64 = maximum.weights.iter().sum();
        assert!(maximum.constraints_satisfied);
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sector_cap_enforced() {
        let optimizer = PortfolioOptimizer::default();
        let request = OptimizationRequest::new(vec![0.20, 0.18, 0.05], vec![0.04, 0.04, 0.04])
            .with_objective(OptimizationObjective::ReturnMaximization)
            .with_sectors(vec![
                Some("healthcare".to_string()),
                Some("healthcare".to_string()),
                Some("utilities".to_string()),
            ])
            .with_constraints(vec![Constraint::MaxSectorExposure(0.6)]);
        let result = optimizer.optimize(&request).unwrap();
        assert!(result.constraints_satisfied, "{:?}", result.violations);
        assert!(result.weights[0] + result.weights[1] <= 0.6 + 1e-6);
        assert!((result.weights[2] - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_efficient_frontier_is_monotone() {
        let optimizer = PortfolioOptimizer::default();
        let covariance = array![[0.04, 0.0], [0.0, 0.09]];
        let frontier = optimizer
            .efficient_frontier(&[0.10, 0.20], &covariance, 5, &[])
            .unwrap();

        assert!(frontier.len() >= 3);
        let targets = [0.10, 0.125, 0.15, 0.175, 0.20];
        for achieved in &frontier.returns {
            assert!(targets.iter().any(|t| (t - achieved).abs() < 1e-6));
        }
        // Above the minimum-variance return (about 0.131), risk grows with the target
        let upper: Vec<f64> = frontier
            .returns
            .iter()
            .zip(&frontier.risks)
            .filter(|(r, _)| **r > 0.14)
            .map(|(_, risk)| *risk)
            .collect();
        assert!(upper.windows(2).all(|pair| pair[1] > pair[0]));
        assert!(frontier.max_sharpe_index().is_some());
    }

    #[test]
    fn test_efficient_frontier_skips_unreachable_targets() {
        let optimizer = PortfolioOptimizer::default();
        let covariance = array![[0.04, 0.0], [0.0, 0.09]];
        // With a 0.6 cap the extreme targets (all in one asset) are unreachable
        let frontier = optimizer
            .efficient_frontier(&[0.10, 0.20], &covariance, 5, &[Constraint::MaxWeight(0.6)])
            .unwrap();
        assert!(frontier.len() < 5);
        assert!(!frontier.is_empty());
    }
}
