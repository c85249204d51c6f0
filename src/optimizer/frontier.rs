use super::constraints::ConstraintSet;
use super::objectives::{Variance, ZERO_RISK, portfolio_return, portfolio_volatility};
use super::solver::{ConstrainedSolver, ConstraintFunction, ConstraintKind, NonlinearConstraint};
use crate::error::{PortfolioError, Result, SolverError};
use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Minimum-variance portfolios across a sweep of target returns.
///
/// Targets whose sub-problem fails are skipped, so the arrays may be shorter than the
/// number of requested points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EfficientFrontier {
    pub returns: Vec<f64>,
    pub risks: Vec<f64>,
    pub sharpe_ratios: Vec<f64>,
    pub weights: Vec<Vec<f64>>,
}

impl EfficientFrontier {
    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Index of the point with the highest Sharpe ratio
    pub fn max_sharpe_index(&self) -> Option<usize> {
        self.sharpe_ratios
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
    }

    fn push(&mut self, weights: Vec<f64>, expected_return: f64, risk: f64, risk_free_rate: f64) {
        let sharpe = if risk >= ZERO_RISK {
            (expected_return - risk_free_rate) / risk
        } else {
            0.0
        };
        self.returns.push(expected_return);
        self.risks.push(risk);
        self.sharpe_ratios.push(sharpe);
        self.weights.push(weights);
    }
}

/// Evenly spaced targets from the lowest to the highest asset return
pub(crate) fn target_returns(expected_returns: &[f64], num_points: usize) -> Vec<f64> {
    let min = expected_returns.iter().copied().fold(f64::INFINITY, f64::min);
    let max = expected_returns.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    match num_points {
        0 => Vec::new(),
        1 => vec![min],
        _ => (0..num_points)
            .map(|i| min + (max - min) * i as f64 / (num_points - 1) as f64)
            .collect(),
    }
}

pub(crate) struct FrontierProblem<'a> {
    pub expected_returns: &'a [f64],
    pub covariance: &'a Array2<f64>,
    pub constraint_set: &'a ConstraintSet,
    pub risk_free_rate: f64,
    pub constraint_tolerance: f64,
}

impl FrontierProblem<'_> {
    /// Minimize variance s.t. budget, bounds and w.r = target
    pub fn solve_point(&self, solver: &ConstrainedSolver, target: f64) -> Result<Vec<f64>> {
        let feasible = self.constraint_set.feasible_set()?;
        let mut constraints = self.constraint_set.nonlinear_constraints(self.covariance, None);
        constraints.push(NonlinearConstraint {
            label: format!("expected return = {target}"),
            kind: ConstraintKind::Equality,
            function: ConstraintFunction::Linear {
                coefficients: self.expected_returns.to_vec(),
                rhs: target,
            },
        });

        let n = self.expected_returns.len();
        let initial = vec![1.0 / n as f64; n];
        let objective = Variance {
            covariance: self.covariance,
        };
        let outcome = solver.minimize(&objective, &feasible, &constraints, &initial)?;

        let achieved = portfolio_return(&outcome.weights, self.expected_returns);
        if (achieved - target).abs() > self.constraint_tolerance {
            return Err(PortfolioError::Solver(SolverError::Infeasible(format!(
                "target return {target:.6} not reachable (got {achieved:.6})"
            ))));
        }
        Ok(outcome.weights)
    }

    pub fn sweep(&self, solver: &ConstrainedSolver, num_points: usize) -> EfficientFrontier {
        let mut frontier = EfficientFrontier::default();

        for target in target_returns(self.expected_returns, num_points) {
            match self.solve_point(solver, target) {
                Ok(weights) => {
                    let expected_return = portfolio_return(&weights, self.expected_returns);
                    let risk = portfolio_volatility(&weights, self.covariance);
                    frontier.push(weights, expected_return, risk, self.risk_free_rate);
                }
                Err(e) => {
                    debug!("Skipping frontier point at target {:.6}: {}", target, e);
                }
            }
        }

        frontier
    }
}
