//! The scalar objectives behind each `OptimizationObjective`.
//!
//! Every objective is expressed as a minimization; maximization targets are negated.

use super::solver::{FeasibleSet, Objective};
use ndarray::{Array1, Array2, ArrayView1};

/// Portfolio volatility below this is rounding noise and counts as zero risk
pub const ZERO_RISK: f64 = 1e-8;

pub fn portfolio_return(weights: &[f64], expected_returns: &[f64]) -> f64 {
    weights.iter().zip(expected_returns).map(|(w, r)| w * r).sum()
}

pub fn portfolio_variance(weights: &[f64], covariance: &Array2<f64>) -> f64 {
    let w = ArrayView1::from(weights);
    w.dot(&covariance.dot(&w))
}

pub fn portfolio_volatility(weights: &[f64], covariance: &Array2<f64>) -> f64 {
    portfolio_variance(weights, covariance).max(0.0).sqrt()
}

fn sigma_times(weights: &[f64], covariance: &Array2<f64>) -> Array1<f64> {
    covariance.dot(&ArrayView1::from(weights))
}

/// -(w.r - rf) / sqrt(w' cov w); +inf at zero risk so such portfolios are never chosen
pub struct NegativeSharpe<'a> {
    pub expected_returns: &'a [f64],
    pub covariance: &'a Array2<f64>,
    pub risk_free_rate: f64,
}

impl Objective for NegativeSharpe<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        let volatility = portfolio_volatility(weights, self.covariance);
        if volatility < ZERO_RISK {
            return f64::INFINITY;
        }
        -(portfolio_return(weights, self.expected_returns) - self.risk_free_rate) / volatility
    }

    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        let sigma_w = sigma_times(weights, self.covariance);
        let variance = ArrayView1::from(weights).dot(&sigma_w).max(0.0);
        let volatility = variance.sqrt();
        if volatility < ZERO_RISK {
            return vec![f64::NAN; weights.len()];
        }
        let excess = portfolio_return(weights, self.expected_returns) - self.risk_free_rate;
        self.expected_returns
            .iter()
            .zip(sigma_w.iter())
            .map(|(r, sw)| -r / volatility + excess * sw / (variance * volatility))
            .collect()
    }
}

/// Whether some feasible portfolio holds only riskless assets and still earns more than
/// `risk_free_rate`. The Sharpe ratio then grows without bound as risk goes to zero.
///
/// Sector caps and the risk ceiling are not considered; the ceiling never binds at zero risk.
pub fn sharpe_is_unbounded(
    expected_returns: &[f64],
    covariance: &Array2<f64>,
    feasible: &FeasibleSet,
    risk_free_rate: f64,
) -> bool {
    let riskless: Vec<bool> = (0..expected_returns.len())
        .map(|i| covariance[[i, i]].max(0.0).sqrt() < ZERO_RISK)
        .collect();
    let bounds = feasible.bounds();
    if !riskless.contains(&true)
        || bounds
            .iter()
            .zip(&riskless)
            .any(|((lower, _), safe)| !safe && *lower > 0.0)
    {
        return false;
    }

    // Best return over the riskless assets: start at the lower bounds, then fill the
    // highest returns first up to the top of the budget, or just to its floor once returns
    // turn non-positive.
    let mut order: Vec<usize> = (0..expected_returns.len()).filter(|&i| riskless[i]).collect();
    order.sort_by(|&a, &b| expected_returns[b].total_cmp(&expected_returns[a]));
    let (budget_low, budget_high) = feasible.budget();
    let mut total: f64 = order.iter().map(|&i| bounds[i].0).sum();
    let mut best_return: f64 = order.iter().map(|&i| bounds[i].0 * expected_returns[i]).sum();
    for &i in &order {
        let wanted = if expected_returns[i] > 0.0 {
            budget_high - total
        } else {
            budget_low - total
        };
        let added = (bounds[i].1 - bounds[i].0).min(wanted).max(0.0);
        total += added;
        best_return += added * expected_returns[i];
    }

    total >= budget_low - 1e-12 && best_return > risk_free_rate
}

/// -(w.r)
pub struct NegativeReturn<'a> {
    pub expected_returns: &'a [f64],
}

impl Objective for NegativeReturn<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        -portfolio_return(weights, self.expected_returns)
    }

    fn gradient(&self, _weights: &[f64]) -> Vec<f64> {
        self.expected_returns.iter().map(|r| -r).collect()
    }
}

/// w' cov w
pub struct Variance<'a> {
    pub covariance: &'a Array2<f64>,
}

impl Objective for Variance<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        portfolio_variance(weights, self.covariance)
    }

    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        sigma_times(weights, self.covariance)
            .iter()
            .map(|v| 2.0 * v)
            .collect()
    }
}

/// -(w.r - A/2 w' cov w), the Markowitz quadratic utility
pub struct NegativeUtility<'a> {
    pub expected_returns: &'a [f64],
    pub covariance: &'a Array2<f64>,
    pub risk_aversion: f64,
}

impl Objective for NegativeUtility<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        -(portfolio_return(weights, self.expected_returns)
            - 0.5 * self.risk_aversion * portfolio_variance(weights, self.covariance))
    }

    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        sigma_times(weights, self.covariance)
            .iter()
            .zip(self.expected_returns)
            .map(|(sw, r)| -(r - self.risk_aversion * sw))
            .collect()
    }
}

/// Sum of squared deviations of each risk contribution from an equal share of total risk.
/// Uses the finite-difference gradient.
pub struct RiskParity<'a> {
    pub covariance: &'a Array2<f64>,
}

impl RiskParity<'_> {
    pub fn risk_contributions(&self, weights: &[f64]) -> Vec<f64> {
        let sigma_w = sigma_times(weights, self.covariance);
        let volatility = ArrayView1::from(weights).dot(&sigma_w).max(0.0).sqrt();
        if volatility < ZERO_RISK {
            return vec![0.0; weights.len()];
        }
        weights
            .iter()
            .zip(sigma_w.iter())
            .map(|(w, sw)| w * sw / volatility)
            .collect()
    }
}

impl Objective for RiskParity<'_> {
    fn value(&self, weights: &[f64]) -> f64 {
        let contributions = self.risk_contributions(weights);
        let total: f64 = contributions.iter().sum();
        let share = total / weights.len() as f64;
        contributions.iter().map(|c| (c - share).powi(2)).sum()
    }
}
