//! Risk estimation for arbitrage portfolios: VaR and Expected Shortfall, Euler risk
//! decomposition, correlation estimation, stress testing and concentration.
//!
//! All operations are pure. The only configuration is the Monte Carlo draw count and seed.

use crate::config::RiskConfig;
use crate::error::{PortfolioError, Result};
use crate::optimizer::objectives::{portfolio_return, portfolio_volatility};
use crate::stats;
use crate::validation;
use log::{debug, warn};
use ndarray::{Array2, ArrayView1};
use rand::SeedableRng;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    /// Empirical percentile of the observed returns
    Historical,
    /// Gaussian quantile from the sample mean and standard deviation
    Parametric,
    /// Percentile of simulated Gaussian draws with the sample moments
    MonteCarlo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
    Kendall,
}

/// Euler decomposition of portfolio volatility
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskDecomposition {
    pub portfolio_risk: f64,
    /// (cov . w)_i / portfolio risk
    pub marginal_contributions: Vec<f64>,
    /// w_i * marginal_i; sums to the portfolio risk
    pub component_contributions: Vec<f64>,
    /// component_i / portfolio risk; sums to one
    pub percentage_contributions: Vec<f64>,
}

/// VaR and Expected Shortfall at one tail probability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TailRisk {
    pub confidence_level: f64,
    pub value_at_risk: f64,
    pub expected_shortfall: f64,
}

/// Risk profile of a historical return series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskMetrics {
    /// Per-period sample standard deviation
    pub volatility: f64,
    pub tail_risk: Vec<TailRisk>,
    pub max_drawdown: f64,
    pub beta: Option<f64>,
    pub correlation_to_market: Option<f64>,
}

impl RiskMetrics {
    pub fn var_at(&self, confidence_level: f64) -> Option<f64> {
        self.tail_risk
            .iter()
            .find(|t| (t.confidence_level - confidence_level).abs() < 1e-12)
            .map(|t| t.value_at_risk)
    }
}

/// Shocks applied to copies of the baseline inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    /// Added to each asset's expected return
    #[serde(default)]
    pub return_shocks: Option<Vec<f64>>,
    /// Multiplies each asset's volatility
    #[serde(default)]
    pub volatility_multipliers: Option<Vec<f64>>,
    /// Every pairwise correlation is raised to at least this value
    #[serde(default)]
    pub correlation_floor: Option<f64>,
}

impl StressScenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            return_shocks: None,
            volatility_multipliers: None,
            correlation_floor: None,
        }
    }

    pub fn with_return_shocks(mut self, shocks: Vec<f64>) -> Self {
        self.return_shocks = Some(shocks);
        self
    }

    pub fn with_volatility_multipliers(mut self, multipliers: Vec<f64>) -> Self {
        self.volatility_multipliers = Some(multipliers);
        self
    }

    pub fn with_correlation_floor(mut self, floor: f64) -> Self {
        self.correlation_floor = Some(floor);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressTestResult {
    pub scenario: String,
    pub baseline_return: f64,
    pub baseline_risk: f64,
    pub stressed_return: f64,
    pub stressed_risk: f64,
    pub return_change: f64,
    pub risk_change: f64,
}

/// Concentration of a weight vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concentration {
    /// Herfindahl-Hirschman index of the normalized absolute weights
    pub hhi: f64,
    /// 1 / HHI
    pub effective_positions: f64,
    pub largest_weight: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RiskModel {
    config: RiskConfig,
}

impl RiskModel {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Value at Risk as a return quantile: `confidence_level` is the tail probability, so
    /// 0.05 gives the 5th percentile and a loss shows up as a negative number.
    pub fn estimate_var(
        &self,
        returns: &[f64],
        confidence_level: f64,
        method: VarMethod,
    ) -> Result<f64> {
        validation::require_non_empty(returns, "returns")?;
        validation::require_finite(returns, "returns")?;
        validation::require_probability(confidence_level)?;

        let var = match method {
            VarMethod::Historical => stats::percentile(returns, confidence_level * 100.0),
            VarMethod::Parametric => {
                let mean = stats::mean(returns);
                match gaussian(mean, stats::sample_std(returns)) {
                    Some(normal) => normal.inverse_cdf(confidence_level),
                    None => mean,
                }
            }
            VarMethod::MonteCarlo => self.monte_carlo_var(returns, confidence_level),
        };

        debug!(
            "{:?} VaR at {:.3} over {} observations: {:.6}",
            method,
            confidence_level,
            returns.len(),
            var
        );
        Ok(var)
    }

    fn monte_carlo_var(&self, returns: &[f64], confidence_level: f64) -> f64 {
        let mean = stats::mean(returns);
        let Some(normal) = gaussian(mean, stats::sample_std(returns)) else {
            return mean;
        };

        let mut rng = match self.config.monte_carlo_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let draws: Vec<f64> = (0..self.config.monte_carlo_simulations.max(1))
            .map(|_| normal.sample(&mut rng))
            .collect();
        stats::percentile(&draws, confidence_level * 100.0)
    }

    /// Mean of the returns at or below the historical VaR
    pub fn estimate_expected_shortfall(&self, returns: &[f64], confidence_level: f64) -> Result<f64> {
        let threshold = self.estimate_var(returns, confidence_level, VarMethod::Historical)?;
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
        Ok(stats::mean(&tail))
    }

    pub fn calculate_risk_decomposition(
        &self,
        weights: &[f64],
        covariance: &Array2<f64>,
    ) -> Result<RiskDecomposition> {
        validation::require_non_empty(weights, "weights")?;
        validation::require_finite(weights, "weights")?;
        validation::validate_covariance(covariance, weights.len())?;

        let sigma_w = covariance.dot(&ArrayView1::from(weights));
        let portfolio_risk = portfolio_volatility(weights, covariance);
        let n = weights.len();

        if portfolio_risk <= 0.0 {
            return Ok(RiskDecomposition {
                portfolio_risk: 0.0,
                marginal_contributions: vec![0.0; n],
                component_contributions: vec![0.0; n],
                percentage_contributions: vec![0.0; n],
            });
        }

        let marginal_contributions: Vec<f64> =
            sigma_w.iter().map(|sw| sw / portfolio_risk).collect();
        let component_contributions: Vec<f64> = weights
            .iter()
            .zip(&marginal_contributions)
            .map(|(w, m)| w * m)
            .collect();
        let percentage_contributions = component_contributions
            .iter()
            .map(|c| c / portfolio_risk)
            .collect();

        Ok(RiskDecomposition {
            portfolio_risk,
            marginal_contributions,
            component_contributions,
            percentage_contributions,
        })
    }

    /// Correlation matrix of a T x N return matrix (one column per asset)
    pub fn estimate_correlation_matrix(
        &self,
        returns: &Array2<f64>,
        method: CorrelationMethod,
    ) -> Result<Array2<f64>> {
        let (observations, assets) = returns.dim();
        if assets == 0 {
            return Err(PortfolioError::invalid("returns matrix has no assets"));
        }
        if observations < 2 {
            return Err(PortfolioError::invalid(format!(
                "need at least 2 observations to estimate correlation, got {observations}"
            )));
        }
        if returns.iter().any(|v| !v.is_finite()) {
            return Err(PortfolioError::invalid("returns matrix contains non-finite values"));
        }

        let columns: Vec<Vec<f64>> = (0..assets).map(|j| returns.column(j).to_vec()).collect();
        // Spearman is Pearson on ranks, so rank each column once
        let columns: Vec<Vec<f64>> = match method {
            CorrelationMethod::Spearman => columns.iter().map(|c| stats::ranks(c)).collect(),
            _ => columns,
        };

        let mut correlation = Array2::eye(assets);
        for i in 0..assets {
            for j in (i + 1)..assets {
                let rho = match method {
                    CorrelationMethod::Pearson | CorrelationMethod::Spearman => {
                        stats::pearson(&columns[i], &columns[j])
                    }
                    CorrelationMethod::Kendall => stats::kendall_tau(&columns[i], &columns[j]),
                };
                correlation[[i, j]] = rho;
                correlation[[j, i]] = rho;
            }
        }

        Ok(correlation)
    }

    /// Portfolio return and risk under each scenario, alongside the baseline. The baseline
    /// inputs are never modified.
    pub fn stress_test_portfolio(
        &self,
        weights: &[f64],
        expected_returns: &[f64],
        covariance: &Array2<f64>,
        scenarios: &[StressScenario],
    ) -> Result<Vec<StressTestResult>> {
        let n = weights.len();
        validation::require_non_empty(weights, "weights")?;
        validation::require_same_length(n, expected_returns.len(), "weights vs expected_returns")?;
        validation::validate_covariance(covariance, n)?;

        let baseline_return = portfolio_return(weights, expected_returns);
        let baseline_risk = portfolio_volatility(weights, covariance);

        scenarios
            .iter()
            .map(|scenario| {
                let (returns, stressed_covariance) =
                    apply_scenario(scenario, expected_returns, covariance)?;
                let stressed_return = portfolio_return(weights, &returns);
                let stressed_risk = portfolio_volatility(weights, &stressed_covariance);
                debug!(
                    "Stress scenario {}: return {:.4} -> {:.4}, risk {:.4} -> {:.4}",
                    scenario.name, baseline_return, stressed_return, baseline_risk, stressed_risk
                );
                Ok(StressTestResult {
                    scenario: scenario.name.clone(),
                    baseline_return,
                    baseline_risk,
                    stressed_return,
                    stressed_risk,
                    return_change: stressed_return - baseline_return,
                    risk_change: stressed_risk - baseline_risk,
                })
            })
            .collect()
    }

    /// Stock scenarios for a book of `n` merger-arbitrage positions
    pub fn predefined_scenarios(n: usize) -> Vec<StressScenario> {
        vec![
            // Several deals break at once and spreads collapse to downside
            StressScenario::new("deal_break_wave")
                .with_return_shocks(vec![-0.15; n])
                .with_volatility_multipliers(vec![2.0; n])
                .with_correlation_floor(0.5),
            StressScenario::new("spread_widening")
                .with_return_shocks(vec![-0.05; n])
                .with_volatility_multipliers(vec![1.5; n]),
            // Financing dries up and deals trade together
            StressScenario::new("credit_crisis")
                .with_return_shocks(vec![-0.10; n])
                .with_volatility_multipliers(vec![2.5; n])
                .with_correlation_floor(0.7),
        ]
    }

    /// Volatility, VaR/ES at each level and drawdown of a periodic return series. Beta and
    /// correlation to the market are only reported for a market series of equal length.
    pub fn calculate_risk_metrics(
        &self,
        returns: &[f64],
        market_returns: Option<&[f64]>,
        confidence_levels: &[f64],
    ) -> Result<RiskMetrics> {
        validation::require_non_empty(returns, "returns")?;
        validation::require_finite(returns, "returns")?;

        let tail_risk = confidence_levels
            .iter()
            .map(|&level| {
                Ok(TailRisk {
                    confidence_level: level,
                    value_at_risk: self.estimate_var(returns, level, VarMethod::Historical)?,
                    expected_shortfall: self.estimate_expected_shortfall(returns, level)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (beta, correlation_to_market) = match market_returns {
            Some(market) if market.len() == returns.len() => {
                validation::require_finite(market, "market_returns")?;
                let market_variance = stats::sample_std(market).powi(2);
                let beta = if market_variance > 0.0 {
                    stats::sample_covariance(returns, market) / market_variance
                } else {
                    0.0
                };
                (Some(beta), Some(stats::pearson(returns, market)))
            }
            Some(market) => {
                warn!(
                    "Market series has {} observations but returns have {}; skipping beta",
                    market.len(),
                    returns.len()
                );
                (None, None)
            }
            None => (None, None),
        };

        Ok(RiskMetrics {
            volatility: stats::sample_std(returns),
            tail_risk,
            max_drawdown: stats::max_drawdown(&stats::wealth_index(returns)),
            beta,
            correlation_to_market,
        })
    }

    pub fn portfolio_concentration(&self, weights: &[f64]) -> Result<Concentration> {
        validation::require_non_empty(weights, "weights")?;
        validation::require_finite(weights, "weights")?;

        let gross: f64 = weights.iter().map(|w| w.abs()).sum();
        if gross <= 0.0 {
            return Err(PortfolioError::invalid("weights are all zero"));
        }

        let shares: Vec<f64> = weights.iter().map(|w| w.abs() / gross).collect();
        let hhi: f64 = shares.iter().map(|s| s * s).sum();
        Ok(Concentration {
            hhi,
            effective_positions: 1.0 / hhi,
            largest_weight: shares.iter().copied().fold(0.0, f64::max),
        })
    }
}

/// Normal distribution, or None for a degenerate (zero or invalid) spread
fn gaussian(mean: f64, std_dev: f64) -> Option<Normal> {
    if std_dev > 0.0 {
        Normal::new(mean, std_dev).ok()
    } else {
        None
    }
}

fn apply_scenario(
    scenario: &StressScenario,
    expected_returns: &[f64],
    covariance: &Array2<f64>,
) -> Result<(Vec<f64>, Array2<f64>)> {
    let n = expected_returns.len();

    let mut returns = expected_returns.to_vec();
    if let Some(shocks) = &scenario.return_shocks {
        validation::require_same_length(n, shocks.len(), "return shocks")?;
        validation::require_finite(shocks, "return shocks")?;
        for (r, shock) in returns.iter_mut().zip(shocks) {
            *r += shock;
        }
    }

    let multipliers = match &scenario.volatility_multipliers {
        Some(m) => {
            validation::require_same_length(n, m.len(), "volatility multipliers")?;
            validation::require_finite(m, "volatility multipliers")?;
            if m.iter().any(|v| *v < 0.0) {
                return Err(PortfolioError::invalid(format!(
                    "scenario {} has a negative volatility multiplier",
                    scenario.name
                )));
            }
            m.clone()
        }
        None => vec![1.0; n],
    };

    let volatilities: Vec<f64> = (0..n).map(|i| covariance[[i, i]].max(0.0).sqrt()).collect();
    let floor = match scenario.correlation_floor {
        Some(f) if (-1.0..=1.0).contains(&f) => Some(f),
        Some(f) => {
            return Err(PortfolioError::invalid(format!(
                "correlation floor {f} outside [-1, 1]"
            )));
        }
        None => None,
    };

    let stressed = Array2::from_shape_fn((n, n), |(i, j)| {
        let scale = multipliers[i] * multipliers[j];
        match floor {
            Some(floor) if i != j => {
                let denominator = volatilities[i] * volatilities[j];
                let rho = if denominator > 0.0 {
                    covariance[[i, j]] / denominator
                } else {
                    0.0
                };
                rho.max(floor) * denominator * scale
            }
            _ => covariance[[i, j]] * scale,
        }
    });

    Ok((returns, stressed))
}
