//! Realized performance of a portfolio return series: annualized metrics, Brinson
//! attribution and rolling-window analysis.

use crate::config::PerformanceConfig;
use crate::error::{PortfolioError, Result};
use crate::stats;
use crate::validation;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Tail probability behind the reported VaR and Expected Shortfall
const VAR_TAIL: f64 = 0.05;

/// Relative-to-benchmark statistics, annualized where that applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    /// Jensen's alpha
    pub alpha: f64,
    pub beta: f64,
    pub tracking_error: f64,
    pub information_ratio: f64,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub periods: usize,
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Infinite when the series has no negative return
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub current_drawdown: f64,
    /// Historical 5% VaR of a single period
    pub var_95: f64,
    pub expected_shortfall_95: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub benchmark: Option<BenchmarkMetrics>,
}

/// Brinson-Hood-Beebower effects for one asset, summed over all periods
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetAttribution {
    pub allocation: f64,
    pub selection: f64,
    pub interaction: f64,
}

impl AssetAttribution {
    pub fn total(&self) -> f64 {
        self.allocation + self.selection + self.interaction
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub allocation_effect: f64,
    pub selection_effect: f64,
    pub interaction_effect: f64,
    pub portfolio_return: f64,
    pub benchmark_return: f64,
    /// Portfolio minus benchmark return; equals the sum of the three effects
    pub total_active_return: f64,
    pub asset_effects: Vec<AssetAttribution>,
    pub periods: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingPerformance {
    pub window_size: usize,
    pub annualized_returns: Vec<f64>,
    pub volatilities: Vec<f64>,
    pub sharpe_ratios: Vec<f64>,
    pub max_drawdowns: Vec<f64>,
    pub alphas: Option<Vec<f64>>,
    pub betas: Option<Vec<f64>>,
}

impl RollingPerformance {
    pub fn len(&self) -> usize {
        self.annualized_returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annualized_returns.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PerformanceAnalyzer {
    config: PerformanceConfig,
}

impl PerformanceAnalyzer {
    pub fn new(config: PerformanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PerformanceConfig {
        &self.config
    }

    fn annualize_return(&self, returns: &[f64]) -> f64 {
        stats::mean(returns) * self.config.periods_per_year
    }

    fn annualize_volatility(&self, returns: &[f64]) -> f64 {
        stats::sample_std(returns) * self.config.periods_per_year.sqrt()
    }

    fn sharpe(&self, annualized_return: f64, volatility: f64) -> f64 {
        if volatility > 0.0 {
            (annualized_return - self.config.risk_free_rate) / volatility
        } else {
            0.0
        }
    }

    /// Metrics for a periodic return series. Benchmark statistics are only computed for a
    /// benchmark of the same length.
    pub fn calculate_performance_metrics(
        &self,
        portfolio_returns: &[f64],
        benchmark_returns: Option<&[f64]>,
    ) -> Result<PerformanceMetrics> {
        validation::require_non_empty(portfolio_returns, "portfolio_returns")?;
        validation::require_finite(portfolio_returns, "portfolio_returns")?;

        let annualized_return = self.annualize_return(portfolio_returns);
        let volatility = self.annualize_volatility(portfolio_returns);

        let downside_deviation = (portfolio_returns
            .iter()
            .map(|r| r.min(0.0).powi(2))
            .sum::<f64>()
            / portfolio_returns.len() as f64)
            .sqrt()
            * self.config.periods_per_year.sqrt();
        let sortino_ratio = if downside_deviation > 0.0 {
            (annualized_return - self.config.risk_free_rate) / downside_deviation
        } else {
            f64::INFINITY
        };

        let wealth = stats::wealth_index(portfolio_returns);
        let drawdowns = stats::drawdown_series(&wealth);
        let max_drawdown = drawdowns.iter().copied().fold(0.0, f64::max);
        let current_drawdown = drawdowns.last().copied().unwrap_or(0.0);
        let total_return = wealth.last().copied().unwrap_or(1.0) - 1.0;

        let var_95 = stats::percentile(portfolio_returns, VAR_TAIL * 100.0);
        let tail: Vec<f64> = portfolio_returns
            .iter()
            .copied()
            .filter(|r| *r <= var_95)
            .collect();

        let benchmark = match benchmark_returns {
            Some(benchmark) if benchmark.len() == portfolio_returns.len() => {
                validation::require_finite(benchmark, "benchmark_returns")?;
                Some(self.benchmark_metrics(portfolio_returns, benchmark))
            }
            Some(benchmark) => {
                warn!(
                    "Benchmark has {} periods but portfolio has {}; skipping relative metrics",
                    benchmark.len(),
                    portfolio_returns.len()
                );
                None
            }
            None => None,
        };

        Ok(PerformanceMetrics {
            periods: portfolio_returns.len(),
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio: self.sharpe(annualized_return, volatility),
            sortino_ratio,
            calmar_ratio: if max_drawdown > 0.0 {
                annualized_return / max_drawdown
            } else {
                0.0
            },
            max_drawdown,
            current_drawdown,
            var_95,
            expected_shortfall_95: stats::mean(&tail),
            win_rate: stats::win_rate(portfolio_returns),
            profit_factor: stats::profit_factor(portfolio_returns),
            benchmark,
        })
    }

    fn benchmark_metrics(&self, returns: &[f64], benchmark: &[f64]) -> BenchmarkMetrics {
        let benchmark_variance = stats::sample_std(benchmark).powi(2);
        let beta = if benchmark_variance > 0.0 {
            stats::sample_covariance(returns, benchmark) / benchmark_variance
        } else {
            0.0
        };

        let portfolio_annual = self.annualize_return(returns);
        let benchmark_annual = self.annualize_return(benchmark);
        let rf = self.config.risk_free_rate;

        let active: Vec<f64> = returns.iter().zip(benchmark).map(|(p, b)| p - b).collect();
        let tracking_error = self.annualize_volatility(&active);
        let information_ratio = if tracking_error > 0.0 {
            (portfolio_annual - benchmark_annual) / tracking_error
        } else {
            0.0
        };

        BenchmarkMetrics {
            alpha: portfolio_annual - (rf + beta * (benchmark_annual - rf)),
            beta,
            tracking_error,
            information_ratio,
            correlation: stats::pearson(returns, benchmark),
        }
    }

    /// Brinson-Hood-Beebower attribution accumulated period by period.
    ///
    /// Rows are periods and columns are assets. Without benchmark weights the benchmark is
    /// equal-weighted; without benchmark returns each asset's own return is its benchmark,
    /// which leaves every difference in the allocation effect.
    pub fn attribution_analysis(
        &self,
        portfolio_weights: &[Vec<f64>],
        asset_returns: &[Vec<f64>],
        benchmark_weights: Option<&[Vec<f64>]>,
        benchmark_returns: Option<&[Vec<f64>]>,
    ) -> Result<AttributionResult> {
        let periods = portfolio_weights.len();
        if periods == 0 {
            return Err(PortfolioError::invalid("portfolio_weights has no periods"));
        }
        let n = portfolio_weights[0].len();
        if n == 0 {
            return Err(PortfolioError::invalid("portfolio_weights has no assets"));
        }
        require_panel(portfolio_weights, periods, n, "portfolio_weights")?;
        require_panel(asset_returns, periods, n, "asset_returns")?;
        if let Some(weights) = benchmark_weights {
            require_panel(weights, periods, n, "benchmark_weights")?;
        }
        if let Some(returns) = benchmark_returns {
            require_panel(returns, periods, n, "benchmark_returns")?;
        }

        let equal_weights = vec![1.0 / n as f64; n];
        let mut asset_effects = vec![AssetAttribution::default(); n];
        let mut portfolio_return = 0.0;
        let mut benchmark_return = 0.0;

        for t in 0..periods {
            let wp = &portfolio_weights[t];
            let rp = &asset_returns[t];
            let wb = benchmark_weights.map_or(&equal_weights, |w| &w[t]);
            let rb = benchmark_returns.map_or(rp, |r| &r[t]);

            for i in 0..n {
                let weight_gap = wp[i] - wb[i];
                let return_gap = rp[i] - rb[i];
                let effects = &mut asset_effects[i];
                effects.allocation += weight_gap * rb[i];
                effects.selection += wb[i] * return_gap;
                effects.interaction += weight_gap * return_gap;

                portfolio_return += wp[i] * rp[i];
                benchmark_return += wb[i] * rb[i];
            }
        }

        let allocation_effect = asset_effects.iter().map(|e| e.allocation).sum();
        let selection_effect = asset_effects.iter().map(|e| e.selection).sum();
        let interaction_effect = asset_effects.iter().map(|e| e.interaction).sum();
        debug!(
            "Attribution over {} periods: allocation {:.6}, selection {:.6}, interaction {:.6}",
            periods, allocation_effect, selection_effect, interaction_effect
        );

        Ok(AttributionResult {
            allocation_effect,
            selection_effect,
            interaction_effect,
            portfolio_return,
            benchmark_return,
            total_active_return: portfolio_return - benchmark_return,
            asset_effects,
            periods,
        })
    }

    /// Metrics over every window of `window_size` consecutive periods (the configured
    /// rolling window when `None`). Output vectors have `len - window_size + 1` entries, or
    /// none when the series is shorter than one window.
    pub fn rolling_performance_analysis(
        &self,
        portfolio_returns: &[f64],
        window_size: Option<usize>,
        benchmark_returns: Option<&[f64]>,
    ) -> Result<RollingPerformance> {
        let window = window_size.unwrap_or(self.config.rolling_window);
        if window == 0 {
            return Err(PortfolioError::invalid("rolling window must be at least 1"));
        }
        validation::require_finite(portfolio_returns, "portfolio_returns")?;

        let benchmark = match benchmark_returns {
            Some(benchmark) => {
                validation::require_same_length(
                    portfolio_returns.len(),
                    benchmark.len(),
                    "portfolio_returns vs benchmark_returns",
                )?;
                validation::require_finite(benchmark, "benchmark_returns")?;
                Some(benchmark)
            }
            None => None,
        };

        let mut rolling = RollingPerformance {
            window_size: window,
            alphas: benchmark.map(|_| Vec::new()),
            betas: benchmark.map(|_| Vec::new()),
            ..RollingPerformance::default()
        };

        if portfolio_returns.len() < window {
            info!(
                "Series of {} periods is shorter than the {}-period window; no rolling metrics",
                portfolio_returns.len(),
                window
            );
            return Ok(rolling);
        }

        for (start, slice) in portfolio_returns.windows(window).enumerate() {
            let annualized_return = self.annualize_return(slice);
            let volatility = self.annualize_volatility(slice);
            rolling.annualized_returns.push(annualized_return);
            rolling.volatilities.push(volatility);
            rolling.sharpe_ratios.push(self.sharpe(annualized_return, volatility));
            rolling
                .max_drawdowns
                .push(stats::max_drawdown(&stats::wealth_index(slice)));

            if let Some(benchmark) = benchmark {
                let relative = self.benchmark_metrics(slice, &benchmark[start..start + window]);
                if let Some(alphas) = rolling.alphas.as_mut() {
                    alphas.push(relative.alpha);
                }
                if let Some(betas) = rolling.betas.as_mut() {
                    betas.push(relative.beta);
                }
            }
        }

        debug!("Rolling analysis produced {} windows", rolling.len());
        Ok(rolling)
    }
}

fn require_panel(panel: &[Vec<f64>], periods: usize, n: usize, name: &str) -> Result<()> {
    validation::require_same_length(periods, panel.len(), &format!("{name} periods"))?;
    for (t, row) in panel.iter().enumerate() {
        validation::require_same_length(n, row.len(), &format!("{name}[{t}]"))?;
        validation::require_finite(row, name)?;
    }
    Ok(())
}
