//! Statistical helpers shared by the risk model and the performance analyzer.
//!
//! Callers validate series lengths; these functions return neutral values (0.0) for
//! degenerate inputs instead of erroring.

use statrs::statistics::{Data, OrderStatistics, RankTieBreaker, Statistics};

/// Standard deviations below this are rounding noise and are reported as exactly zero
pub const DISPERSION_FLOOR: f64 = 1e-12;

/// Arithmetic mean (0.0 for an empty series)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.mean()
}

/// Sample standard deviation (n - 1 denominator), 0.0 with fewer than two observations
/// or for a series that is constant up to rounding
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let std_dev = values.std_dev();
    if std_dev < DISPERSION_FLOOR { 0.0 } else { std_dev }
}

/// Sample covariance between two equal-length series
pub fn sample_covariance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    a.covariance(b)
}

/// Pearson correlation, 0.0 when either series is constant
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }

    let mean_a = mean(a);
    let mean_b = mean(b);
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;

    for (x, y) in a.iter().zip(b.iter()) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let floor = DISPERSION_FLOOR * DISPERSION_FLOOR * a.len() as f64;
    if var_a > floor && var_b > floor {
        (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Percentile with linear interpolation between closest ranks, `q` in [0, 100]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

/// Ranks (1-based) with ties sharing their average rank
pub fn ranks(values: &[f64]) -> Vec<f64> {
    let mut data = Data::new(values.to_vec());
    data.ranks(RankTieBreaker::Average)
}

/// Spearman rank correlation
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    pearson(&ranks(a), &ranks(b))
}

/// Kendall's tau-b, which corrects for ties in either series
pub fn kendall_tau(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let mut concordant: f64 = 0.0;
    let mut discordant: f64 = 0.0;
    let mut ties_a: f64 = 0.0;
    let mut ties_b: f64 = 0.0;

    for i in 0..n {
        for j in (i + 1)..n {
            let da = sign(a[i] - a[j]);
            let db = sign(b[i] - b[j]);

            if da == 0.0 && db == 0.0 {
                continue;
            } else if da == 0.0 {
                ties_a += 1.0;
            } else if db == 0.0 {
                ties_b += 1.0;
            } else if da * db > 0.0 {
                concordant += 1.0;
            } else {
                discordant += 1.0;
            }
        }
    }

    let denominator = ((concordant + discordant + ties_a) * (concordant + discordant + ties_b)).sqrt();
    if denominator > 0.0 {
        (concordant - discordant) / denominator
    } else {
        0.0
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Wealth index starting at 1.0 and compounding each periodic return
pub fn wealth_index(returns: &[f64]) -> Vec<f64> {
    let mut wealth = Vec::with_capacity(returns.len() + 1);
    let mut value = 1.0;
    wealth.push(value);
    for r in returns {
        value *= 1.0 + r;
        wealth.push(value);
    }
    wealth
}

/// Drawdown (as a positive fraction) from the running maximum at every point
pub fn drawdown_series(values: &[f64]) -> Vec<f64> {
    let mut running_max = f64::NEG_INFINITY;
    values
        .iter()
        .map(|&value| {
            running_max = running_max.max(value);
            if running_max > 0.0 {
                (running_max - value) / running_max
            } else {
                0.0
            }
        })
        .collect()
}

/// Maximum drawdown of a series of prices or cumulative values
pub fn max_drawdown(values: &[f64]) -> f64 {
    drawdown_series(values).into_iter().fold(0.0, f64::max)
}

/// Fraction of periods with a positive return
pub fn win_rate(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let wins = returns.iter().filter(|&&r| r > 0.0).count();
    wins as f64 / returns.len() as f64
}

/// Gross profits / gross losses; infinite when there are no losses
pub fn profit_factor(returns: &[f64]) -> f64 {
    let gross_profits: f64 = returns.iter().filter(|&&r| r > 0.0).sum();
    let gross_losses: f64 = returns.iter().filter(|&&r| r < 0.0).map(|r| r.abs()).sum();

    if gross_losses == 0.0 {
        return f64::INFINITY;
    }
    gross_profits / gross_losses
}
