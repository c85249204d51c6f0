//! Turning caller-supplied constraints into solver inputs, and checking solutions against them.

use super::objectives::portfolio_volatility;
use super::solver::{ConstraintFunction, ConstraintKind, FeasibleSet, NonlinearConstraint};
use crate::config::BoundsPolicy;
use crate::error::{PortfolioError, Result, SolverError};
use crate::types::Constraint;
use crate::validation;
use log::{debug, warn};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Constraints parsed once per optimization call
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintSet {
    pub bounds: Vec<(f64, f64)>,
    pub max_portfolio_risk: Option<f64>,
    pub max_leverage: Option<f64>,
    pub max_sector_exposure: Option<f64>,
}

impl ConstraintSet {
    pub fn parse(constraints: &[Constraint], n: usize, policy: BoundsPolicy) -> Result<Self> {
        let mut set = Self {
            bounds: vec![(0.0, 1.0); n],
            max_portfolio_risk: None,
            max_leverage: None,
            max_sector_exposure: None,
        };

        for constraint in constraints {
            let value = constraint.value();
            if !value.is_finite() {
                return Err(PortfolioError::invalid(format!(
                    "constraint {constraint:?} has a non-finite value"
                )));
            }

            match (constraint, policy) {
                (Constraint::MaxWeight(v), BoundsPolicy::LastWins) => {
                    set.bounds = vec![(0.0, *v); n];
                }
                (Constraint::MinWeight(v), BoundsPolicy::LastWins) => {
                    set.bounds = vec![(*v, 1.0); n];
                }
                (Constraint::MaxWeight(v), BoundsPolicy::Intersect) => {
                    for bound in &mut set.bounds {
                        bound.1 = bound.1.min(*v);
                    }
                }
                (Constraint::MinWeight(v), BoundsPolicy::Intersect) => {
                    for bound in &mut set.bounds {
                        bound.0 = bound.0.max(*v);
                    }
                }
                (Constraint::MaxPortfolioRisk(v), _) => {
                    if *v < 0.0 {
                        return Err(PortfolioError::invalid(format!(
                            "max portfolio risk must be non-negative, got {v}"
                        )));
                    }
                    set.max_portfolio_risk = Some(*v);
                }
                (Constraint::LeverageLimit(v), _) => {
                    if *v <= 0.0 {
                        return Err(PortfolioError::invalid(format!(
                            "leverage limit must be positive, got {v}"
                        )));
                    }
                    set.max_leverage = Some(*v);
                }
                (Constraint::MaxSectorExposure(v), _) => {
                    set.max_sector_exposure = Some(*v);
                }
            }
        }

        Ok(set)
    }

    /// Allowed range for the sum of weights: exactly 1 unless a leverage limit widens it to
    /// `[min(1, L), max(1, L)]`
    pub fn budget(&self) -> (f64, f64) {
        match self.max_leverage {
            Some(limit) => (limit.min(1.0), limit.max(1.0)),
            None => (1.0, 1.0),
        }
    }

    pub fn feasible_set(&self) -> std::result::Result<FeasibleSet, SolverError> {
        FeasibleSet::new(self.bounds.clone(), self.budget())
    }

    /// Risk ceiling and per-sector caps as solver constraints
    pub fn nonlinear_constraints<'a>(
        &self,
        covariance: &'a Array2<f64>,
        sectors: Option<&[Option<String>]>,
    ) -> Vec<NonlinearConstraint<'a>> {
        let mut constraints = Vec::new();

        if let Some(cap) = self.max_portfolio_risk {
            constraints.push(NonlinearConstraint {
                label: format!("portfolio risk <= {cap}"),
                kind: ConstraintKind::Inequality,
                function: ConstraintFunction::Volatility { covariance, cap },
            });
        }

        if let Some(cap) = self.max_sector_exposure {
            match sectors {
                Some(labels) => {
                    for (sector, members) in sector_members(labels) {
                        let coefficients = (0..labels.len())
                            .map(|i| if members.contains(&i) { 1.0 } else { 0.0 })
                            .collect();
                        constraints.push(NonlinearConstraint {
                            label: format!("sector {sector} exposure <= {cap}"),
                            kind: ConstraintKind::Inequality,
                            function: ConstraintFunction::Linear {
                                coefficients,
                                rhs: cap,
                            },
                        });
                    }
                }
                None => debug!(
                    "Max sector exposure {} ignored: no sector labels supplied",
                    cap
                ),
            }
        }

        constraints
    }

    /// Post-solve check. Returns a description of every violated constraint.
    pub fn violations(
        &self,
        weights: &[f64],
        covariance: &Array2<f64>,
        sectors: Option<&[Option<String>]>,
        tolerance: f64,
    ) -> Vec<String> {
        let mut violations = Vec::new();

        for (i, (w, (lower, upper))) in weights.iter().zip(&self.bounds).enumerate() {
            if *w < lower - tolerance || *w > upper + tolerance {
                violations.push(format!(
                    "weight {i} = {w:.6} outside [{lower:.6}, {upper:.6}]"
                ));
            }
        }

        let total: f64 = weights.iter().sum();
        let (low, high) = self.budget();
        if total < low - tolerance || total > high + tolerance {
            violations.push(format!(
                "sum of weights {total:.6} outside [{low:.6}, {high:.6}]"
            ));
        }

        if let Some(cap) = self.max_portfolio_risk {
            let risk = portfolio_volatility(weights, covariance);
            if risk > cap + tolerance {
                violations.push(format!("portfolio risk {risk:.6} exceeds {cap:.6}"));
            }
        }

        if let (Some(cap), Some(labels)) = (self.max_sector_exposure, sectors) {
            for (sector, members) in sector_members(labels) {
                let exposure: f64 = members.iter().map(|&i| weights[i]).sum();
                if exposure > cap + tolerance {
                    violations.push(format!(
                        "sector {sector} exposure {exposure:.6} exceeds {cap:.6}"
                    ));
                }
            }
        }

        violations
    }
}

/// Asset indices per sector label, in a stable order. Unlabelled assets are skipped.
fn sector_members(labels: &[Option<String>]) -> BTreeMap<&str, Vec<usize>> {
    let mut members: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        if let Some(sector) = label {
            members.entry(sector.as_str()).or_default().push(i);
        }
    }
    members
}

/// cov = diag(sqrt(risk)) . corr . diag(sqrt(risk)).
///
/// Returns the covariance and whether the identity correlation was assumed.
pub fn build_covariance(
    risk_estimates: &[f64],
    correlation: Option<&Array2<f64>>,
) -> Result<(Array2<f64>, bool)> {
    let n = risk_estimates.len();
    let volatilities: Vec<f64> = risk_estimates.iter().map(|r| r.sqrt()).collect();

    let assumed_uncorrelated = correlation.is_none();
    let correlation = match correlation {
        Some(matrix) => {
            validation::validate_correlation(matrix, n)?;
            matrix.clone()
        }
        None => {
            warn!(
                "No correlation matrix supplied for {} positions; assuming they are uncorrelated",
                n
            );
            Array2::eye(n)
        }
    };

    let covariance =
        Array2::from_shape_fn((n, n), |(i, j)| volatilities[i] * correlation[[i, j]] * volatilities[j]);
    Ok((covariance, assumed_uncorrelated))
}
