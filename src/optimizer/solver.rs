//! Constrained nonlinear minimizer used by every optimization objective.
//!
//! Weight bounds and the budget (sum of weights) are enforced exactly by Euclidean
//! projection. Everything else (risk ceiling, sector caps, return targets) goes through an
//! augmented-Lagrangian outer loop. The inner loop is projected gradient descent with
//! Armijo backtracking and an adaptive step.

use crate::error::SolverError;
use log::debug;
use ndarray::{Array2, ArrayView1};

const FINITE_DIFFERENCE_STEP: f64 = 1e-7;
const ARMIJO_FRACTION: f64 = 1e-4;
const MIN_STEP: f64 = 1e-20;
const MAX_STEP: f64 = 1e8;
const FEASIBILITY_SLACK: f64 = 1e-12;
const BISECTION_ROUNDS: usize = 200;
const BUDGET_SNAP: f64 = 1e-12;

const INITIAL_PENALTY: f64 = 10.0;
const MAX_PENALTY: f64 = 1e8;
const MAX_OUTER_ROUNDS: usize = 25;

/// Scalar function to minimize over portfolio weights
pub trait Objective {
    fn value(&self, weights: &[f64]) -> f64;

    /// Central finite differences unless overridden with an analytic gradient
    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        numerical_gradient(|w| self.value(w), weights)
    }
}

pub fn numerical_gradient<F>(f: F, point: &[f64]) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut shifted = point.to_vec();
    let mut gradient = Vec::with_capacity(point.len());

    for i in 0..point.len() {
        let h = FINITE_DIFFERENCE_STEP * point[i].abs().max(1.0);
        shifted[i] = point[i] + h;
        let up = f(&shifted);
        shifted[i] = point[i] - h;
        let down = f(&shifted);
        shifted[i] = point[i];
        gradient.push((up - down) / (2.0 * h));
    }

    gradient
}

/// Box bounds intersected with a band on the sum of weights
#[derive(Debug, Clone)]
pub struct FeasibleSet {
    bounds: Vec<(f64, f64)>,
    budget: (f64, f64),
}

impl FeasibleSet {
    pub fn new(bounds: Vec<(f64, f64)>, budget: (f64, f64)) -> Result<Self, SolverError> {
        if let Some((i, (lower, upper))) = bounds
            .iter()
            .enumerate()
            .find(|(_, (l, u))| l > &(u + FEASIBILITY_SLACK))
        {
            return Err(SolverError::Infeasible(format!(
                "asset {i} has lower bound {lower} above upper bound {upper}"
            )));
        }

        let lower_total: f64 = bounds.iter().map(|(l, _)| l).sum();
        let upper_total: f64 = bounds.iter().map(|(_, u)| u).sum();
        if lower_total > budget.1 + FEASIBILITY_SLACK || upper_total < budget.0 - FEASIBILITY_SLACK {
            return Err(SolverError::Infeasible(format!(
                "weight bounds allow a total in [{lower_total:.6}, {upper_total:.6}] but the budget requires [{:.6}, {:.6}]",
                budget.0, budget.1
            )));
        }

        // Lower bounds within the slack of their upper bound are treated as equal.
        let bounds = bounds.into_iter().map(|(l, u)| (l, u.max(l))).collect();
        Ok(Self { bounds, budget })
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    pub fn budget(&self) -> (f64, f64) {
        self.budget
    }

    fn clamp_shifted(&self, point: &[f64], shift: f64) -> Vec<f64> {
        point
            .iter()
            .zip(&self.bounds)
            .map(|(p, (l, u))| (p - shift).clamp(*l, *u))
            .collect()
    }

    /// Closest point of the set in Euclidean distance
    pub fn project(&self, point: &[f64]) -> Vec<f64> {
        let clamped = self.clamp_shifted(point, 0.0);
        let total: f64 = clamped.iter().sum();
        let target = if total < self.budget.0 {
            self.budget.0
        } else if total > self.budget.1 {
            self.budget.1
        } else {
            return clamped;
        };

        // Sum of clamp(p - tau) is non-increasing in tau: bisect for the budget boundary.
        let mut low = point
            .iter()
            .zip(&self.bounds)
            .map(|(p, (_, u))| p - u)
            .fold(f64::INFINITY, f64::min);
        let mut high = point
            .iter()
            .zip(&self.bounds)
            .map(|(p, (l, _))| p - l)
            .fold(f64::NEG_INFINITY, f64::max);

        for _ in 0..BISECTION_ROUNDS {
            let mid = 0.5 * (low + high);
            let sum: f64 = self.clamp_shifted(point, mid).iter().sum();
            if sum > target {
                low = mid;
            } else {
                high = mid;
            }
            if high - low <= f64::EPSILON * high.abs().max(1.0) {
                break;
            }
        }

        let mut projected = self.clamp_shifted(point, 0.5 * (low + high));

        // Bisection stops within an ulp or so of the budget; a free coordinate absorbs the rest.
        let residual = target - projected.iter().sum::<f64>();
        if residual != 0.0 && residual.abs() <= BUDGET_SNAP {
            if let Some((w, _)) = projected
                .iter_mut()
                .zip(&self.bounds)
                .find(|(w, (l, u))| {
                    let snapped = **w + residual;
                    **w > *l && **w < *u && snapped >= *l && snapped <= *u
                })
            {
                *w += residual;
            }
        }
        projected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// h(w) = 0
    Equality,
    /// g(w) <= 0
    Inequality,
}

#[derive(Debug, Clone)]
pub enum ConstraintFunction<'a> {
    /// coefficients . w - rhs
    Linear { coefficients: Vec<f64>, rhs: f64 },
    /// sqrt(w' cov w) - cap
    Volatility { covariance: &'a Array2<f64>, cap: f64 },
}

/// A constraint the projection cannot handle directly
#[derive(Debug, Clone)]
pub struct NonlinearConstraint<'a> {
    pub label: String,
    pub kind: ConstraintKind,
    pub function: ConstraintFunction<'a>,
}

impl NonlinearConstraint<'_> {
    pub fn value(&self, weights: &[f64]) -> f64 {
        match &self.function {
            ConstraintFunction::Linear { coefficients, rhs } => {
                coefficients.iter().zip(weights).map(|(c, w)| c * w).sum::<f64>() - rhs
            }
            ConstraintFunction::Volatility { covariance, cap } => {
                let w = ArrayView1::from(weights);
                w.dot(&covariance.dot(&w)).max(0.0).sqrt() - cap
            }
        }
    }

    pub fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        match &self.function {
            ConstraintFunction::Linear { coefficients, .. } => coefficients.clone(),
            ConstraintFunction::Volatility { covariance, .. } => {
                let w = ArrayView1::from(weights);
                let sigma_w = covariance.dot(&w);
                let volatility = w.dot(&sigma_w).max(0.0).sqrt();
                if volatility > 0.0 {
                    sigma_w.iter().map(|v| v / volatility).collect()
                } else {
                    vec![0.0; weights.len()]
                }
            }
        }
    }

    /// Amount by which the constraint is violated (0.0 when satisfied)
    pub fn violation(&self, weights: &[f64]) -> f64 {
        let value = self.value(weights);
        match self.kind {
            ConstraintKind::Equality => value.abs(),
            ConstraintKind::Inequality => value.max(0.0),
        }
    }
}

struct AugmentedLagrangian<'s, 'c> {
    objective: &'s dyn Objective,
    constraints: &'s [NonlinearConstraint<'c>],
    multipliers: &'s [f64],
    penalty: f64,
}

impl Objective for AugmentedLagrangian<'_, '_> {
    fn value(&self, weights: &[f64]) -> f64 {
        let mut total = self.objective.value(weights);
        for (constraint, lambda) in self.constraints.iter().zip(self.multipliers) {
            let g = constraint.value(weights);
            total += match constraint.kind {
                ConstraintKind::Equality => lambda * g + 0.5 * self.penalty * g * g,
                ConstraintKind::Inequality => {
                    let shifted = (g + lambda / self.penalty).max(0.0);
                    0.5 * self.penalty * (shifted * shifted - (lambda / self.penalty).powi(2))
                }
            };
        }
        total
    }

    fn gradient(&self, weights: &[f64]) -> Vec<f64> {
        let mut gradient = self.objective.gradient(weights);
        for (constraint, lambda) in self.constraints.iter().zip(self.multipliers) {
            let g = constraint.value(weights);
            let scale = match constraint.kind {
                ConstraintKind::Equality => lambda + self.penalty * g,
                ConstraintKind::Inequality => (lambda + self.penalty * g).max(0.0),
            };
            if scale != 0.0 {
                for (total, dg) in gradient.iter_mut().zip(constraint.gradient(weights)) {
                    *total += scale * dg;
                }
            }
        }
        gradient
    }
}

#[derive(Debug, Clone)]
pub struct SolverOutcome {
    pub weights: Vec<f64>,
    pub objective_value: f64,
    pub iterations: usize,
    pub max_violation: f64,
}

struct DescentOutcome {
    point: Vec<f64>,
    value: f64,
    iterations: usize,
    converged: bool,
}

#[derive(Debug, Clone)]
pub struct ConstrainedSolver {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Target for the largest nonlinear-constraint violation before the outer loop stops
    pub feasibility_tolerance: f64,
}

impl ConstrainedSolver {
    pub fn new(max_iterations: usize, tolerance: f64, feasibility_tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
            feasibility_tolerance,
        }
    }

    pub fn minimize(
        &self,
        objective: &dyn Objective,
        feasible: &FeasibleSet,
        constraints: &[NonlinearConstraint<'_>],
        initial: &[f64],
    ) -> Result<SolverOutcome, SolverError> {
        let start = feasible.project(initial);

        if constraints.is_empty() {
            let outcome = self.descend(objective, feasible, start)?;
            if !outcome.converged {
                return Err(SolverError::IterationLimit {
                    iterations: outcome.iterations,
                });
            }
            debug!(
                "Solver converged in {} iterations, objective {:.6e}",
                outcome.iterations, outcome.value
            );
            return Ok(SolverOutcome {
                objective_value: outcome.value,
                weights: outcome.point,
                iterations: outcome.iterations,
                max_violation: 0.0,
            });
        }

        let mut multipliers = vec![0.0; constraints.len()];
        let mut penalty = INITIAL_PENALTY;
        let mut point = start;
        let mut previous_violation = f64::INFINITY;
        let mut total_iterations = 0;
        let mut converged = false;
        let mut violation = f64::INFINITY;

        for round in 0..MAX_OUTER_ROUNDS {
            let lagrangian = AugmentedLagrangian {
                objective,
                constraints,
                multipliers: &multipliers,
                penalty,
            };
            let outcome = self.descend(&lagrangian, feasible, point)?;
            total_iterations += outcome.iterations;
            converged = outcome.converged;
            point = outcome.point;

            violation = constraints
                .iter()
                .map(|c| c.violation(&point))
                .fold(0.0, f64::max);

            for (lambda, constraint) in multipliers.iter_mut().zip(constraints) {
                let g = constraint.value(&point);
                *lambda = match constraint.kind {
                    ConstraintKind::Equality => *lambda + penalty * g,
                    ConstraintKind::Inequality => (*lambda + penalty * g).max(0.0),
                };
            }

            debug!(
                "Outer round {}: violation {:.3e}, penalty {:.1e}, inner iterations {}",
                round, violation, penalty, outcome.iterations
            );

            if converged && violation <= self.feasibility_tolerance {
                break;
            }
            if violation > 0.25 * previous_violation {
                penalty = (penalty * 10.0).min(MAX_PENALTY);
            }
            previous_violation = violation;
        }

        if !converged {
            return Err(SolverError::IterationLimit {
                iterations: total_iterations,
            });
        }

        Ok(SolverOutcome {
            objective_value: objective.value(&point),
            weights: point,
            iterations: total_iterations,
            max_violation: violation,
        })
    }

    /// Projected gradient descent from `start`, which must already be feasible
    fn descend(
        &self,
        objective: &dyn Objective,
        feasible: &FeasibleSet,
        start: Vec<f64>,
    ) -> Result<DescentOutcome, SolverError> {
        let mut point = start;
        let mut value = objective.value(&point);
        if !value.is_finite() {
            return Err(SolverError::NonFiniteObjective { iteration: 0 });
        }

        let mut step = 1.0;
        for iteration in 1..=self.max_iterations {
            let gradient = objective.gradient(&point);
            if gradient.iter().any(|g| !g.is_finite()) {
                return Err(SolverError::NonFiniteGradient { iteration });
            }

            let mut accepted = None;
            while step >= MIN_STEP {
                let trial: Vec<f64> = point
                    .iter()
                    .zip(&gradient)
                    .map(|(w, g)| w - step * g)
                    .collect();
                let candidate = feasible.project(&trial);
                let directional: f64 = gradient
                    .iter()
                    .zip(candidate.iter().zip(&point))
                    .map(|(g, (c, w))| g * (c - w))
                    .sum();
                let candidate_value = objective.value(&candidate);

                if candidate_value.is_finite()
                    && candidate_value <= value + ARMIJO_FRACTION * directional
                {
                    accepted = Some((candidate, candidate_value));
                    break;
                }
                step *= 0.5;
            }

            // No step gives sufficient decrease: the point is stationary for this problem.
            let Some((candidate, candidate_value)) = accepted else {
                return Ok(DescentOutcome {
                    point,
                    value,
                    iterations: iteration,
                    converged: true,
                });
            };

            let displacement = candidate
                .iter()
                .zip(&point)
                .map(|(c, w)| (c - w).abs())
                .fold(0.0, f64::max);
            let improvement = value - candidate_value;
            point = candidate;
            value = candidate_value;

            let small_step = displacement <= self.tolerance;
            let stalled = improvement.abs() <= self.tolerance * (1.0 + value.abs())
                && displacement <= self.tolerance.sqrt();
            if small_step || stalled {
                return Ok(DescentOutcome {
                    point,
                    value,
                    iterations: iteration,
                    converged: true,
                });
            }

            step = (step * 2.0).min(MAX_STEP);
        }

        Ok(DescentOutcome {
            point,
            value,
            iterations: self.max_iterations,
            converged: false,
        })
    }
}
