//! Error types for the optimization core.
//!
//! Invalid input is always surfaced to the caller. Solver failures are the only errors the
//! optimizer recovers from on its own (see `PortfolioOptimizer::optimize`).

use thiserror::Error;

/// Errors raised by the optimizer, risk model and performance analyzer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortfolioError {
    /// Malformed inputs: empty asset list, mismatched lengths, bad correlation matrix, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The nonlinear solver could not produce a solution.
    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),
}

/// Reasons the constrained solver gives up.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// Weight bounds and the budget constraint leave no feasible point.
    #[error("feasible region is empty: {0}")]
    Infeasible(String),

    /// Objective evaluated to NaN or infinity (e.g. Sharpe ratio at zero portfolio risk).
    #[error("objective is not finite at iteration {iteration}")]
    NonFiniteObjective { iteration: usize },

    /// The objective has no finite optimum over the feasible region.
    #[error("objective is unbounded: {0}")]
    Unbounded(String),

    /// Gradient contained NaN or infinite entries.
    #[error("gradient is not finite at iteration {iteration}")]
    NonFiniteGradient { iteration: usize },

    /// Inner loop did not converge within the configured iteration cap.
    #[error("no convergence after {iterations} iterations")]
    IterationLimit { iterations: usize },
}

pub type Result<T> = std::result::Result<T, PortfolioError>;

impl PortfolioError {
    pub fn invalid(message: impl Into<String>) -> Self {
        PortfolioError::InvalidInput(message.into())
    }

    pub fn is_solver_failure(&self) -> bool {
        matches!(self, PortfolioError::Solver(_))
    }
}
