//! Input checks run before any numerical work. Every failure is an `InvalidInput`.

use crate::error::{PortfolioError, Result};
use ndarray::Array2;

const SYMMETRY_TOLERANCE: f64 = 1e-8;

pub fn require_non_empty(values: &[f64], name: &str) -> Result<()> {
    if values.is_empty() {
        return Err(PortfolioError::invalid(format!("{name} is empty")));
    }
    Ok(())
}

pub fn require_finite(values: &[f64], name: &str) -> Result<()> {
    if let Some(i) = values.iter().position(|v| !v.is_finite()) {
        return Err(PortfolioError::invalid(format!(
            "{name}[{i}] is not a finite number"
        )));
    }
    Ok(())
}

pub fn require_same_length(a: usize, b: usize, what: &str) -> Result<()> {
    if a != b {
        return Err(PortfolioError::invalid(format!(
            "{what}: length mismatch ({a} vs {b})"
        )));
    }
    Ok(())
}

/// Tail probability used for VaR/ES, must lie strictly inside (0, 1)
pub fn require_probability(level: f64) -> Result<()> {
    if !(level > 0.0 && level < 1.0) {
        return Err(PortfolioError::invalid(format!(
            "confidence level must be in (0, 1), got {level}"
        )));
    }
    Ok(())
}

fn require_square(matrix: &Array2<f64>, n: usize, name: &str) -> Result<()> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(PortfolioError::invalid(format!(
            "{name} is not square ({rows}x{cols})"
        )));
    }
    if rows != n {
        return Err(PortfolioError::invalid(format!(
            "{name} is {rows}x{cols} but there are {n} assets"
        )));
    }
    if let Some(v) = matrix.iter().find(|v| !v.is_finite()) {
        return Err(PortfolioError::invalid(format!(
            "{name} contains a non-finite entry ({v})"
        )));
    }
    Ok(())
}

fn require_symmetric(matrix: &Array2<f64>, name: &str) -> Result<()> {
    let n = matrix.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let scale = matrix[[i, j]].abs().max(matrix[[j, i]].abs()).max(1.0);
            if (matrix[[i, j]] - matrix[[j, i]]).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(PortfolioError::invalid(format!(
                    "{name} is not symmetric at ({i}, {j})"
                )));
            }
        }
    }
    Ok(())
}

/// Square, symmetric, unit diagonal, off-diagonal entries in [-1, 1].
/// Positive semi-definiteness is not checked.
pub fn validate_correlation(matrix: &Array2<f64>, n: usize) -> Result<()> {
    require_square(matrix, n, "correlation matrix")?;
    require_symmetric(matrix, "correlation matrix")?;

    for i in 0..n {
        if (matrix[[i, i]] - 1.0).abs() > SYMMETRY_TOLERANCE {
            return Err(PortfolioError::invalid(format!(
                "correlation matrix diagonal must be 1.0, got {} at {i}",
                matrix[[i, i]]
            )));
        }
    }
    if let Some(v) = matrix.iter().find(|v| v.abs() > 1.0 + SYMMETRY_TOLERANCE) {
        return Err(PortfolioError::invalid(format!(
            "correlation {v} outside [-1, 1]"
        )));
    }
    Ok(())
}

/// Square, symmetric, non-negative diagonal
pub fn validate_covariance(matrix: &Array2<f64>, n: usize) -> Result<()> {
    require_square(matrix, n, "covariance matrix")?;
    require_symmetric(matrix, "covariance matrix")?;

    if let Some(i) = (0..n).find(|&i| matrix[[i, i]] < 0.0) {
        return Err(PortfolioError::invalid(format!(
            "covariance matrix has negative variance at {i}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_correlation_checks() {
        assert!(validate_correlation(&Array2::eye(3), 3).is_ok());
        assert!(validate_correlation(&Array2::eye(3), 2).is_err());
        assert!(validate_correlation(&array![[1.0, 0.3], [0.2, 1.0]], 2).is_err());
        assert!(validate_correlation(&array![[1.0, 1.3], [1.3, 1.0]], 2).is_err());
        assert!(validate_correlation(&array![[0.9, 0.3], [0.3, 1.0]], 2).is_err());
        assert!(validate_correlation(&Array2::zeros((2, 3)), 2).is_err());
    }

    #[test]
    fn test_covariance_checks() {
        assert!(validate_covariance(&array![[0.04, 0.01], [0.01, 0.09]], 2).is_ok());
        assert!(validate_covariance(&array![[-0.04, 0.0], [0.0, 0.09]], 2).is_err());
        assert!(validate_covariance(&array![[0.04, f64::NAN], [f64::NAN, 0.09]], 2).is_err());
    }

    #[test]
    fn test_probability_bounds() {
        assert!(require_probability(0.05).is_ok());
        assert!(require_probability(0.0).is_err());
        assert!(require_probability(1.0).is_err());
        assert!(require_probability(f64::NAN).is_err());
    }
}
