use super::repository::{DealPosition, PositionBook};
use crate::types::{AssetInput, Constraint, OptimizationObjective, OptimizationRequest, matrix_from_rows};
use anyhow::{Context, Result, ensure};
use log::debug;
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: f64 = 365.0;

/// Return/risk profile of a single deal under a binary close-or-break outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealAnalysis {
    pub deal_id: String,
    /// (offer - price) / price
    pub gross_spread: f64,
    /// (break - price) / price, negative when a break loses money
    pub downside: f64,
    pub annualization_factor: f64,
    pub expected_return: f64,
    /// Annualized variance of the two-outcome return
    pub variance: f64,
}

/// Turns deal terms into optimizer inputs
#[derive(Debug, Clone, Default)]
pub struct ArbitrageAnalysisService;

impl ArbitrageAnalysisService {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, position: &DealPosition) -> Result<DealAnalysis> {
        ensure!(
            position.current_price > 0.0 && position.current_price.is_finite(),
            "deal {}: current price must be positive",
            position.id
        );
        ensure!(
            position.offer_price.is_finite() && position.break_price.is_finite(),
            "deal {}: offer and break prices must be finite",
            position.id
        );
        ensure!(
            (0.0..=1.0).contains(&position.completion_probability),
            "deal {}: completion probability {} outside [0, 1]",
            position.id,
            position.completion_probability
        );
        ensure!(
            position.days_to_close > 0,
            "deal {}: days to close must be positive",
            position.id
        );

        let p = position.completion_probability;
        let gross_spread = (position.offer_price - position.current_price) / position.current_price;
        let downside = (position.break_price - position.current_price) / position.current_price;
        let annualization_factor = DAYS_PER_YEAR / position.days_to_close as f64;

        let expected_return = (p * gross_spread + (1.0 - p) * downside) * annualization_factor;
        let variance = p * (1.0 - p) * (gross_spread - downside).powi(2) * annualization_factor;

        debug!(
            "Deal {}: spread {:.4}, downside {:.4}, expected return {:.4}, variance {:.6}",
            position.id, gross_spread, downside, expected_return, variance
        );

        Ok(DealAnalysis {
            deal_id: position.id.clone(),
            gross_spread,
            downside,
            annualization_factor,
            expected_return,
            variance,
        })
    }

    pub fn to_asset_input(&self, position: &DealPosition) -> Result<AssetInput> {
        let analysis = self.analyze(position)?;
        let asset = AssetInput::new(position.id.clone(), analysis.expected_return, analysis.variance);
        Ok(match &position.sector {
            Some(sector) => asset.with_sector(sector.clone()),
            None => asset,
        })
    }

    /// Optimization request for every position in the book, in book order
    pub fn build_request(
        &self,
        book: &PositionBook,
        objective: OptimizationObjective,
        constraints: Vec<Constraint>,
    ) -> Result<OptimizationRequest> {
        ensure!(!book.positions.is_empty(), "position book is empty");

        let assets = book
            .positions
            .iter()
            .map(|p| self.to_asset_input(p))
            .collect::<Result<Vec<_>>>()?;

        let mut request = OptimizationRequest::from_assets(&assets)
            .with_objective(objective)
            .with_constraints(constraints)
            .with_capital(book.available_capital);

        if let Some(rows) = &book.correlation_matrix {
            let correlation =
                matrix_from_rows(rows).context("position book has a malformed correlation matrix")?;
            request = request.with_correlation(correlation);
        }

        Ok(request)
    }
}
