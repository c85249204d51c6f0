use anyhow::Result;
use arbitrage_optimizer::config::{AppConfig, OptimizerConfig, RiskConfig};
use arbitrage_optimizer::services::{
    ArbitrageAnalysisService, DealPosition, JsonFileRepository, PortfolioAllocation,
    PortfolioOptimizationService, PositionBook, PositionRepository, RiskManagementService,
};
use arbitrage_optimizer::types::{Constraint, OptimizationObjective, OptimizationStatus};
use mockall::mock;
use mockall::predicate::always;

mock! {
    pub Repository {}

    impl PositionRepository for Repository {
        fn load_book(&self) -> Result<PositionBook>;
        fn save_allocation(&self, allocation: &PortfolioAllocation) -> Result<()>;
    }
}

#[cfg(test)]
mod service_tests {
    use super::*;

    fn position(id: &str, sector: &str, offer: f64, probability: f64, days: u32) -> DealPosition {
        DealPosition {
            id: id.to_string(),
            target: format!("{id}-T"),
            acquirer: Some(format!("{id}-A")),
            sector: Some(sector.to_string()),
            current_price: 30.0,
            offer_price: offer,
            break_price: 24.0,
            completion_probability: probability,
            days_to_close: days,
        }
    }

    fn book() -> PositionBook {
        PositionBook {
            available_capital: 500_000.0,
            positions: vec![
                position("D1", "energy", 31.5, 0.93, 120),
                position("D2", "energy", 33.0, 0.85, 200),
                position("D3", "retail", 31.0, 0.97, 60),
            ],
            correlation_matrix: Some(vec![
                vec![1.0, 0.4, 0.1],
                vec![0.4, 1.0, 0.1],
                vec![0.1, 0.1, 1.0],
            ]),
            return_history: Some(vec![0.002, -0.001, 0.003, 0.001, -0.004, 0.002]),
        }
    }

    #[test]
    fn test_sector_capped_allocation_is_persisted() -> Result<()> {
        let mut repository = MockRepository::new();
        repository.expect_load_book().times(1).returning(|| Ok(book()));
        repository
            .expect_save_allocation()
            .with(always())
            .times(1)
            .returning(|_| Ok(()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let allocation = service.optimize(
            Some(OptimizationObjective::ReturnMaximization),
            vec![Constraint::MaxSectorExposure(0.7)],
        )?;

        assert_eq!(allocation.status, OptimizationStatus::Success);
        assert!(allocation.constraints_satisfied, "{:?}", allocation.warnings);
        let energy: f64 = allocation.allocations[..2].iter().map(|a| a.weight).sum();
        assert!(energy <= 0.7 + 1e-6);
        assert_eq!(allocation.total_capital, 500_000.0);
        assert!(allocation.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn test_infeasible_request_is_saved_as_fallback() -> Result<()> {
        let mut repository = MockRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));
        repository
            .expect_save_allocation()
            .withf(|allocation| allocation.status == OptimizationStatus::FallbackEqualWeight)
            .times(1)
            .returning(|_| Ok(()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let allocation = service.optimize(None, vec![Constraint::MaxWeight(0.1)])?;
        assert!(!allocation.constraints_satisfied);
        assert!(!allocation.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn test_save_failure_is_reported() {
        let mut repository = MockRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));
        repository
            .expect_save_allocation()
            .returning(|_| Err(anyhow::anyhow!("read-only store")));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        assert!(service.optimize(None, vec![]).is_err());
    }

    #[tokio::test]
    async fn test_timeout_wrapper_matches_sync_result() -> Result<()> {
        let mut repository = MockRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));
        repository.expect_save_allocation().returning(|_| Ok(()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let sync = service.optimize(Some(OptimizationObjective::RiskMinimization), vec![])?;
        let timed = service
            .optimize_with_timeout(Some(OptimizationObjective::RiskMinimization), vec![])
            .await?;

        for (a, b) in sync.allocations.iter().zip(&timed.allocations) {
            assert_eq!(a.deal_id, b.deal_id);
            assert!((a.weight - b.weight).abs() < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_frontier_from_stored_book() -> Result<()> {
        let mut repository = MockRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let frontier = service.efficient_frontier(&[])?;
        assert!(!frontier.is_empty());
        assert!(frontier.len() <= 20);
        Ok(())
    }

    #[test]
    fn test_risk_report_for_optimized_book() -> Result<()> {
        let book = book();
        let analysis = ArbitrageAnalysisService::new();
        let d3 = analysis.analyze(&book.positions[2])?;
        // Short, near-certain deal: small spread annualizes into the best expected return
        assert!(d3.annualization_factor > 6.0);

        let report = RiskManagementService::new(RiskConfig::default())
            .assess(&book, &[0.3, 0.3, 0.4])?;
        let total: f64 = report.decomposition.percentage_contributions.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert!(report.metrics.is_some());
        assert_eq!(report.stress_results.len(), 3);
        Ok(())
    }

    #[test]
    fn test_certain_deal_falls_back_instead_of_unbounded_sharpe() -> Result<()> {
        let certain_book = PositionBook {
            available_capital: 100_000.0,
            positions: vec![
                position("SURE", "energy", 31.5, 1.0, 120),
                position("RISKY", "retail", 33.0, 0.8, 200),
            ],
            correlation_matrix: None,
            return_history: None,
        };
        let mut repository = MockRepository::new();
        repository
            .expect_load_book()
            .returning(move || Ok(certain_book.clone()));
        repository.expect_save_allocation().returning(|_| Ok(()));

        let service = PortfolioOptimizationService::new(repository, AppConfig::default());
        let allocation = service.optimize(Some(OptimizationObjective::SharpeRatio), vec![])?;

        assert_eq!(allocation.status, OptimizationStatus::FallbackEqualWeight);
        assert!(allocation.sharpe_ratio.is_finite() && allocation.sharpe_ratio < 100.0);
        assert!(allocation.warnings.iter().any(|w| w.contains("unbounded")));
        Ok(())
    }

    #[test]
    fn test_failed_allocation_gets_no_risk_report() -> Result<()> {
        let mut repository = MockRepository::new();
        repository.expect_load_book().returning(|| Ok(book()));
        repository.expect_save_allocation().returning(|_| Ok(()));

        let mut config = AppConfig::default();
        config.optimizer = OptimizerConfig {
            fallback_to_equal_weight: false,
            ..OptimizerConfig::default()
        };
        let service = PortfolioOptimizationService::new(repository, config);
        let allocation = service.optimize(None, vec![Constraint::MaxWeight(0.1)])?;
        assert_eq!(allocation.status, OptimizationStatus::Failed);

        let risk = RiskManagementService::new(RiskConfig::default());
        assert!(risk.assess_allocation(&book(), &allocation)?.is_none());

        let healthy = PortfolioOptimizationService::new(
            {
                let mut repository = MockRepository::new();
                repository.expect_load_book().returning(|| Ok(book()));
                repository.expect_save_allocation().returning(|_| Ok(()));
                repository
            },
            AppConfig::default(),
        )
        .optimize(None, vec![])?;
        assert!(risk.assess_allocation(&book(), &healthy)?.is_some());
        Ok(())
    }

    #[test]
    fn test_json_repository_reads_sample_book() -> Result<()> {
        let repository = JsonFileRepository::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/data/sample_positions.json"
        ));
        let book = repository.load_book()?;
        assert_eq!(book.positions.len(), 4);
        assert!(book.correlation_matrix.is_some());

        let request = ArbitrageAnalysisService::new().build_request(
            &book,
            OptimizationObjective::SharpeRatio,
            vec![],
        )?;
        assert_eq!(request.num_assets(), 4);
        Ok(())
    }
}
