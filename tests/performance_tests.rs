use anyhow::Result;
use arbitrage_optimizer::config::PerformanceConfig;
use arbitrage_optimizer::performance::PerformanceAnalyzer;

#[cfg(test)]
mod performance_tests {
    use super::*;

    fn year_of_returns() -> Vec<f64> {
        (0..300)
            .map(|i| match i % 10 {
                0 => -0.006,
                3 => -0.002,
                _ => 0.0012 + (i % 4) as f64 * 0.0001,
            })
            .collect()
    }

    #[test]
    fn test_metrics_on_a_year_of_returns() -> Result<()> {
        let analyzer = PerformanceAnalyzer::default();
        let returns = year_of_returns();
        let metrics = analyzer.calculate_performance_metrics(&returns, None)?;

        assert_eq!(metrics.periods, 300);
        assert!(metrics.annualized_return > 0.0);
        assert!(metrics.volatility > 0.0);
        assert!(metrics.sortino_ratio.is_finite());
        assert!(metrics.max_drawdown > 0.0 && metrics.max_drawdown < 0.01);
        assert!((metrics.win_rate - 0.8).abs() < 1e-12);
        assert!(metrics.profit_factor > 1.0);
        assert!(metrics.var_95 <= 0.0);
        assert!(metrics.expected_shortfall_95 <= metrics.var_95);
        assert!(metrics.calmar_ratio > 0.0);
        Ok(())
    }

    #[test]
    fn test_periods_per_year_is_configurable() -> Result<()> {
        let monthly = PerformanceAnalyzer::new(PerformanceConfig {
            periods_per_year: 12.0,
            ..PerformanceConfig::default()
        });
        let metrics = monthly.calculate_performance_metrics(&[0.01, 0.02, -0.01, 0.02], None)?;
        assert!((metrics.annualized_return - 0.01 * 12.0).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_outperforming_benchmark_has_positive_information_ratio() -> Result<()> {
        let analyzer = PerformanceAnalyzer::default();
        let benchmark = year_of_returns();
        let portfolio: Vec<f64> = benchmark
            .iter()
            .enumerate()
            .map(|(i, b)| b + if i % 2 == 0 { 0.0004 } else { 0.0 })
            .collect();

        let relative = analyzer
            .calculate_performance_metrics(&portfolio, Some(&benchmark))?
            .benchmark
            .expect("benchmark metrics for equal-length series");
        assert!(relative.information_ratio > 0.0);
        assert!(relative.alpha > 0.0);
        assert!((relative.beta - 1.0).abs() < 0.1);
        Ok(())
    }

    #[test]
    fn test_rolling_analysis_matches_full_window() -> Result<()> {
        let analyzer = PerformanceAnalyzer::default();
        let returns = year_of_returns();
        let rolling = analyzer.rolling_performance_analysis(&returns, Some(300), None)?;
        let full = analyzer.calculate_performance_metrics(&returns, None)?;

        assert_eq!(rolling.len(), 1);
        assert!((rolling.annualized_returns[0] - full.annualized_return).abs() < 1e-12);
        assert!((rolling.sharpe_ratios[0] - full.sharpe_ratio).abs() < 1e-12);
        assert!((rolling.max_drawdowns[0] - full.max_drawdown).abs() < 1e-12);

        let default_window = analyzer.rolling_performance_analysis(&returns, None, None)?;
        assert_eq!(default_window.len(), 300 - 252 + 1);
        Ok(())
    }

    #[test]
    fn test_rolling_rejects_mismatched_benchmark() {
        let analyzer = PerformanceAnalyzer::default();
        let returns = year_of_returns();
        assert!(
            analyzer
                .rolling_performance_analysis(&returns, Some(20), Some(&returns[..100]))
                .is_err()
        );
    }

    #[test]
    fn test_attribution_over_rebalanced_book() -> Result<()> {
        let analyzer = PerformanceAnalyzer::default();
        let weights = vec![
            vec![0.5, 0.3, 0.2],
            vec![0.4, 0.4, 0.2],
            vec![0.3, 0.4, 0.3],
        ];
        let returns = vec![
            vec![0.010, -0.004, 0.002],
            vec![0.006, 0.008, -0.010],
            vec![-0.002, 0.005, 0.004],
        ];

        let result = analyzer.attribution_analysis(&weights, &returns, None, None)?;
        let effects = result.allocation_effect + result.selection_effect + result.interaction_effect;
        assert!((effects - result.total_active_return).abs() < 1e-12);
        assert_eq!(result.asset_effects.len(), 3);
        assert_eq!(result.periods, 3);
        Ok(())
    }
}
