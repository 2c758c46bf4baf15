//! End-to-end pipeline tests with deterministic fixture models.
//!
//! Covers the single-ticker walk-forward engine, the portfolio engine,
//! signal evaluation, threshold tuning, and (with the sqlite feature)
//! the full daily run against a seeded in-memory store.

mod common;

use common::*;
use sigtrader::domain::backtest::{BacktestConfig, run_walk_forward};
use sigtrader::domain::evaluator::{EvalConfig, evaluate};
use sigtrader::domain::features::FEATURE_COLUMNS;
use sigtrader::domain::fill::Side;
use sigtrader::domain::model::{InputShape, ModelSpec, model_from_name};
use sigtrader::domain::policy::{ThresholdGrid, Thresholds};
use sigtrader::domain::portfolio_backtest::{PortfolioConfig, run_portfolio};
use sigtrader::domain::tune::{TuneConfig, tune_grid};

mod walk_forward_pipeline {
    use super::*;

    #[test]
    fn neutral_model_never_trades() {
        let frame = sample_frame("TEST", 300);
        let model = ConstModel::new(0.5);
        let cfg = BacktestConfig::default();
        let result =
            run_walk_forward(&frame, &model, &cfg, &Thresholds::default(), "test").unwrap();

        assert!(result.fills.is_empty());
        assert_eq!(result.report.n_trades, 0);
        assert!((result.report.final_asset - cfg.initial_cash).abs() < 1e-9);
        assert!(!result.equity_curve.is_empty());
    }

    #[test]
    fn scripted_buy_then_sell_round_trip() {
        let frame = sample_frame("TEST", 300);
        let model = ScriptedModel::new(vec![0.9, 0.1]);
        let cfg = BacktestConfig::default();
        let result =
            run_walk_forward(&frame, &model, &cfg, &Thresholds::default(), "test").unwrap();

        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].side, Side::Buy);
        assert_eq!(result.fills[1].side, Side::Sell);
        assert!(result.fills[1].fill_date > result.fills[0].fill_date);
        assert_eq!(result.account.position("TEST").qty, 0);
        assert_eq!(result.report.n_trades, 2);
        // After full liquidation the final asset is pure cash.
        assert!((result.report.final_asset - result.account.cash).abs() < 1e-9);
    }

    #[test]
    fn tiny_account_cannot_afford_one_share() {
        let frame = sample_frame("TEST", 300);
        let model = ConstModel::new(0.9);
        let cfg = BacktestConfig {
            initial_cash: 50.0,
            ..BacktestConfig::default()
        };
        let result =
            run_walk_forward(&frame, &model, &cfg, &Thresholds::default(), "test").unwrap();

        assert!(result.fills.is_empty());
        assert!((result.report.final_asset - 50.0).abs() < 1e-9);
    }

    #[test]
    fn seeded_model_runs_are_identical() {
        let frame = sample_frame("TEST", 300);
        let cfg = BacktestConfig::default();
        let shape = InputShape {
            seq_len: cfg.seq_len,
            n_features: FEATURE_COLUMNS.len(),
        };

        let mut runs = Vec::new();
        for _ in 0..2 {
            let mut model = model_from_name("tcn", ModelSpec::default()).unwrap();
            model.build(shape).unwrap();
            runs.push(
                run_walk_forward(&frame, model.as_ref(), &cfg, &Thresholds::default(), "test")
                    .unwrap(),
            );
        }

        assert_eq!(runs[0].fills, runs[1].fills);
        assert_eq!(runs[0].equity_curve.len(), runs[1].equity_curve.len());
        for (a, b) in runs[0].equity_curve.iter().zip(&runs[1].equity_curve) {
            assert_eq!(a.date, b.date);
            assert!((a.total_asset - b.total_asset).abs() < 1e-12);
        }
    }
}

mod portfolio_pipeline {
    use super::*;

    #[test]
    fn top_k_caps_simultaneous_positions() {
        let frames = vec![
            sample_frame("AAA", 300),
            sample_frame("BBB", 300),
            sample_frame("CCC", 300),
        ];
        let model = ConstModel::new(0.9);
        let cfg = PortfolioConfig {
            top_k: 2,
            ..PortfolioConfig::default()
        };
        let grid = ThresholdGrid::uniform(Thresholds::default());
        let result = run_portfolio(&frames, &model, &cfg, &grid, "test").unwrap();

        assert!(result.errors.is_empty());
        assert!(!result.fills.is_empty());
        // Equal scores break ties by ticker, so CCC never makes the cut.
        assert!(result.fills.iter().all(|f| f.ticker != "CCC"));
        assert_eq!(result.report.n_trades, result.fills.len());
        assert!(result.report.final_asset > 0.0);
    }

    #[test]
    fn neutral_portfolio_holds_cash() {
        let frames = vec![sample_frame("AAA", 300), sample_frame("BBB", 300)];
        let model = ConstModel::new(0.5);
        let cfg = PortfolioConfig::default();
        let grid = ThresholdGrid::uniform(Thresholds::default());
        let result = run_portfolio(&frames, &model, &cfg, &grid, "test").unwrap();

        assert!(result.fills.is_empty());
        assert!((result.report.final_asset - cfg.initial_cash).abs() < 1e-9);
    }
}

mod signal_evaluation {
    use super::*;

    #[test]
    fn always_buy_model_has_no_negative_predictions() {
        let frame = sample_frame("TEST", 300);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.9);
        let eval = evaluate(&frame, &model, &scaler, &EvalConfig::default()).unwrap();

        assert!(eval.samples > 0);
        assert_eq!(eval.confusion.total(), eval.samples);
        assert_eq!(eval.confusion.tn, 0);
        assert_eq!(eval.confusion.fn_, 0);
        // Every sample is a BUY, so the conditional mean is the mean.
        assert!((eval.avg_return_on_buy - eval.avg_return_all).abs() < 1e-12);
    }
}

mod threshold_tuning {
    use super::*;

    #[test]
    fn tuned_grid_persists_and_reloads() {
        let frames = vec![sample_frame("TEST", 300)];
        let model = ConstModel::new(0.5);
        let cfg = TuneConfig::default();
        let (grid, outcomes) = tune_grid(&frames, &model, &cfg).unwrap();

        assert_eq!(outcomes.len(), 1);
        // No pair ever trades, so the sweep keeps its first valid pair.
        assert_eq!(outcomes[0].thresholds, grid.get("TEST"));
        assert!((outcomes[0].total_return).abs() < 1e-12);

        let dir = tempfile::tempdir().unwrap();
        grid.save(dir.path()).unwrap();
        assert_eq!(ThresholdGrid::load(dir.path()).unwrap(), grid);
    }
}

#[cfg(feature = "sqlite")]
mod daily_pipeline {
    use super::*;
    use sigtrader::adapters::sqlite_store::SqliteStore;
    use sigtrader::adapters::text_explain::TextExplainAdapter;
    use sigtrader::domain::daily::{DailyConfig, run_daily};
    use sigtrader::domain::fill::Fill;
    use sigtrader::ports::store_port::StorePort;

    fn seeded_store(ticker: &str, n: usize) -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize_schema().unwrap();
        store.insert_bars(&sample_bars(ticker, n)).unwrap();
        store
    }

    fn daily_cfg(ticker: &str) -> DailyConfig {
        DailyConfig {
            tickers: vec![ticker.to_string()],
            lookback: 400,
            ..DailyConfig::default()
        }
    }

    #[test]
    fn neutral_score_writes_nothing_but_persists_cash() {
        let store = seeded_store("AAA", 320);
        let frame = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.5);
        let explain = TextExplainAdapter::new();
        let cfg = daily_cfg("AAA");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        let summary = run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.fills_written, 0);
        assert_eq!(summary.reports_written, 0);
        assert_eq!(store.get_cash("default").unwrap(), Some(cfg.initial_cash));
    }

    #[test]
    fn buy_fill_carries_its_report_id_and_cash() {
        let store = seeded_store("AAA", 320);
        let frame = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.9);
        let explain = TextExplainAdapter::new();
        let cfg = daily_cfg("AAA");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        let summary = run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.fills_written, 1);
        assert_eq!(summary.reports_written, 1);

        let fills = store.fetch_fills("AAA").unwrap();
        assert_eq!(fills.len(), 1);
        let fill = &fills[0];
        assert_eq!(fill.side, Side::Buy);
        assert_eq!(fill.signal, "0.9000");
        assert!(fill.xai_report_id.is_some());
        assert!(fill.position_qty > 0);
        assert_eq!(store.get_cash("default").unwrap(), Some(fill.cash_after));
    }

    #[test]
    fn rerun_with_open_position_does_not_pyramid() {
        let store = seeded_store("AAA", 320);
        let frame = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.9);
        let explain = TextExplainAdapter::new();
        let cfg = daily_cfg("AAA");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();
        let summary = run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();

        assert_eq!(summary.processed, 1);
        assert_eq!(summary.fills_written, 0);
        assert_eq!(store.fetch_fills("AAA").unwrap().len(), 1);
    }

    fn past_fill(ticker: &str, side: Side, price: f64, qty: i64, position_qty: i64) -> Fill {
        let d = date(2023, 6, 1);
        Fill {
            id: None,
            run_id: "seed".into(),
            xai_report_id: None,
            ticker: ticker.into(),
            signal_date: d,
            signal_price: price,
            signal: "0.9000".into(),
            fill_date: d,
            fill_price: price,
            qty,
            side,
            value: price * qty as f64,
            commission: 0.0,
            cash_after: 0.0,
            position_qty,
            avg_price: if position_qty > 0 { price } else { 0.0 },
            pnl_realized: 0.0,
            pnl_unrealized: 0.0,
        }
    }

    #[test]
    fn position_is_replayed_from_the_full_fill_stream() {
        let store = seeded_store("AAA", 320);
        // Round trip whose closing fill carries a stale position snapshot.
        store
            .insert_fills(&[
                past_fill("AAA", Side::Buy, 100.0, 10, 10),
                past_fill("AAA", Side::Sell, 105.0, 10, 10),
            ])
            .unwrap();

        let frame = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.9);
        let explain = TextExplainAdapter::new();
        let cfg = daily_cfg("AAA");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        // Replay nets the round trip to a flat position, so the buy
        // signal opens a new position instead of hitting the cap.
        let summary = run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.fills_written, 1);
        assert_eq!(store.fetch_fills("AAA").unwrap().len(), 3);
    }

    #[test]
    fn inconsistent_fill_history_fails_the_ticker() {
        let store = seeded_store("AAA", 320);
        // A sell with no prior buy cannot be replayed.
        store
            .insert_fills(&[past_fill("AAA", Side::Sell, 100.0, 5, 0)])
            .unwrap();

        let frame = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.9);
        let explain = TextExplainAdapter::new();
        let cfg = daily_cfg("AAA");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        let summary = run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.fills_written, 0);
    }

    #[test]
    fn explanation_outage_still_records_the_fill() {
        let store = seeded_store("AAA", 320);
        let frame = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&frame);
        let model = ConstModel::new(0.9);
        let cfg = daily_cfg("AAA");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        let summary =
            run_daily(&store, Some(&FailingExplain), &model, &scaler, &cfg, &grid).unwrap();
        assert_eq!(summary.fills_written, 1);
        assert_eq!(summary.reports_written, 0);

        let fills = store.fetch_fills("AAA").unwrap();
        assert_eq!(fills[0].xai_report_id, None);
    }

    #[test]
    fn short_history_is_skipped_not_fatal() {
        let store = seeded_store("TINY", 30);
        let big = sample_frame("AAA", 320);
        let scaler = fitted_scaler(&big);
        let model = ConstModel::new(0.9);
        let explain = TextExplainAdapter::new();
        let cfg = daily_cfg("TINY");
        let grid = ThresholdGrid::uniform(Thresholds::default());

        let summary = run_daily(&store, Some(&explain), &model, &scaler, &cfg, &grid).unwrap();
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.processed, 0);
        assert_eq!(summary.fills_written, 0);
    }
}
