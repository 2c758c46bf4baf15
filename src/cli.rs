//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::csv_bars::CsvBars;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::text_explain::TextExplainAdapter;
use crate::domain::backtest::{BacktestConfig, run_walk_forward};
use crate::domain::bar::Bar;
use crate::domain::daily::{DailyConfig, Mode, run_daily};
use crate::domain::error::SigtraderError;
use crate::domain::evaluator::{EvalConfig, evaluate_many};
use crate::domain::features::{FEATURE_COLUMNS, FeatureFrame, build_features};
use crate::domain::model::{
    InputShape, ModelSpec, SignalModel, load_artifact, load_model, model_from_name, save_artifact,
};
use crate::domain::policy::{THRESHOLDS_FILE, ThresholdGrid, Thresholds};
use crate::domain::portfolio_backtest::{PortfolioConfig, run_portfolio};
use crate::domain::scaler::MinMaxScaler;
use crate::domain::score::CompositeRule;
use crate::domain::tune::{TuneConfig, tune_grid};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::StorePort;

#[derive(Parser, Debug)]
#[command(name = "sigtrader", about = "Model-driven daily trading pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the daily decision pipeline for the configured tickers
    Daily {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated ticker override
        #[arg(long)]
        tickers: Option<String>,
        /// simulation or live
        #[arg(long)]
        mode: Option<String>,
        /// Skip explanation reports
        #[arg(long)]
        no_xai: bool,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Walk-forward backtest for a single ticker
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        ticker: String,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Multi-ticker portfolio backtest
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        tickers: Option<String>,
    },
    /// Score signal quality against realized forward returns over a
    /// held-out window, aggregated across tickers
    Evaluate {
        #[arg(short, long)]
        config: PathBuf,
        /// Comma-separated ticker override
        #[arg(long)]
        tickers: Option<String>,
        /// First scored date (earlier bars remain warmup history)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last scored date
        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Grid-search per-ticker buy/sell thresholds
    Tune {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        tickers: Option<String>,
    },
    /// Create a fresh model artifact (seeded weights plus a scaler
    /// fitted on the configured tickers' history)
    InitModel {
        #[arg(short, long)]
        config: PathBuf,
        /// Model variant override
        #[arg(long)]
        name: Option<String>,
    },
    /// Show artifact and data status
    Info {
        #[arg(short, long)]
        config: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Daily {
            config,
            tickers,
            mode,
            no_xai,
            run_id,
        } => run_daily_cmd(
            &config,
            tickers.as_deref(),
            mode.as_deref(),
            no_xai,
            run_id.as_deref(),
        ),
        Command::Backtest {
            config,
            ticker,
            start,
            end,
        } => run_backtest_cmd(&config, &ticker, start, end),
        Command::Portfolio { config, tickers } => run_portfolio_cmd(&config, tickers.as_deref()),
        Command::Evaluate {
            config,
            tickers,
            start,
            end,
        } => run_evaluate_cmd(&config, tickers.as_deref(), start, end),
        Command::Tune { config, tickers } => run_tune_cmd(&config, tickers.as_deref()),
        Command::InitModel { config, name } => run_init_model_cmd(&config, name.as_deref()),
        Command::Info { config } => run_info_cmd(&config),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| {
        let err = SigtraderError::ConfigParse {
            file: path.display().to_string(),
            reason: e.to_string(),
        };
        fail(&err)
    })
}

fn fail(err: &SigtraderError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(err)
}

fn open_store(config: &dyn ConfigPort) -> Result<Box<dyn StorePort>, SigtraderError> {
    #[cfg(feature = "postgres")]
    {
        use crate::adapters::postgres_store::PostgresStore;
        if config.get_string("database", "conninfo").is_some()
            || crate::ports::config_port::env_override(config, "DB_URL").is_some()
        {
            let store = PostgresStore::from_config(config)?;
            store.initialize_schema()?;
            return Ok(Box::new(store));
        }
    }
    #[cfg(feature = "sqlite")]
    {
        use crate::adapters::sqlite_store::SqliteStore;
        let store = SqliteStore::from_config(config)?;
        store.initialize_schema()?;
        return Ok(Box::new(store));
    }
    #[allow(unreachable_code)]
    Err(SigtraderError::ConfigMissing {
        section: "sqlite".into(),
        key: "path".into(),
    })
}

fn artifact_dir(config: &dyn ConfigPort) -> Result<PathBuf, SigtraderError> {
    config
        .get_string("model", "dir")
        .map(PathBuf::from)
        .ok_or_else(|| SigtraderError::ConfigMissing {
            section: "model".into(),
            key: "dir".into(),
        })
}

fn composite_from_config(config: &dyn ConfigPort) -> Result<CompositeRule, SigtraderError> {
    match config
        .get_string("model", "composite")
        .as_deref()
        .unwrap_or("mid_long_mean")
    {
        "mid_long_mean" => Ok(CompositeRule::MidLongMean),
        "mean" => Ok(CompositeRule::Mean),
        "weighted" => {
            let raw = config
                .get_string("model", "composite_weights")
                .ok_or_else(|| SigtraderError::ConfigMissing {
                    section: "model".into(),
                    key: "composite_weights".into(),
                })?;
            let weights = parse_float_list(&raw, "model", "composite_weights")?;
            Ok(CompositeRule::Weighted(weights))
        }
        other => Err(SigtraderError::ConfigInvalid {
            section: "model".into(),
            key: "composite".into(),
            reason: format!("unknown rule {other:?}"),
        }),
    }
}

fn model_spec_from_config(config: &dyn ConfigPort) -> Result<ModelSpec, SigtraderError> {
    let defaults = ModelSpec::default();
    Ok(ModelSpec {
        d_model: config.get_int("model", "d_model", defaults.d_model as i64) as usize,
        seed: config.get_int("model", "seed", defaults.seed as i64) as u64,
        multi_horizon: config.get_bool("model", "multi_horizon", defaults.multi_horizon),
        composite: composite_from_config(config)?,
        ticker_vocab: config.get_int("model", "ticker_vocab", 0) as usize,
        sector_vocab: config.get_int("model", "sector_vocab", 0) as usize,
        embed_dim: config.get_int("model", "embed_dim", defaults.embed_dim as i64) as usize,
        epochs: config.get_int("model", "epochs", defaults.epochs as i64) as usize,
        lr: config.get_double("model", "lr", defaults.lr),
    })
}

fn thresholds_from_config(config: &dyn ConfigPort) -> Result<Thresholds, SigtraderError> {
    let defaults = Thresholds::default();
    Thresholds::new(
        config.get_double("trading", "buy_threshold", defaults.buy),
        config.get_double("trading", "sell_threshold", defaults.sell),
    )
}

/// Tuned grid from the artifact dir when present, else a uniform grid
/// from the config thresholds.
fn threshold_grid(
    config: &dyn ConfigPort,
    dir: &std::path::Path,
) -> Result<ThresholdGrid, SigtraderError> {
    let default = thresholds_from_config(config)?;
    if dir.join(THRESHOLDS_FILE).exists() {
        let mut grid = ThresholdGrid::load(dir)?;
        grid.default = default;
        Ok(grid)
    } else {
        Ok(ThresholdGrid::uniform(default))
    }
}

fn parse_ticker_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn tickers_from(
    config: &dyn ConfigPort,
    cli_override: Option<&str>,
) -> Result<Vec<String>, SigtraderError> {
    let raw = match cli_override {
        Some(s) => s.to_string(),
        None => {
            config
                .get_string("daily", "tickers")
                .ok_or_else(|| SigtraderError::ConfigMissing {
                    section: "daily".into(),
                    key: "tickers".into(),
                })?
        }
    };
    let tickers = parse_ticker_list(&raw);
    if tickers.is_empty() {
        return Err(SigtraderError::ConfigInvalid {
            section: "daily".into(),
            key: "tickers".into(),
            reason: "empty ticker list".into(),
        });
    }
    Ok(tickers)
}

fn parse_float_list(raw: &str, section: &str, key: &str) -> Result<Vec<f64>, SigtraderError> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|_| SigtraderError::ConfigInvalid {
                section: section.into(),
                key: key.into(),
                reason: format!("not a number: {s:?}"),
            })
        })
        .collect()
}

fn date_from_config(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<Option<NaiveDate>, SigtraderError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SigtraderError::ConfigInvalid {
                section: section.into(),
                key: key.into(),
                reason: format!("not a date (YYYY-MM-DD): {raw:?}"),
            }),
    }
}

fn build_backtest_config(config: &dyn ConfigPort) -> Result<BacktestConfig, SigtraderError> {
    let defaults = BacktestConfig::default();
    Ok(BacktestConfig {
        seq_len: config.get_int("model", "seq_len", defaults.seq_len as i64) as usize,
        initial_cash: config.get_double("trading", "initial_cash", defaults.initial_cash),
        commission_rate: config.get_double("trading", "commission_rate", defaults.commission_rate),
        risk_frac: config.get_double("trading", "risk_frac", defaults.risk_frac),
        max_positions_per_ticker: config.get_int(
            "trading",
            "max_positions_per_ticker",
            defaults.max_positions_per_ticker as i64,
        ) as u32,
        composite: composite_from_config(config)?,
    })
}

/// Where backtest-style commands read their bars from: the configured
/// CSV directory when set, else the store.
enum BarSource {
    Csv(CsvBars),
    Store(Box<dyn StorePort>),
}

impl BarSource {
    fn from_config(config: &dyn ConfigPort) -> Result<Self, SigtraderError> {
        match config.get_string("backtest", "csv_dir") {
            Some(csv_dir) => Ok(BarSource::Csv(CsvBars::new(PathBuf::from(csv_dir)))),
            None => Ok(BarSource::Store(open_store(config)?)),
        }
    }

    fn fetch(
        &self,
        ticker: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, SigtraderError> {
        let start = start.unwrap_or(NaiveDate::from_ymd_opt(1900, 1, 1).unwrap_or(NaiveDate::MIN));
        let end = end.unwrap_or(NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX));
        match self {
            BarSource::Csv(csv) => csv.read_range(ticker, start, end),
            BarSource::Store(store) => store.fetch_bars(ticker, start, end),
        }
    }
}

fn load_frames(
    config: &dyn ConfigPort,
    tickers: &[String],
) -> Result<Vec<FeatureFrame>, SigtraderError> {
    let source = BarSource::from_config(config)?;
    let mut frames = Vec::with_capacity(tickers.len());
    for ticker in tickers {
        let bars = source.fetch(ticker, None, None)?;
        frames.push(build_features(&bars)?);
    }
    Ok(frames)
}

fn print_report(report: &crate::domain::backtest::BacktestReport) {
    println!("final asset:   {:.2}", report.final_asset);
    println!("total return:  {:.2}%", report.total_return * 100.0);
    println!("max drawdown:  {:.2}%", report.max_drawdown * 100.0);
    println!("sharpe:        {:.3}", report.sharpe);
    println!("trades:        {}", report.n_trades);
}

fn run_daily_cmd(
    config_path: &PathBuf,
    tickers: Option<&str>,
    mode: Option<&str>,
    no_xai: bool,
    run_id: Option<&str>,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), SigtraderError> {
        let dir = artifact_dir(&config)?;
        let (model, scaler) = load_artifact(&dir)?;
        let grid = threshold_grid(&config, &dir)?;
        let store = open_store(&config)?;

        let mode = match mode
            .map(str::to_string)
            .or_else(|| config.get_string("daily", "mode"))
            .as_deref()
            .unwrap_or("simulation")
        {
            "simulation" => Mode::Simulation,
            "live" => Mode::Live,
            other => {
                return Err(SigtraderError::ConfigInvalid {
                    section: "daily".into(),
                    key: "mode".into(),
                    reason: format!("unknown mode {other:?}"),
                });
            }
        };

        let defaults = DailyConfig::default();
        let daily_cfg = DailyConfig {
            tickers: tickers_from(&config, tickers)?,
            lookback: config.get_int("daily", "lookback", defaults.lookback as i64) as usize,
            seq_len: config.get_int("model", "seq_len", defaults.seq_len as i64) as usize,
            commission_rate: config.get_double(
                "trading",
                "commission_rate",
                defaults.commission_rate,
            ),
            risk_frac: config.get_double("trading", "risk_frac", defaults.risk_frac),
            max_positions_per_ticker: config.get_int(
                "trading",
                "max_positions_per_ticker",
                defaults.max_positions_per_ticker as i64,
            ) as u32,
            xai: !no_xai && config.get_bool("daily", "xai", defaults.xai),
            run_id: run_id
                .map(str::to_string)
                .or_else(|| config.get_string("daily", "run_id"))
                .unwrap_or(defaults.run_id),
            mode,
            account_id: config
                .get_string("daily", "account_id")
                .unwrap_or(defaults.account_id),
            initial_cash: config.get_double("trading", "initial_cash", defaults.initial_cash),
            composite: composite_from_config(&config)?,
        };

        let explain = TextExplainAdapter::new();
        let summary = run_daily(
            store.as_ref(),
            Some(&explain),
            model.as_ref(),
            &scaler,
            &daily_cfg,
            &grid,
        )?;
        println!(
            "daily run complete: {} processed, {} skipped, {} failed, {} fills, {} reports",
            summary.processed,
            summary.skipped,
            summary.failed,
            summary.fills_written,
            summary.reports_written
        );
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_backtest_cmd(
    config_path: &PathBuf,
    ticker: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), SigtraderError> {
        let dir = artifact_dir(&config)?;
        let model = load_model(&dir)?;
        let bt_config = build_backtest_config(&config)?;
        let thresholds = thresholds_from_config(&config)?;

        let bars = BarSource::from_config(&config)?.fetch(ticker, start, end)?;
        eprintln!("[backtest] {ticker}: {} bars loaded", bars.len());
        let frame = build_features(&bars)?;

        let result = run_walk_forward(&frame, model.as_ref(), &bt_config, &thresholds, "backtest")?;
        println!("backtest {} ({} bars):", result.ticker, frame.len());
        print_report(&result.report);
        for fill in &result.fills {
            println!(
                "  {} {} {:>5} @ {:>10.2} score={} cash={:.2}",
                fill.fill_date,
                fill.side.as_str(),
                fill.qty,
                fill.fill_price,
                fill.signal,
                fill.cash_after
            );
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_portfolio_cmd(config_path: &PathBuf, tickers: Option<&str>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), SigtraderError> {
        let dir = artifact_dir(&config)?;
        let model = load_model(&dir)?;
        let grid = threshold_grid(&config, &dir)?;
        let tickers = tickers_from(&config, tickers)?;
        let frames = load_frames(&config, &tickers)?;

        let defaults = PortfolioConfig::default();
        let pf_config = PortfolioConfig {
            seq_len: config.get_int("model", "seq_len", defaults.seq_len as i64) as usize,
            initial_cash: config.get_double("trading", "initial_cash", defaults.initial_cash),
            commission_rate: config.get_double(
                "trading",
                "commission_rate",
                defaults.commission_rate,
            ),
            top_k: config.get_int("portfolio", "top_k", defaults.top_k as i64) as usize,
            rebalance_band: config.get_double(
                "portfolio",
                "rebalance_band",
                defaults.rebalance_band,
            ),
            composite: composite_from_config(&config)?,
        };

        let result = run_portfolio(&frames, model.as_ref(), &pf_config, &grid, "portfolio")?;
        println!("portfolio backtest over {} tickers:", tickers.len());
        print_report(&result.report);
        for (ticker, date, reason) in &result.errors {
            eprintln!("[portfolio] {ticker} {date} skipped: {reason}");
        }
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_evaluate_cmd(
    config_path: &PathBuf,
    tickers: Option<&str>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), SigtraderError> {
        let dir = artifact_dir(&config)?;
        let (model, scaler) = load_artifact(&dir)?;

        let defaults = EvalConfig::default();
        let eval_config = EvalConfig {
            seq_len: config.get_int("model", "seq_len", defaults.seq_len as i64) as usize,
            horizon: config.get_int("evaluate", "horizon", defaults.horizon as i64) as usize,
            theta: config.get_double("evaluate", "theta", defaults.theta),
            buy_threshold: config.get_double(
                "trading",
                "buy_threshold",
                defaults.buy_threshold,
            ),
            composite: composite_from_config(&config)?,
            start: match start {
                Some(d) => Some(d),
                None => date_from_config(&config, "evaluate", "start")?,
            },
            end: match end {
                Some(d) => Some(d),
                None => date_from_config(&config, "evaluate", "end")?,
            },
        };

        let tickers = tickers_from(&config, tickers)?;
        let frames = load_frames(&config, &tickers)?;
        let eval = evaluate_many(&frames, model.as_ref(), &scaler, &eval_config)?;

        println!("evaluation {} ({} samples):", eval.ticker, eval.samples);
        println!(
            "confusion:     tp={} fp={} tn={} fn={}",
            eval.confusion.tp, eval.confusion.fp, eval.confusion.tn, eval.confusion.fn_
        );
        println!("accuracy:      {:.4}", eval.accuracy);
        println!("hit rate:      {:.4}", eval.hit_rate);
        println!("avg ret (buy): {:.4}%", eval.avg_return_on_buy * 100.0);
        println!("avg ret (all): {:.4}%", eval.avg_return_all * 100.0);
        println!("profit factor: {:.3}", eval.profit_factor);
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_tune_cmd(config_path: &PathBuf, tickers: Option<&str>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), SigtraderError> {
        let dir = artifact_dir(&config)?;
        let model = load_model(&dir)?;
        let tickers = tickers_from(&config, tickers)?;
        let frames = load_frames(&config, &tickers)?;

        let defaults = TuneConfig::default();
        let tune_config = TuneConfig {
            buy_grid: match config.get_string("tune", "buy_grid") {
                Some(raw) => parse_float_list(&raw, "tune", "buy_grid")?,
                None => defaults.buy_grid,
            },
            sell_grid: match config.get_string("tune", "sell_grid") {
                Some(raw) => parse_float_list(&raw, "tune", "sell_grid")?,
                None => defaults.sell_grid,
            },
            backtest: build_backtest_config(&config)?,
        };

        let (mut grid, outcomes) = tune_grid(&frames, model.as_ref(), &tune_config)?;
        grid.default = thresholds_from_config(&config)?;
        grid.save(&dir)?;

        for outcome in &outcomes {
            println!(
                "{}: buy={:.2} sell={:.2} return={:.2}% ({} pairs)",
                outcome.ticker,
                outcome.thresholds.buy,
                outcome.thresholds.sell,
                outcome.total_return * 100.0,
                outcome.evaluated
            );
        }
        println!("thresholds written to {}", dir.join(THRESHOLDS_FILE).display());
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_init_model_cmd(config_path: &PathBuf, name: Option<&str>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    let result = (|| -> Result<(), SigtraderError> {
        let dir = artifact_dir(&config)?;
        let name = name
            .map(str::to_string)
            .or_else(|| config.get_string("model", "name"))
            .unwrap_or_else(|| "tcn".to_string());
        let spec = model_spec_from_config(&config)?;
        let seq_len = config.get_int("model", "seq_len", 20) as usize;

        let mut model = model_from_name(&name, spec)?;
        model.build(InputShape {
            seq_len,
            n_features: FEATURE_COLUMNS.len(),
        })?;

        let scaler = fit_scaler_on_history(&config)?;
        save_artifact(model.as_ref(), &scaler, &dir)?;
        println!(
            "initialized {} artifact at {} (scaler over {} rows)",
            model.name(),
            dir.display(),
            scaler.n_rows()
        );
        Ok(())
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

/// Scaler fitted over the valid feature rows of every configured ticker.
fn fit_scaler_on_history(config: &dyn ConfigPort) -> Result<MinMaxScaler, SigtraderError> {
    let tickers = tickers_from(config, None)?;
    let frames = load_frames(config, &tickers)?;
    let columns: Vec<&str> = FEATURE_COLUMNS.to_vec();

    let mut scaler: Option<MinMaxScaler> = None;
    for frame in &frames {
        let valid = frame.data.slice(ndarray::s![frame.valid_from.., ..]);
        match scaler.as_mut() {
            None => scaler = Some(MinMaxScaler::fit(valid, &columns)),
            Some(s) => {
                for row in valid.rows() {
                    s.extend_row(row);
                }
            }
        }
    }
    scaler.ok_or_else(|| SigtraderError::ConfigInvalid {
        section: "daily".into(),
        key: "tickers".into(),
        reason: "no history to fit the scaler on".into(),
    })
}

fn run_info_cmd(config_path: &PathBuf) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(code) => return code,
    };

    println!("sigtrader {}", env!("CARGO_PKG_VERSION"));
    match artifact_dir(&config) {
        Ok(dir) => {
            println!("artifact dir: {}", dir.display());
            match load_model(&dir) {
                Ok(model) => {
                    let shape = model.shape();
                    println!(
                        "model: {} (ready={}, shape={})",
                        model.name(),
                        model.is_ready(),
                        shape
                            .map(|s| format!("{}x{}", s.seq_len, s.n_features))
                            .unwrap_or_else(|| "unbuilt".into())
                    );
                }
                Err(e) => println!("model: unavailable ({e})"),
            }
            match MinMaxScaler::load(&dir) {
                Ok(scaler) => println!("scaler: fitted on {} rows", scaler.n_rows()),
                Err(_) => println!("scaler: missing"),
            }
            if dir.join(THRESHOLDS_FILE).exists() {
                match ThresholdGrid::load(&dir) {
                    Ok(grid) => println!("thresholds: {} tuned tickers", grid.per_ticker.len()),
                    Err(e) => println!("thresholds: unreadable ({e})"),
                }
            }
        }
        Err(_) => println!("artifact dir: not configured"),
    }

    if let Ok(tickers) = tickers_from(&config, None) {
        match open_store(&config) {
            Ok(store) => {
                for ticker in &tickers {
                    match store.latest_bars(ticker, 1) {
                        Ok(bars) => match bars.last() {
                            Some(bar) => println!("{ticker}: last bar {}", bar.date),
                            None => println!("{ticker}: no bars"),
                        },
                        Err(e) => println!("{ticker}: query failed ({e})"),
                    }
                }
            }
            Err(e) => println!("store: unavailable ({e})"),
        }
    }
    ExitCode::SUCCESS
}
