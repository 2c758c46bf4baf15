//! Domain logic: feature pipeline, signal models, order policy, account
//! ledger, backtest engines, evaluation, and the daily orchestrator.

pub mod error;
pub mod bar;
pub mod features;
pub mod scaler;
pub mod score;
pub mod model;
pub mod policy;
pub mod account;
pub mod fill;
pub mod backtest;
pub mod portfolio_backtest;
pub mod evaluator;
pub mod daily;
pub mod tune;
