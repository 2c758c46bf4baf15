//! PostgreSQL persistence adapter.
//!
//! Mirrors the SQLite schema with native DATE columns and sequence ids.
//! The client sits behind a RefCell; the pipeline is single-threaded.

use crate::domain::bar::Bar;
use crate::domain::error::SigtraderError;
use crate::domain::fill::{Fill, Report, Side};
use crate::ports::config_port::{ConfigPort, env_override};
use crate::ports::store_port::StorePort;
use chrono::NaiveDate;
use postgres::types::ToSql;
use postgres::{Client, NoTls, Row};
use std::cell::RefCell;

pub struct PostgresStore {
    client: RefCell<Client>,
}

fn store_err(e: postgres::Error) -> SigtraderError {
    SigtraderError::Store {
        reason: e.to_string(),
    }
}

fn query_err(e: postgres::Error) -> SigtraderError {
    SigtraderError::StoreQuery {
        reason: e.to_string(),
    }
}

impl PostgresStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SigtraderError> {
        // [database] conninfo first, then the environment.
        let conninfo = config
            .get_string("database", "conninfo")
            .or_else(|| env_override(config, "DB_URL"))
            .ok_or_else(|| SigtraderError::ConfigMissing {
                section: "database".into(),
                key: "conninfo".into(),
            })?;
        let client = Client::connect(&conninfo, NoTls).map_err(store_err)?;
        Ok(Self {
            client: RefCell::new(client),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), SigtraderError> {
        self.client
            .borrow_mut()
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS price_data (
                    ticker TEXT NOT NULL,
                    date DATE NOT NULL,
                    open DOUBLE PRECISION NOT NULL,
                    high DOUBLE PRECISION NOT NULL,
                    low DOUBLE PRECISION NOT NULL,
                    close DOUBLE PRECISION NOT NULL,
                    volume BIGINT NOT NULL,
                    adj_close DOUBLE PRECISION NOT NULL,
                    PRIMARY KEY (ticker, date)
                );

                CREATE TABLE IF NOT EXISTS xai_reports (
                    id BIGSERIAL PRIMARY KEY,
                    ticker TEXT NOT NULL,
                    signal TEXT NOT NULL,
                    price DOUBLE PRECISION NOT NULL,
                    date TEXT NOT NULL,
                    text TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS executions (
                    id BIGSERIAL PRIMARY KEY,
                    run_id TEXT NOT NULL,
                    xai_report_id BIGINT REFERENCES xai_reports(id),
                    ticker TEXT NOT NULL,
                    signal_date DATE NOT NULL,
                    signal_price DOUBLE PRECISION NOT NULL,
                    signal TEXT NOT NULL,
                    fill_date DATE NOT NULL,
                    fill_price DOUBLE PRECISION NOT NULL,
                    qty BIGINT NOT NULL,
                    side TEXT NOT NULL,
                    value DOUBLE PRECISION NOT NULL,
                    commission DOUBLE PRECISION NOT NULL,
                    cash_after DOUBLE PRECISION NOT NULL,
                    position_qty BIGINT NOT NULL,
                    avg_price DOUBLE PRECISION NOT NULL,
                    pnl_realized DOUBLE PRECISION NOT NULL,
                    pnl_unrealized DOUBLE PRECISION NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_executions_ticker ON executions(ticker);

                CREATE TABLE IF NOT EXISTS assets (
                    account_id TEXT PRIMARY KEY,
                    cash DOUBLE PRECISION NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                );",
            )
            .map_err(query_err)
    }
}

fn bar_from_row(row: &Row) -> Bar {
    Bar {
        ticker: row.get(0),
        date: row.get(1),
        open: row.get(2),
        high: row.get(3),
        low: row.get(4),
        close: row.get(5),
        volume: row.get(6),
        adj_close: row.get(7),
    }
}

fn fill_from_row(row: &Row) -> Result<Fill, SigtraderError> {
    let side: String = row.get(10);
    Ok(Fill {
        id: Some(row.get(0)),
        run_id: row.get(1),
        xai_report_id: row.get(2),
        ticker: row.get(3),
        signal_date: row.get(4),
        signal_price: row.get(5),
        signal: row.get(6),
        fill_date: row.get(7),
        fill_price: row.get(8),
        qty: row.get(9),
        side: Side::parse(&side).ok_or_else(|| SigtraderError::StoreQuery {
            reason: format!("invalid stored side {side:?}"),
        })?,
        value: row.get(11),
        commission: row.get(12),
        cash_after: row.get(13),
        position_qty: row.get(14),
        avg_price: row.get(15),
        pnl_realized: row.get(16),
        pnl_unrealized: row.get(17),
    })
}

const BAR_COLUMNS: &str = "ticker, date, open::double precision, high::double precision, \
     low::double precision, close::double precision, volume::bigint, \
     adj_close::double precision";
const FILL_COLUMNS: &str = "id, run_id, xai_report_id, ticker, signal_date, \
     signal_price::double precision, signal, fill_date, fill_price::double precision, \
     qty::bigint, side, value::double precision, commission::double precision, \
     cash_after::double precision, position_qty::bigint, avg_price::double precision, \
     pnl_realized::double precision, pnl_unrealized::double precision";

impl StorePort for PostgresStore {
    fn insert_bars(&self, bars: &[Bar]) -> Result<usize, SigtraderError> {
        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT INTO price_data (ticker, date, open, high, low, close, volume, adj_close)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (ticker, date) DO UPDATE SET
                     open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low,
                     close = EXCLUDED.close, volume = EXCLUDED.volume,
                     adj_close = EXCLUDED.adj_close",
                &[
                    &bar.ticker,
                    &bar.date,
                    &bar.open,
                    &bar.high,
                    &bar.low,
                    &bar.close,
                    &bar.volume,
                    &bar.adj_close,
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)?;
        Ok(bars.len())
    }

    fn fetch_bars(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, SigtraderError> {
        let query = format!(
            "SELECT {BAR_COLUMNS} FROM price_data
             WHERE ticker = $1 AND date >= $2 AND date <= $3
             ORDER BY date ASC"
        );
        let params: &[&(dyn ToSql + Sync)] = &[&ticker, &start, &end];
        let rows = self
            .client
            .borrow_mut()
            .query(&query, params)
            .map_err(query_err)?;
        Ok(rows.iter().map(bar_from_row).collect())
    }

    fn latest_bars(&self, ticker: &str, limit: usize) -> Result<Vec<Bar>, SigtraderError> {
        let query = format!(
            "SELECT {BAR_COLUMNS} FROM price_data
             WHERE ticker = $1 ORDER BY date DESC LIMIT $2"
        );
        let limit = limit as i64;
        let params: &[&(dyn ToSql + Sync)] = &[&ticker, &limit];
        let rows = self
            .client
            .borrow_mut()
            .query(&query, params)
            .map_err(query_err)?;
        let mut bars: Vec<Bar> = rows.iter().map(bar_from_row).collect();
        bars.reverse();
        Ok(bars)
    }

    fn fetch_fills(&self, ticker: &str) -> Result<Vec<Fill>, SigtraderError> {
        let query = format!(
            "SELECT {FILL_COLUMNS} FROM executions
             WHERE ticker = $1 ORDER BY fill_date ASC, id ASC"
        );
        let rows = self
            .client
            .borrow_mut()
            .query(&query, &[&ticker])
            .map_err(query_err)?;
        rows.iter().map(fill_from_row).collect()
    }

    fn insert_fills(&self, fills: &[Fill]) -> Result<Vec<i64>, SigtraderError> {
        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction().map_err(query_err)?;
        let mut ids = Vec::with_capacity(fills.len());
        for fill in fills {
            let row = tx
                .query_one(
                    "INSERT INTO executions (run_id, xai_report_id, ticker, signal_date,
                         signal_price, signal, fill_date, fill_price, qty, side, value,
                         commission, cash_after, position_qty, avg_price, pnl_realized,
                         pnl_unrealized)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                         $15, $16, $17)
                     RETURNING id",
                    &[
                        &fill.run_id,
                        &fill.xai_report_id,
                        &fill.ticker,
                        &fill.signal_date,
                        &fill.signal_price,
                        &fill.signal,
                        &fill.fill_date,
                        &fill.fill_price,
                        &fill.qty,
                        &fill.side.as_str(),
                        &fill.value,
                        &fill.commission,
                        &fill.cash_after,
                        &fill.position_qty,
                        &fill.avg_price,
                        &fill.pnl_realized,
                        &fill.pnl_unrealized,
                    ],
                )
                .map_err(query_err)?;
            ids.push(row.get(0));
        }
        tx.commit().map_err(query_err)?;
        Ok(ids)
    }

    fn insert_reports(&self, reports: &[Report]) -> Result<Vec<i64>, SigtraderError> {
        let mut client = self.client.borrow_mut();
        let mut tx = client.transaction().map_err(query_err)?;
        let mut ids = Vec::with_capacity(reports.len());
        for report in reports {
            let row = tx
                .query_one(
                    "INSERT INTO xai_reports (ticker, signal, price, date, text)
                     VALUES ($1, $2, $3, $4, $5) RETURNING id",
                    &[
                        &report.ticker,
                        &report.signal,
                        &report.price,
                        &report.date,
                        &report.text,
                    ],
                )
                .map_err(query_err)?;
            ids.push(row.get(0));
        }
        tx.commit().map_err(query_err)?;
        Ok(ids)
    }

    fn get_cash(&self, account_id: &str) -> Result<Option<f64>, SigtraderError> {
        let row = self
            .client
            .borrow_mut()
            .query_opt(
                "SELECT cash::double precision FROM assets WHERE account_id = $1",
                &[&account_id],
            )
            .map_err(query_err)?;
        Ok(row.map(|r| r.get(0)))
    }

    fn set_cash(&self, account_id: &str, cash: f64) -> Result<(), SigtraderError> {
        self.client
            .borrow_mut()
            .execute(
                "INSERT INTO assets (account_id, cash, updated_at)
                 VALUES ($1, $2, now())
                 ON CONFLICT (account_id) DO UPDATE SET
                     cash = EXCLUDED.cash, updated_at = now()",
                &[&account_id, &cash],
            )
            .map_err(query_err)?;
        Ok(())
    }
}
