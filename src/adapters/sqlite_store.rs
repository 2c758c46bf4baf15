//! SQLite persistence adapter.
//!
//! Single connection behind a RefCell; the pipeline is single-threaded
//! and batch inserts need `&mut Connection` for transactions. Dates are
//! stored as ISO-8601 text.

use crate::domain::bar::Bar;
use crate::domain::error::SigtraderError;
use crate::domain::fill::{Fill, Report, Side};
use crate::ports::config_port::{ConfigPort, env_override};
use crate::ports::store_port::StorePort;
use chrono::NaiveDate;
use rusqlite::{Connection, Row, params};
use std::cell::RefCell;

pub struct SqliteStore {
    conn: RefCell<Connection>,
}

fn store_err(e: rusqlite::Error) -> SigtraderError {
    SigtraderError::Store {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> SigtraderError {
    SigtraderError::StoreQuery {
        reason: e.to_string(),
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, SigtraderError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| SigtraderError::StoreQuery {
        reason: format!("invalid stored date {s:?}: {e}"),
    })
}

fn date_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, SigtraderError> {
        let db_path = config
            .get_string("sqlite", "path")
            .or_else(|| env_override(config, "SQLITE_PATH"))
            .ok_or_else(|| SigtraderError::ConfigMissing {
                section: "sqlite".into(),
                key: "path".into(),
            })?;
        let conn = Connection::open(&db_path).map_err(store_err)?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, SigtraderError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Ok(Self {
            conn: RefCell::new(conn),
        })
    }

    pub fn initialize_schema(&self) -> Result<(), SigtraderError> {
        self.conn
            .borrow()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS price_data (
                    ticker TEXT NOT NULL,
                    date TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume INTEGER NOT NULL,
                    adj_close REAL NOT NULL,
                    PRIMARY KEY (ticker, date)
                );
                CREATE INDEX IF NOT EXISTS idx_price_data_ticker ON price_data(ticker);

                CREATE TABLE IF NOT EXISTS xai_reports (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ticker TEXT NOT NULL,
                    signal TEXT NOT NULL,
                    price REAL NOT NULL,
                    date TEXT NOT NULL,
                    text TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS executions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    run_id TEXT NOT NULL,
                    xai_report_id INTEGER REFERENCES xai_reports(id),
                    ticker TEXT NOT NULL,
                    signal_date TEXT NOT NULL,
                    signal_price REAL NOT NULL,
                    signal TEXT NOT NULL,
                    fill_date TEXT NOT NULL,
                    fill_price REAL NOT NULL,
                    qty INTEGER NOT NULL,
                    side TEXT NOT NULL,
                    value REAL NOT NULL,
                    commission REAL NOT NULL,
                    cash_after REAL NOT NULL,
                    position_qty INTEGER NOT NULL,
                    avg_price REAL NOT NULL,
                    pnl_realized REAL NOT NULL,
                    pnl_unrealized REAL NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_executions_ticker ON executions(ticker);

                CREATE TABLE IF NOT EXISTS assets (
                    account_id TEXT PRIMARY KEY,
                    cash REAL NOT NULL,
                    updated_at TEXT NOT NULL
                );",
            )
            .map_err(query_err)
    }
}

fn bar_from_row(row: &Row<'_>) -> rusqlite::Result<(String, Bar)> {
    let date: String = row.get(1)?;
    Ok((
        date,
        Bar {
            ticker: row.get(0)?,
            date: NaiveDate::MIN, // patched by the caller after date parse
            open: row.get(2)?,
            high: row.get(3)?,
            low: row.get(4)?,
            close: row.get(5)?,
            volume: row.get(6)?,
            adj_close: row.get(7)?,
        },
    ))
}

fn fill_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, Fill)> {
    let signal_date: String = row.get(4)?;
    let fill_date: String = row.get(7)?;
    let side: String = row.get(10)?;
    Ok((
        signal_date,
        fill_date,
        side,
        Fill {
            id: Some(row.get(0)?),
            run_id: row.get(1)?,
            xai_report_id: row.get(2)?,
            ticker: row.get(3)?,
            signal_date: NaiveDate::MIN,
            signal_price: row.get(5)?,
            signal: row.get(6)?,
            fill_date: NaiveDate::MIN,
            fill_price: row.get(8)?,
            qty: row.get(9)?,
            side: Side::Buy,
            value: row.get(11)?,
            commission: row.get(12)?,
            cash_after: row.get(13)?,
            position_qty: row.get(14)?,
            avg_price: row.get(15)?,
            pnl_realized: row.get(16)?,
            pnl_unrealized: row.get(17)?,
        },
    ))
}

const BAR_COLUMNS: &str = "ticker, date, open, high, low, close, volume, adj_close";
const FILL_COLUMNS: &str = "id, run_id, xai_report_id, ticker, signal_date, signal_price, \
     signal, fill_date, fill_price, qty, side, value, commission, cash_after, position_qty, \
     avg_price, pnl_realized, pnl_unrealized";

impl StorePort for SqliteStore {
    fn insert_bars(&self, bars: &[Bar]) -> Result<usize, SigtraderError> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO price_data (ticker, date, open, high, low, close, volume, adj_close)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    bar.ticker,
                    date_str(bar.date),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.adj_close
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
        let conn = self.conn.borrow();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BAR_COLUMNS} FROM price_data
                 WHERE ticker = ?1 AND date >= ?2 AND date <= ?3
                 ORDER BY date ASC"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![ticker, date_str(start), date_str(end)],
                bar_from_row,
            )
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            let (date, mut bar) = row.map_err(query_err)?;
            bar.date = parse_date(&date)?;
            bars.push(bar);
        }
        Ok(bars)
    }

    fn latest_bars(&self, ticker: &str, limit: usize) -> Result<Vec<Bar>, SigtraderError> {
        let conn = self.conn.borrow();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {BAR_COLUMNS} FROM price_data
                 WHERE ticker = ?1 ORDER BY date DESC LIMIT ?2"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![ticker, limit as i64], bar_from_row)
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            let (date, mut bar) = row.map_err(query_err)?;
            bar.date = parse_date(&date)?;
            bars.push(bar);
        }
        bars.reverse();
        Ok(bars)
    }

    fn fetch_fills(&self, ticker: &str) -> Result<Vec<Fill>, SigtraderError> {
        let conn = self.conn.borrow();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {FILL_COLUMNS} FROM executions
                 WHERE ticker = ?1 ORDER BY fill_date ASC, id ASC"
            ))
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![ticker], fill_from_row)
            .map_err(query_err)?;

        let mut fills = Vec::new();
        for row in rows {
            let (signal_date, fill_date, side, mut fill) = row.map_err(query_err)?;
            fill.signal_date = parse_date(&signal_date)?;
            fill.fill_date = parse_date(&fill_date)?;
            fill.side = Side::parse(&side).ok_or_else(|| SigtraderError::StoreQuery {
                reason: format!("invalid stored side {side:?}"),
            })?;
            fills.push(fill);
        }
        Ok(fills)
    }

    fn insert_fills(&self, fills: &[Fill]) -> Result<Vec<i64>, SigtraderError> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction().map_err(query_err)?;
        let mut ids = Vec::with_capacity(fills.len());
        for fill in fills {
            tx.execute(
                "INSERT INTO executions (run_id, xai_report_id, ticker, signal_date, signal_price,
                     signal, fill_date, fill_price, qty, side, value, commission, cash_after,
                     position_qty, avg_price, pnl_realized, pnl_unrealized)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    fill.run_id,
                    fill.xai_report_id,
                    fill.ticker,
                    date_str(fill.signal_date),
                    fill.signal_price,
                    fill.signal,
                    date_str(fill.fill_date),
                    fill.fill_price,
                    fill.qty,
                    fill.side.as_str(),
                    fill.value,
                    fill.commission,
                    fill.cash_after,
                    fill.position_qty,
                    fill.avg_price,
                    fill.pnl_realized,
                    fill.pnl_unrealized
                ],
            )
            .map_err(query_err)?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit().map_err(query_err)?;
        Ok(ids)
    }

    fn insert_reports(&self, reports: &[Report]) -> Result<Vec<i64>, SigtraderError> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction().map_err(query_err)?;
        let mut ids = Vec::with_capacity(reports.len());
        for report in reports {
            tx.execute(
                "INSERT INTO xai_reports (ticker, signal, price, date, text)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![report.ticker, report.signal, report.price, report.date, report.text],
            )
            .map_err(query_err)?;
            ids.push(tx.last_insert_rowid());
        }
        tx.commit().map_err(query_err)?;
        Ok(ids)
    }

    fn get_cash(&self, account_id: &str) -> Result<Option<f64>, SigtraderError> {
        let conn = self.conn.borrow();
        let mut stmt = conn
            .prepare("SELECT cash FROM assets WHERE account_id = ?1")
            .map_err(query_err)?;
        let mut rows = stmt.query(params![account_id]).map_err(query_err)?;
        match rows.next().map_err(query_err)? {
            Some(row) => Ok(Some(row.get(0).map_err(query_err)?)),
            None => Ok(None),
        }
    }

    fn set_cash(&self, account_id: &str, cash: f64) -> Result<(), SigtraderError> {
        self.conn
            .borrow()
            .execute(
                "INSERT OR REPLACE INTO assets (account_id, cash, updated_at)
                 VALUES (?1, ?2, datetime('now'))",
                params![account_id, cash],
            )
            .map_err(query_err)?;
        Ok(())
    }
}
