//! CSV bar reader for offline backtests.
//!
//! One file per ticker, `<TICKER>.csv`, with header
//! `date,open,high,low,close,volume[,adj_close]`. A missing adj_close
//! column falls back to the close.

use crate::domain::bar::Bar;
use crate::domain::error::SigtraderError;
use chrono::NaiveDate;
use csv::StringRecord;
use std::fs;
use std::path::PathBuf;

pub struct CsvBars {
    base_path: PathBuf,
}

impl CsvBars {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", ticker))
    }

    /// Every bar in the ticker's file, ascending by date.
    pub fn read_all(&self, ticker: &str) -> Result<Vec<Bar>, SigtraderError> {
        self.read_range(ticker, NaiveDate::MIN, NaiveDate::MAX)
    }

    pub fn read_range(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>, SigtraderError> {
        let path = self.csv_path(ticker);
        let content = fs::read_to_string(&path).map_err(|e| SigtraderError::Store {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let mut bars = Vec::new();
        for result in rdr.records() {
            let record = result.map_err(|e| SigtraderError::StoreQuery {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;
            let bar = parse_record(ticker, &record)?;
            if bar.date < start || bar.date > end {
                continue;
            }
            bars.push(bar);
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Tickers with a CSV file under the base path, sorted.
    pub fn list_tickers(&self) -> Result<Vec<String>, SigtraderError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| SigtraderError::Store {
            reason: format!("failed to read {}: {}", self.base_path.display(), e),
        })?;
        let mut tickers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SigtraderError::Store {
                reason: format!("directory entry error: {}", e),
            })?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(ticker) = name.strip_suffix(".csv") {
                tickers.push(ticker.to_string());
            }
        }
        tickers.sort();
        Ok(tickers)
    }
}

fn field<'a>(record: &'a StringRecord, idx: usize, name: &str) -> Result<&'a str, SigtraderError> {
    record.get(idx).ok_or_else(|| SigtraderError::StoreQuery {
        reason: format!("missing {} column", name),
    })
}

fn numeric<T: std::str::FromStr>(
    record: &StringRecord,
    idx: usize,
    name: &str,
) -> Result<T, SigtraderError>
where
    T::Err: std::fmt::Display,
{
    field(record, idx, name)?
        .parse()
        .map_err(|e| SigtraderError::StoreQuery {
            reason: format!("invalid {} value: {}", name, e),
        })
}

fn parse_record(ticker: &str, record: &StringRecord) -> Result<Bar, SigtraderError> {
    let date = NaiveDate::parse_from_str(field(record, 0, "date")?, "%Y-%m-%d").map_err(|e| {
        SigtraderError::StoreQuery {
            reason: format!("invalid date format: {}", e),
        }
    })?;
    let close: f64 = numeric(record, 4, "close")?;
    let adj_close = match record.get(6) {
        Some(s) if !s.is_empty() => numeric(record, 6, "adj_close")?,
        _ => close,
    };
    Ok(Bar {
        ticker: ticker.to_string(),
        date,
        open: numeric(record, 1, "open")?,
        high: numeric(record, 2, "high")?,
        low: numeric(record, 3, "low")?,
        close,
        volume: numeric(record, 5, "volume")?,
        adj_close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, CsvBars) {
        let dir = TempDir::new().unwrap();
        let full = "date,open,high,low,close,volume,adj_close\n\
            2024-01-16,105.0,115.0,100.0,110.0,60000,109.0\n\
            2024-01-15,100.0,110.0,90.0,105.0,50000,104.0\n";
        let short = "date,open,high,low,close,volume\n\
            2024-01-15,50.0,55.0,45.0,52.0,1000\n";
        fs::write(dir.path().join("AAPL.csv"), full).unwrap();
        fs::write(dir.path().join("MSFT.csv"), short).unwrap();
        let adapter = CsvBars::new(dir.path().to_path_buf());
        (dir, adapter)
    }

    #[test]
    fn reads_and_sorts_bars() {
        let (_dir, adapter) = setup();
        let bars = adapter.read_all("AAPL").unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(bars[0].close, 105.0);
        assert_eq!(bars[0].adj_close, 104.0);
        assert_eq!(bars[1].volume, 60000);
    }

    #[test]
    fn missing_adj_close_falls_back_to_close() {
        let (_dir, adapter) = setup();
        let bars = adapter.read_all("MSFT").unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].adj_close, 52.0);
    }

    #[test]
    fn range_filter_is_inclusive() {
        let (_dir, adapter) = setup();
        let day = NaiveDate::from_ymd_opt(2024, 1, 16).unwrap();
        let bars = adapter.read_range("AAPL", day, day).unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].date, day);
    }

    #[test]
    fn missing_file_is_a_store_error() {
        let (_dir, adapter) = setup();
        assert!(matches!(
            adapter.read_all("TSLA"),
            Err(SigtraderError::Store { .. })
        ));
    }

    #[test]
    fn malformed_row_is_a_query_error() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("BAD.csv"),
            "date,open,high,low,close,volume\n2024-01-15,x,1,1,1,1\n",
        )
        .unwrap();
        let adapter = CsvBars::new(dir.path().to_path_buf());
        assert!(matches!(
            adapter.read_all("BAD"),
            Err(SigtraderError::StoreQuery { .. })
        ));
    }

    #[test]
    fn lists_tickers_sorted() {
        let (_dir, adapter) = setup();
        assert_eq!(adapter.list_tickers().unwrap(), vec!["AAPL", "MSFT"]);
    }
}
