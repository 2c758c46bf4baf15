//! Order policy: (score, price, account view) -> decision.
//!
//! Pure function; no exceptions escape. A buy that cannot be funded is
//! downgraded to hold with an `insufficient-cash` reason.

use crate::domain::error::SigtraderError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Tuned threshold grid artifact, next to the model and scaler files.
pub const THRESHOLDS_FILE: &str = "thresholds.json";

/// Machine-readable decision tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    BuyThreshold,
    SellThreshold,
    HoldNeutral,
    InsufficientCash,
    CapHit,
}

impl Reason {
    pub fn tag(&self) -> &'static str {
        match self {
            Reason::BuyThreshold => "buy-threshold",
            Reason::SellThreshold => "sell-threshold",
            Reason::HoldNeutral => "hold-neutral",
            Reason::InsufficientCash => "insufficient-cash",
            Reason::CapHit => "cap-hit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Buy { qty: i64, reason: Reason },
    Sell { qty: i64, reason: Reason },
    Hold { reason: Reason },
}

impl Decision {
    pub fn qty(&self) -> i64 {
        match self {
            Decision::Buy { qty, .. } | Decision::Sell { qty, .. } => *qty,
            Decision::Hold { .. } => 0,
        }
    }

    pub fn reason(&self) -> Reason {
        match self {
            Decision::Buy { reason, .. }
            | Decision::Sell { reason, .. }
            | Decision::Hold { reason } => *reason,
        }
    }

    pub fn is_hold(&self) -> bool {
        matches!(self, Decision::Hold { .. })
    }
}

/// Buy/sell score cut-offs; 0 < sell < buy < 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub buy: f64,
    pub sell: f64,
}

impl Thresholds {
    pub fn new(buy: f64, sell: f64) -> Result<Self, SigtraderError> {
        if !(0.0 < sell && sell < buy && buy < 1.0) {
            return Err(SigtraderError::InvalidThresholds { buy, sell });
        }
        Ok(Thresholds { buy, sell })
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            buy: 0.6,
            sell: 0.4,
        }
    }
}

/// Per-ticker thresholds with a default fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ThresholdGrid {
    pub default: Thresholds,
    pub per_ticker: BTreeMap<String, Thresholds>,
}

impl ThresholdGrid {
    pub fn uniform(default: Thresholds) -> Self {
        ThresholdGrid {
            default,
            per_ticker: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, ticker: &str, thresholds: Thresholds) {
        self.per_ticker.insert(ticker.to_string(), thresholds);
    }

    pub fn get(&self, ticker: &str) -> Thresholds {
        self.per_ticker.get(ticker).copied().unwrap_or(self.default)
    }

    pub fn save(&self, dir: &Path) -> Result<(), SigtraderError> {
        let path = dir.join(THRESHOLDS_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, SigtraderError> {
        let path = dir.join(THRESHOLDS_FILE);
        let json = std::fs::read_to_string(&path).map_err(|e| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&json).map_err(|e| SigtraderError::Artifact {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolicyConfig {
    /// Fraction of cash committed per buy, in (0, 1].
    pub risk_frac: f64,
    /// 1 disallows pyramiding; larger values allow stacking entries.
    pub max_positions_per_ticker: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            risk_frac: 0.9,
            max_positions_per_ticker: 1,
        }
    }
}

/// Map a composite score to an order decision.
pub fn decide(
    score: f64,
    price: f64,
    cash: f64,
    qty: i64,
    thresholds: &Thresholds,
    cfg: &PolicyConfig,
) -> Decision {
    if score >= thresholds.buy {
        if cfg.max_positions_per_ticker <= 1 && qty > 0 {
            return Decision::Hold {
                reason: Reason::CapHit,
            };
        }
        let buy_qty = (cash * cfg.risk_frac / price).floor() as i64;
        if buy_qty <= 0 {
            return Decision::Hold {
                reason: Reason::InsufficientCash,
            };
        }
        return Decision::Buy {
            qty: buy_qty,
            reason: Reason::BuyThreshold,
        };
    }

    if score <= thresholds.sell && qty > 0 {
        return Decision::Sell {
            qty,
            reason: Reason::SellThreshold,
        };
    }

    Decision::Hold {
        reason: Reason::HoldNeutral,
    }
}
