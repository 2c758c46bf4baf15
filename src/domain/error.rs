//! Domain error types.

/// Top-level error type for sigtrader.
#[derive(Debug, thiserror::Error)]
pub enum SigtraderError {
    #[error("store error: {reason}")]
    Store { reason: String },

    #[error("store query error: {reason}")]
    StoreQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("insufficient history for {ticker}: have {bars} bars, need {needed}")]
    InsufficientHistory {
        ticker: String,
        bars: usize,
        needed: usize,
    },

    #[error("model {name} is not ready: call build or load before predict")]
    ModelNotReady { name: String },

    #[error("unknown model variant: {name}")]
    UnknownModel { name: String },

    #[error("model artifact error at {path}: {reason}")]
    Artifact { path: String, reason: String },

    #[error("invalid model input: {reason}")]
    InvalidInput { reason: String },

    #[error("schema mismatch: expected columns {expected:?}, got {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("insufficient funds: need {needed:.2}, have {cash:.2}")]
    InsufficientFunds { needed: f64, cash: f64 },

    #[error("insufficient position in {ticker}: have {have}, want {want}")]
    InsufficientPosition {
        ticker: String,
        have: i64,
        want: i64,
    },

    #[error("invalid thresholds: buy {buy}, sell {sell} (need 0 < sell < buy < 1)")]
    InvalidThresholds { buy: f64, sell: f64 },

    #[error("external service error: {service}: {reason}")]
    ExternalService { service: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&SigtraderError> for std::process::ExitCode {
    fn from(err: &SigtraderError) -> Self {
        let code: u8 = match err {
            SigtraderError::Io(_) => 1,
            SigtraderError::ConfigParse { .. }
            | SigtraderError::ConfigMissing { .. }
            | SigtraderError::ConfigInvalid { .. }
            | SigtraderError::InvalidThresholds { .. } => 2,
            SigtraderError::Store { .. } | SigtraderError::StoreQuery { .. } => 3,
            SigtraderError::ModelNotReady { .. }
            | SigtraderError::UnknownModel { .. }
            | SigtraderError::Artifact { .. }
            | SigtraderError::InvalidInput { .. }
            | SigtraderError::SchemaMismatch { .. } => 4,
            SigtraderError::InsufficientHistory { .. } => 5,
            SigtraderError::InsufficientFunds { .. }
            | SigtraderError::InsufficientPosition { .. } => 6,
            SigtraderError::ExternalService { .. } => 7,
        };
        std::process::ExitCode::from(code)
    }
}
