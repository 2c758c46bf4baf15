//! Configuration access port trait.

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;
}

/// Environment override for a database setting: reads `{PREFIX}_{suffix}`
/// with the prefix taken from `[database] env_prefix` (default `SIGTRADER`).
pub fn env_override(config: &dyn ConfigPort, suffix: &str) -> Option<String> {
    let prefix = config
        .get_string("database", "env_prefix")
        .unwrap_or_else(|| "SIGTRADER".to_string());
    std::env::var(format!("{prefix}_{suffix}")).ok()
}
