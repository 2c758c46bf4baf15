pub mod file_config_adapter;
pub mod csv_bars;
pub mod text_explain;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
#[cfg(feature = "postgres")]
pub mod postgres_store;
