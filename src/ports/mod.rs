pub mod config_port;
pub mod store_port;
pub mod explain_port;
