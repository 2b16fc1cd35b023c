pub mod config;
pub mod logger;

pub use config::AppConfig;
pub use logger::init_logging;
