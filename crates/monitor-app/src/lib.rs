mod config;
mod display;

pub use config::MonitorConfig;
pub use display::LogDisplay;
