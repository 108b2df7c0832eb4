pub mod config;
pub mod errors;
pub mod events;
pub mod logs;
pub mod matcher;
pub mod monitor;
pub mod registry;

pub use config::MonitorConfig;
pub use errors::MonitorError;
pub use events::{Provider, SetupMessage, SetupStatus};
pub use monitor::{MonitorHandle, PairingMonitor, PairingState, StartOptions};
pub use registry::{MonitorRegistry, SetupMonitor};
