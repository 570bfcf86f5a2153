pub mod config;
pub mod simulate;

pub use config::{cmd_config, ConfigArgs};
pub use simulate::{cmd_simulate, SimulateArgs};
