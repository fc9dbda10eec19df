//! CLI command implementations

mod capture;
mod config;
mod info;

pub use capture::{capture, CaptureArgs};
pub use config::{config, ConfigArgs};
pub use info::{info, InfoArgs};
