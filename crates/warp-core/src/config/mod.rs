//! Configuration for the processing pipeline
//!
//! - Generic YAML config loading/saving
//! - Default config file location
//! - [`WarpConfig`]: processing, server fallback and clock settings
//!
//! # Usage
//!
//! ```ignore
//! use warp_core::config::{default_config_path, WarpConfig};
//!
//! let config = WarpConfig::load(&default_config_path("config.yaml"));
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
pub use settings::{ClockConfig, ProcessingConfig, RemoteConfig, WarpConfig};
