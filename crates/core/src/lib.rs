pub mod config;
pub mod error;
pub mod types;

pub use config::{split_args, Config, ConfigOverrides};
pub use error::{Error, Result};
