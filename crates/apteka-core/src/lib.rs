pub mod config;
pub mod error;
pub mod types;

pub use config::AptekaConfig;
pub use error::{AptekaError, Result};
pub use types::*;
