pub mod catalog;
pub mod config;
pub mod error;
pub mod types;

pub use catalog::ActionCatalog;
pub use config::SchemataConfig;
pub use error::{Result, SchemataError};
pub use types::*;
