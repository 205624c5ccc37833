pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
