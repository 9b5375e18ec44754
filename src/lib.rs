pub mod api;
pub mod automation;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod intent;
pub mod persistence;
pub mod scoring;
pub mod services;
pub mod signing;
pub mod worker;

pub use config::AppConfig;
pub use error::{LeadflowError, Result};
