//! SwiftFacture API Library
//!
//! This crate contains the HTTP surface for the SwiftFacture billing core.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
