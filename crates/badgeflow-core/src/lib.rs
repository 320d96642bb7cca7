//! # BadgeFlow Core
//!
//! Shared vocabulary for the automation engine: the error type, engine
//! configuration, domain records, and the collaborator traits every store,
//! oracle and adapter implements.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::BadgeFlowConfig;
pub use error::{AutomationError, Result};
