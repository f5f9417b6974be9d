//! # Declarant Common Library
//!
//! Shared code for the declarant services:
//! - Error and result types
//! - TOML configuration loading and root folder resolution
//! - Batch event types and the broadcast event bus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
