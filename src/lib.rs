//! Sealbox server library
//!
//! Exposes modules for testing and reuse

pub mod credentials;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod presence;
pub mod relay;
pub mod state;
pub mod validation;
