//! Route modules for the insights API server.

pub mod conversations;
pub mod health;
pub mod insights;
pub mod metrics;
pub mod trends;
