//! Coordination services.
//!
//! # Responsibility
//! - Enforce ownership, schema, graph and lifecycle rules above the
//!   repository layer.
//! - Keep SQL and transaction handling out of the rule code; every service
//!   borrows a connection or an open transaction from the caller.

pub mod error;
pub mod fanout_service;
pub mod gateway;
pub mod graph_service;
pub mod lifecycle_service;
pub mod retry;
pub mod status;
