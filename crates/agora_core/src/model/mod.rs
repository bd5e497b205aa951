//! Coordination domain model.
//!
//! # Responsibility
//! - Define the records, task states, agent states, audit entries and
//!   notifications shared by repositories and services.
//!
//! # Invariants
//! - Every record is addressed by an explicit `(domain, key)` pair; keys never
//!   encode their domain.
//! - Audit entries are immutable once constructed.

pub mod agent;
pub mod audit;
pub mod ids;
pub mod notification;
pub mod record;
