//! Logging infrastructure for avtaler
//!
//! Ordinary diagnostics go through `tracing` with the subscriber set up in
//! `main`. Access decisions additionally go to the `audit` target.

pub mod audit;

pub use audit::{AuditEvent, AuditEventType, AUDIT_TARGET};
