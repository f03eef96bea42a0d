//! Security Module
//!
//! Capability validation, audit logging and resource accounting.

pub mod audit;
pub mod resource;
pub mod validator;

pub use audit::{AuditCategory, AuditEvent, AuditLog, AuditOutcome, AuditSeverity, AuditStats};
pub use resource::{ResourceLimits, ResourceUsage};
pub use validator::{CapabilityValidator, Rejection};
