//! Posture Engine Library
//!
//! Cloud compliance rule evaluation and verdict aggregation.

pub mod audit;
pub mod config;

pub use audit::{Auditor, ScanReport, SnapshotProvider, Verdict};
pub use config::AuditConfig;
