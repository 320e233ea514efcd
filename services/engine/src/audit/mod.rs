//! Compliance Audit Engine
//!
//! Turns a cloud account's regionally partitioned inventory into a flat,
//! ordered sequence of compliance verdicts.
//!
//! ## Architecture
//!
//! - **Providers**: read-only inventory behind [`ResourceProvider`], with
//!   region-scoped calls taking an explicit [`RegionContext`]
//! - **Regions**: the enabled region set, resolved once per scan, plus the
//!   bounded order-preserving fan-out
//! - **Checkers**: Identity, Storage, Network and AuditTrail rule sets
//! - **Orchestrator**: [`Auditor`] runs the checkers and aggregates verdicts
//!
//! ## Errors
//!
//! The first provider or policy error aborts the scan. [`Auditor::scan_partial`]
//! is the opt-in alternative that records failing rules and carries on.

pub mod checkers;
pub mod policy;
pub mod providers;
pub mod regions;
pub mod snapshot;
pub mod types;
mod orchestrator;

pub use checkers::{Checker, ScanContext};
pub use orchestrator::{Auditor, PartialReport, RuleFailure, ScanReport};
pub use policy::{PolicyDocument, PolicyParseError, WildcardMatching};
pub use providers::{Operation, ProviderError, RegionContext, ResourceProvider, SharedProvider};
pub use regions::{RegionDirectory, RegionSet};
pub use snapshot::{Inventory, SnapshotError, SnapshotProvider};
pub use types::{AuditError, Domain, Resource, ResourceType, Rule, Verdict, VerdictRecord};
