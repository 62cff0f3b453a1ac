//! # Gauntlet Harness
//!
//! Adversarial invariant testing for stateful financial protocols.
//!
//! A [`Scenario`](scenario::Scenario) declares actors, a deployment and the
//! invariants that must hold. For each registered scenario the
//! [`ScenarioRegistry`](registry::ScenarioRegistry):
//!
//! 1. checks out an isolated [`Namespace`](namespace::Namespace) over a fresh ledger
//! 2. provisions it ([`provisioner`]) and checks the preconditions
//! 3. runs the adversarial [`Exploit`](runner::Exploit) under step, time and
//!    operation limits ([`runner`])
//! 4. verifies the postconditions ([`verifier`]) and reports a verdict ([`report`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use gauntlet_harness::catalog;
//! use gauntlet_harness::config::HarnessConfig;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let registry = catalog::registry(&HarnessConfig::default())?;
//! let report = registry.run_all().await;
//! report.print();
//! assert!(report.all_passed());
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod catalog;
pub mod config;
pub mod namespace;
pub mod provisioner;
pub mod registry;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod verifier;

pub use config::HarnessConfig;
pub use registry::{Registration, ScenarioRegistry};
pub use report::{AggregateReport, RunStatus, ScenarioReport, Verdict};
pub use runner::{Exploit, ExploitView, RunLimits, Step};
pub use scenario::{Assertion, Scenario, ScenarioBuilder, ScenarioError};
