//! # Gauntlet Common
//!
//! Ledger-side building blocks shared by the invariant harness:
//!
//! - **Primitives**: addresses, amounts, assets and deterministic address derivation
//! - **Call payloads**: typed method calls exchanged between actors and subsystems
//! - **Errors**: the unified [`FailureKind`](error::FailureKind) enumeration every subsystem
//!   reverts with, and infrastructure-level [`LedgerError`](error::LedgerError)
//! - **Ledger**: the [`LedgerService`](ledger::LedgerService) interface and its in-memory
//!   implementation with snapshot/restore
//! - **Subsystems**: reference stateful services (tokens, lending pools, vaults, oracles,
//!   deployers) driven through the ledger

#![warn(clippy::all)]

pub mod call;
pub mod contract;
pub mod error;
pub mod ledger;
pub mod primitives;
pub mod subsystems;

pub use call::{Arg, Call, CallData};
pub use contract::Contract;
pub use error::{FailureKind, LedgerError, Revert};
pub use ledger::{CallOutcome, InMemoryLedger, LedgerService, SnapshotId, SubsystemSpec};
pub use primitives::{Address, Amount, Asset};
