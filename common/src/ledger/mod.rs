//! Ledger service interface.
//!
//! The harness never touches ledger state directly: it provisions, runs and
//! verifies scenarios exclusively through [`LedgerService`]. The in-memory
//! implementation lives in [`memory`]; other backends only need to implement
//! the trait.

mod context;
mod memory;
mod world;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::call::{Arg, Call};
use crate::contract::Contract;
use crate::error::{LedgerError, Revert};
use crate::primitives::{Address, Amount, Asset};

pub use context::ExecContext;
pub use memory::{InMemoryLedger, LedgerConfig};
pub use world::{AccountState, Permission, WorldState};

/// Opaque handle to a captured ledger state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub u64);

/// Code plus constructor input for a deployment
#[derive(Debug, Clone)]
pub struct SubsystemSpec {
    pub code: Arc<dyn Contract>,
    pub args: Vec<Arg>,
    pub value: Amount,
}

impl SubsystemSpec {
    pub fn new(code: Arc<dyn Contract>) -> Self {
        Self {
            code,
            args: Vec::new(),
            value: Amount::zero(),
        }
    }

    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.args = args;
        self
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }
}

/// Result of a transaction that reached the ledger.
///
/// A reverted call still produces an outcome (`success == false`); all of
/// its state changes have been rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallOutcome {
    pub success: bool,
    pub return_data: Arg,
    pub revert: Option<Revert>,
    /// Operations metered while executing this call
    pub ops: u64,
}

impl CallOutcome {
    pub fn succeeded(return_data: Arg, ops: u64) -> Self {
        Self {
            success: true,
            return_data,
            revert: None,
            ops,
        }
    }

    pub fn reverted(revert: Revert, ops: u64) -> Self {
        Self {
            success: false,
            return_data: Arg::Unit,
            revert: Some(revert),
            ops,
        }
    }
}

/// Operations a ledger backend must provide to the harness.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Deploy `spec` from `deployer`. The new address is derived from the
    /// deployer and its nonce, which is then incremented.
    async fn deploy(&mut self, deployer: Address, spec: SubsystemSpec)
        -> Result<Address, LedgerError>;

    /// Execute a transaction. Reverts are reported in the outcome and leave
    /// no trace in the state.
    async fn call(&mut self, call: Call) -> Result<CallOutcome, LedgerError>;

    /// Execute a call and discard every state change, successful or not.
    async fn static_call(&mut self, call: Call) -> Result<CallOutcome, LedgerError>;

    /// Balance of `account` in `asset`. Token balances are read through the
    /// token's `balance_of` view.
    async fn get_balance(&mut self, account: Address, asset: Asset) -> Result<Amount, LedgerError>;

    /// Code deployed at `account`; empty when the account has none.
    async fn get_code(&self, account: Address) -> Result<Vec<u8>, LedgerError>;

    async fn advance_time(&mut self, seconds: u64) -> Result<(), LedgerError>;

    async fn timestamp(&self) -> Result<u64, LedgerError>;

    async fn nonce(&self, account: Address) -> Result<u64, LedgerError>;

    async fn snapshot(&mut self) -> Result<SnapshotId, LedgerError>;

    /// Return to a captured state. Every snapshot, including `id` and those
    /// taken after it, stays valid and can be restored again.
    async fn restore(&mut self, id: SnapshotId) -> Result<(), LedgerError>;

    /// Release a snapshot that will not be restored again. Other snapshots
    /// are unaffected.
    async fn discard(&mut self, id: SnapshotId) -> Result<(), LedgerError>;

    /// Overwrite the native balance of an account.
    async fn set_balance(&mut self, account: Address, amount: Amount) -> Result<(), LedgerError>;

    /// Allow `actor` to perform `verb` on `target`.
    async fn grant_permission(
        &mut self,
        actor: Address,
        target: Address,
        verb: &str,
    ) -> Result<(), LedgerError>;

    async fn revoke_permission(
        &mut self,
        actor: Address,
        target: Address,
        verb: &str,
    ) -> Result<(), LedgerError>;

    async fn has_permission(
        &self,
        actor: Address,
        target: Address,
        verb: &str,
    ) -> Result<bool, LedgerError>;

    /// Cap the operations a single call may meter. `None` removes the cap.
    fn set_op_budget(&mut self, budget: Option<u64>);

    /// Operations metered since the ledger was created
    fn ops_used(&self) -> u64;

    /// Every account the ledger knows about
    fn accounts(&self) -> Vec<Address>;

    fn name(&self) -> &str;
}
