use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::call::{Arg, Call, CallData};
use crate::error::LedgerError;
use crate::ledger::{CallOutcome, LedgerService, SnapshotId, SubsystemSpec};
use crate::primitives::{Address, Amount, Asset};

use super::context::Engine;
use super::world::{Permission, WorldState};

/// Default nesting limit for subsystem-to-subsystem calls
pub const DEFAULT_MAX_CALL_DEPTH: usize = 64;

/// Timestamp new ledgers start at
pub const GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub max_call_depth: usize,
    pub genesis_timestamp: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            genesis_timestamp: GENESIS_TIMESTAMP,
        }
    }
}

/// Deterministic in-memory ledger.
///
/// State lives in ordered maps and snapshots are full copies of the world,
/// so restore is exact and two ledgers fed the same transactions end up in
/// the same state.
pub struct InMemoryLedger {
    name: String,
    engine: Engine,
    snapshots: BTreeMap<SnapshotId, WorldState>,
    next_snapshot: u64,
    total_ops: u64,
}

impl InMemoryLedger {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, LedgerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: LedgerConfig) -> Self {
        let world = WorldState {
            timestamp: config.genesis_timestamp,
            ..WorldState::default()
        };
        Self {
            name: name.into(),
            engine: Engine::new(world, config.max_call_depth),
            snapshots: BTreeMap::new(),
            next_snapshot: 0,
            total_ops: 0,
        }
    }

    /// Read-only access to the current world
    pub fn world(&self) -> &WorldState {
        &self.engine.world
    }

    fn finish(&mut self, checkpoint: WorldState) -> Result<u64, LedgerError> {
        let ops = self.engine.ops;
        self.total_ops += ops;
        if self.engine.exhausted {
            self.engine.world = checkpoint;
            return Err(LedgerError::BudgetExhausted {
                budget: self.engine.budget.unwrap_or_default(),
            });
        }
        Ok(ops)
    }

    fn execute(&mut self, call: &Call) -> Result<CallOutcome, LedgerError> {
        self.engine.begin();
        let checkpoint = self.engine.world.clone();

        let sender = self.engine.world.account_mut(call.from);
        sender.nonce += 1;

        let result = self
            .engine
            .call(call.from, call.to, call.value, &call.data, 0);
        let ops = self.finish(checkpoint)?;

        match result {
            Ok(return_data) => Ok(CallOutcome::succeeded(return_data, ops)),
            Err(revert) => {
                if log::log_enabled!(log::Level::Debug) {
                    log::debug!(
                        "[{}] call {} from {:?} to {:?} reverted: {}",
                        self.name,
                        call.data,
                        call.from,
                        call.to,
                        revert
                    );
                }
                Ok(CallOutcome::reverted(revert, ops))
            }
        }
    }

    /// Snapshots currently held
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn deploy(
        &mut self,
        deployer: Address,
        spec: SubsystemSpec,
    ) -> Result<Address, LedgerError> {
        self.engine.begin();
        let checkpoint = self.engine.world.clone();
        let kind = spec.code.kind();

        let result = self
            .engine
            .create(deployer, spec.code, &spec.args, spec.value, 0);
        self.finish(checkpoint)?;

        let address = result.map_err(|revert| LedgerError::DeployFailed {
            contract: kind.to_string(),
            revert,
        })?;

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "[{}] deployed {} at {:?} from {:?}",
                self.name,
                kind,
                address,
                deployer
            );
        }
        Ok(address)
    }

    async fn call(&mut self, call: Call) -> Result<CallOutcome, LedgerError> {
        self.execute(&call)
    }

    async fn static_call(&mut self, call: Call) -> Result<CallOutcome, LedgerError> {
        let before = self.engine.world.clone();
        let result = self.execute(&call);
        self.engine.world = before;
        result
    }

    async fn get_balance(&mut self, account: Address, asset: Asset) -> Result<Amount, LedgerError> {
        match asset {
            Asset::Native => Ok(self.engine.world.balance(&account)),
            Asset::Token(token) => {
                if self.engine.world.code(&token).is_none() {
                    return Err(LedgerError::NotAToken(token));
                }
                let query = Call::new(
                    Address::zero(),
                    token,
                    CallData::new("balance_of").arg(account),
                );
                let outcome = self.static_call(query).await?;
                if let Some(revert) = outcome.revert {
                    return Err(LedgerError::QueryFailed(revert));
                }
                match outcome.return_data {
                    Arg::Uint(balance) => Ok(balance),
                    _ => Err(LedgerError::NotAToken(token)),
                }
            }
        }
    }

    async fn get_code(&self, account: Address) -> Result<Vec<u8>, LedgerError> {
        Ok(self
            .engine
            .world
            .code(&account)
            .map(|code| code.code())
            .unwrap_or_default())
    }

    async fn advance_time(&mut self, seconds: u64) -> Result<(), LedgerError> {
        self.engine.world.timestamp = self
            .engine
            .world
            .timestamp
            .checked_add(seconds)
            .ok_or_else(|| LedgerError::Overflow("timestamp".to_string()))?;
        Ok(())
    }

    async fn timestamp(&self) -> Result<u64, LedgerError> {
        Ok(self.engine.world.timestamp)
    }

    async fn nonce(&self, account: Address) -> Result<u64, LedgerError> {
        Ok(self.engine.world.nonce(&account))
    }

    async fn snapshot(&mut self) -> Result<SnapshotId, LedgerError> {
        // ids are never reused, so a discarded handle stays unknown
        let id = SnapshotId(self.next_snapshot);
        self.next_snapshot += 1;
        self.snapshots.insert(id, self.engine.world.clone());
        Ok(id)
    }

    async fn restore(&mut self, id: SnapshotId) -> Result<(), LedgerError> {
        let world = self
            .snapshots
            .get(&id)
            .ok_or(LedgerError::UnknownSnapshot(id))?;
        self.engine.world = world.clone();
        Ok(())
    }

    async fn discard(&mut self, id: SnapshotId) -> Result<(), LedgerError> {
        self.snapshots
            .remove(&id)
            .map(|_| ())
            .ok_or(LedgerError::UnknownSnapshot(id))
    }

    async fn set_balance(&mut self, account: Address, amount: Amount) -> Result<(), LedgerError> {
        self.engine.world.account_mut(account).balance = amount;
        Ok(())
    }

    async fn grant_permission(
        &mut self,
        actor: Address,
        target: Address,
        verb: &str,
    ) -> Result<(), LedgerError> {
        self.engine
            .world
            .permissions
            .insert(Permission::new(actor, target, verb));
        Ok(())
    }

    async fn revoke_permission(
        &mut self,
        actor: Address,
        target: Address,
        verb: &str,
    ) -> Result<(), LedgerError> {
        self.engine
            .world
            .permissions
            .remove(&Permission::new(actor, target, verb));
        Ok(())
    }

    async fn has_permission(
        &self,
        actor: Address,
        target: Address,
        verb: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self.engine.world.has_permission(actor, target, verb))
    }

    fn set_op_budget(&mut self, budget: Option<u64>) {
        self.engine.budget = budget;
    }

    fn ops_used(&self) -> u64 {
        self.total_ops
    }

    fn accounts(&self) -> Vec<Address> {
        self.engine.world.accounts.keys().copied().collect()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::primitives::{actor_address, derive_contract_address, ether};
    use crate::subsystems::token::Token;
    use std::sync::Arc;

    fn token_spec(supply: Amount) -> SubsystemSpec {
        SubsystemSpec::new(Arc::new(Token)).with_args(vec![Arg::Uint(supply)])
    }

    #[tokio::test]
    async fn test_deploy_uses_derived_address() {
        let mut ledger = InMemoryLedger::new("test");
        let deployer = actor_address("deployer");
        let expected = derive_contract_address(&deployer, 0);

        let token = ledger.deploy(deployer, token_spec(ether(100))).await.unwrap();
        assert_eq!(token, expected);
        assert_eq!(ledger.nonce(deployer).await.unwrap(), 1);
        assert_eq!(
            ledger.get_balance(deployer, Asset::Token(token)).await.unwrap(),
            ether(100)
        );
        assert!(!ledger.get_code(token).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reverted_call_rolls_back() {
        let mut ledger = InMemoryLedger::new("test");
        let deployer = actor_address("deployer");
        let player = actor_address("player");
        let token = ledger.deploy(deployer, token_spec(ether(10))).await.unwrap();

        let transfer = CallData::new("transfer").arg(player).arg(ether(11));
        let outcome = ledger
            .call(Call::new(deployer, token, transfer))
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.revert.unwrap().kind,
            FailureKind::InsufficientBalance
        );
        assert_eq!(
            ledger.get_balance(deployer, Asset::Token(token)).await.unwrap(),
            ether(10)
        );
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let mut ledger = InMemoryLedger::new("test");
        let player = actor_address("player");
        ledger.set_balance(player, ether(1)).await.unwrap();

        let snapshot = ledger.snapshot().await.unwrap();
        ledger.set_balance(player, ether(5)).await.unwrap();
        ledger.advance_time(60).await.unwrap();
        let later = ledger.snapshot().await.unwrap();

        ledger.restore(snapshot).await.unwrap();
        assert_eq!(
            ledger.get_balance(player, Asset::Native).await.unwrap(),
            ether(1)
        );
        assert_eq!(ledger.timestamp().await.unwrap(), GENESIS_TIMESTAMP);

        // both snapshots stay usable
        ledger.restore(later).await.unwrap();
        assert_eq!(
            ledger.get_balance(player, Asset::Native).await.unwrap(),
            ether(5)
        );
        ledger.restore(snapshot).await.unwrap();
        assert_eq!(
            ledger.restore(SnapshotId(7)).await,
            Err(LedgerError::UnknownSnapshot(SnapshotId(7)))
        );
    }

    #[tokio::test]
    async fn test_discard_releases_only_that_snapshot() {
        let mut ledger = InMemoryLedger::new("test");
        let player = actor_address("player");
        ledger.set_balance(player, ether(1)).await.unwrap();
        let kept = ledger.snapshot().await.unwrap();
        ledger.set_balance(player, ether(2)).await.unwrap();
        let scratch = ledger.snapshot().await.unwrap();
        assert_eq!(ledger.snapshot_count(), 2);

        ledger.discard(scratch).await.unwrap();
        assert_eq!(ledger.snapshot_count(), 1);
        assert_eq!(
            ledger.restore(scratch).await,
            Err(LedgerError::UnknownSnapshot(scratch))
        );
        assert_eq!(
            ledger.discard(scratch).await,
            Err(LedgerError::UnknownSnapshot(scratch))
        );

        // a fresh snapshot never reuses the discarded id
        let next = ledger.snapshot().await.unwrap();
        assert_ne!(next, scratch);
        ledger.restore(kept).await.unwrap();
        assert_eq!(
            ledger.get_balance(player, Asset::Native).await.unwrap(),
            ether(1)
        );
    }

    #[tokio::test]
    async fn test_static_call_discards_changes() {
        let mut ledger = InMemoryLedger::new("test");
        let deployer = actor_address("deployer");
        let player = actor_address("player");
        let token = ledger.deploy(deployer, token_spec(ether(10))).await.unwrap();

        let transfer = CallData::new("transfer").arg(player).arg(ether(1));
        let outcome = ledger
            .static_call(Call::new(deployer, token, transfer))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            ledger.get_balance(player, Asset::Token(token)).await.unwrap(),
            Amount::zero()
        );
        assert_eq!(ledger.nonce(deployer).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_op_budget_exhaustion() {
        let mut ledger = InMemoryLedger::new("test");
        let deployer = actor_address("deployer");
        let player = actor_address("player");
        let token = ledger.deploy(deployer, token_spec(ether(10))).await.unwrap();

        ledger.set_op_budget(Some(0));
        let transfer = CallData::new("transfer").arg(player).arg(ether(1));
        let result = ledger.call(Call::new(deployer, token, transfer)).await;
        assert_eq!(result, Err(LedgerError::BudgetExhausted { budget: 0 }));

        ledger.set_op_budget(None);
        assert_eq!(
            ledger.get_balance(player, Asset::Token(token)).await.unwrap(),
            Amount::zero()
        );
    }

    #[tokio::test]
    async fn test_plain_transfer_to_account_without_code() {
        let mut ledger = InMemoryLedger::new("test");
        let alice = actor_address("alice");
        let bob = actor_address("bob");
        ledger.set_balance(alice, ether(3)).await.unwrap();

        let outcome = ledger
            .call(Call::new(alice, bob, CallData::new("anything")).with_value(ether(2)))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.return_data.is_unit());
        assert_eq!(ledger.get_balance(bob, Asset::Native).await.unwrap(), ether(2));
    }
}
