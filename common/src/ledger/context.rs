use std::sync::Arc;

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{FailureKind, Revert};
use crate::primitives::{derive_contract_address, Address, Amount};

use super::world::{Permission, WorldState};

/// Message of the revert raised once the operation budget is gone
const BUDGET_EXHAUSTED: &str = "operation budget exhausted";

/// Executes calls against a [`WorldState`].
///
/// Every nested call and deployment takes a checkpoint of the world and
/// restores it when the frame reverts, so a revert undoes exactly the
/// changes made by that frame and its children.
pub(crate) struct Engine {
    pub(crate) world: WorldState,
    pub(crate) max_depth: usize,
    pub(crate) budget: Option<u64>,
    /// Operations metered by the current top-level call
    pub(crate) ops: u64,
    /// Set once the budget runs out; every later operation fails
    pub(crate) exhausted: bool,
}

impl Engine {
    pub(crate) fn new(world: WorldState, max_depth: usize) -> Self {
        Self {
            world,
            max_depth,
            budget: None,
            ops: 0,
            exhausted: false,
        }
    }

    /// Reset per-call metering before a top-level call.
    pub(crate) fn begin(&mut self) {
        self.ops = 0;
        self.exhausted = false;
    }

    fn meter(&mut self) -> Result<(), Revert> {
        if self.exhausted {
            return Err(Revert::new(FailureKind::Other, BUDGET_EXHAUSTED));
        }
        self.ops += 1;
        if let Some(budget) = self.budget {
            if self.ops > budget {
                self.exhausted = true;
                return Err(Revert::new(FailureKind::Other, BUDGET_EXHAUSTED));
            }
        }
        Ok(())
    }

    fn check_depth(&self, depth: usize) -> Result<(), Revert> {
        if depth > self.max_depth {
            return Err(Revert::new(
                FailureKind::CallDepthExceeded,
                format!("call depth {} exceeds limit {}", depth, self.max_depth),
            ));
        }
        Ok(())
    }

    pub(crate) fn transfer(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), Revert> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = self.world.balance(&from);
        if available < amount {
            return Err(Revert::new(
                FailureKind::InsufficientBalance,
                format!("balance {available} is below {amount}"),
            ));
        }
        self.world.account_mut(from).balance = available - amount;
        let recipient = self.world.account_mut(to);
        recipient.balance = recipient
            .balance
            .checked_add(amount)
            .ok_or_else(|| Revert::new(FailureKind::Other, "balance overflow"))?;
        Ok(())
    }

    /// Message call from `caller` to `to`. Accounts without code accept the
    /// value and return [`Arg::Unit`].
    pub(crate) fn call(
        &mut self,
        caller: Address,
        to: Address,
        value: Amount,
        data: &CallData,
        depth: usize,
    ) -> Result<Arg, Revert> {
        self.meter()?;
        self.check_depth(depth)?;

        let checkpoint = self.world.clone();
        let result = self.call_frame(caller, to, value, data, depth);
        if result.is_err() {
            self.world = checkpoint;
        }
        result
    }

    fn call_frame(
        &mut self,
        caller: Address,
        to: Address,
        value: Amount,
        data: &CallData,
        depth: usize,
    ) -> Result<Arg, Revert> {
        self.transfer(caller, to, value)?;
        let Some(code) = self.world.code(&to) else {
            return Ok(Arg::Unit);
        };
        let mut ctx = ExecContext {
            engine: self,
            address: to,
            caller,
            value,
            depth,
        };
        code.call(&mut ctx, data)
    }

    /// Run the code at `code_address` against the storage and balance of
    /// `address`, keeping the caller and value of the current frame.
    fn delegate_call(
        &mut self,
        address: Address,
        caller: Address,
        value: Amount,
        code_address: Address,
        data: &CallData,
        depth: usize,
    ) -> Result<Arg, Revert> {
        self.meter()?;
        self.check_depth(depth)?;

        let Some(code) = self.world.code(&code_address) else {
            return Ok(Arg::Unit);
        };
        let checkpoint = self.world.clone();
        let mut ctx = ExecContext {
            engine: self,
            address,
            caller,
            value,
            depth,
        };
        let result = code.call(&mut ctx, data);
        if result.is_err() {
            self.world = checkpoint;
        }
        result
    }

    /// Deploy `code` from `creator` at the address derived from its nonce.
    /// The nonce is consumed even if construction reverts.
    pub(crate) fn create(
        &mut self,
        creator: Address,
        code: Arc<dyn Contract>,
        args: &[Arg],
        value: Amount,
        depth: usize,
    ) -> Result<Address, Revert> {
        self.meter()?;
        self.check_depth(depth)?;

        let nonce = self.world.nonce(&creator);
        let address = derive_contract_address(&creator, nonce);
        self.world.account_mut(creator).nonce = nonce + 1;

        let checkpoint = self.world.clone();
        let result = self.create_frame(creator, address, code, args, value, depth);
        if result.is_err() {
            self.world = checkpoint;
        }
        result.map(|_| address)
    }

    fn create_frame(
        &mut self,
        creator: Address,
        address: Address,
        code: Arc<dyn Contract>,
        args: &[Arg],
        value: Amount,
        depth: usize,
    ) -> Result<(), Revert> {
        if self.world.code(&address).is_some() {
            return Err(Revert::new(
                FailureKind::AlreadyInitialized,
                "address already holds code",
            ));
        }
        self.transfer(creator, address, value)?;
        self.world.account_mut(address).code = Some(code.clone());
        let mut ctx = ExecContext {
            engine: self,
            address,
            caller: creator,
            value,
            depth,
        };
        code.construct(&mut ctx, args)
    }
}

/// View of the ledger handed to subsystem code while it executes.
///
/// `address` is the account whose storage and balance the code operates on.
/// Under a delegate call that is the delegating account, not the account the
/// code was loaded from.
pub struct ExecContext<'a> {
    engine: &'a mut Engine,
    address: Address,
    caller: Address,
    value: Amount,
    depth: usize,
}

impl ExecContext<'_> {
    pub fn address(&self) -> Address {
        self.address
    }

    pub fn caller(&self) -> Address {
        self.caller
    }

    /// Native value attached to the current frame
    pub fn value(&self) -> Amount {
        self.value
    }

    pub fn timestamp(&self) -> u64 {
        self.engine.world.timestamp
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.engine.world.balance(account)
    }

    pub fn self_balance(&self) -> Amount {
        self.engine.world.balance(&self.address)
    }

    pub fn code_at(&self, account: &Address) -> Option<Arc<dyn Contract>> {
        self.engine.world.code(account)
    }

    pub fn has_code(&self, account: &Address) -> bool {
        self.code_at(account).is_some()
    }

    // Storage

    pub fn load(&self, key: &str) -> Option<Arg> {
        self.engine
            .world
            .account(&self.address)
            .and_then(|account| account.storage.get(key))
            .cloned()
    }

    /// Integer slot, zero when unset.
    pub fn load_uint(&self, key: &str) -> Amount {
        self.load(key)
            .and_then(|value| value.as_uint())
            .unwrap_or_default()
    }

    pub fn load_address(&self, key: &str) -> Option<Address> {
        self.load(key).and_then(|value| value.as_address())
    }

    pub fn load_bool(&self, key: &str) -> bool {
        self.load(key)
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    pub fn store(&mut self, key: impl Into<String>, value: impl Into<Arg>) {
        self.engine
            .world
            .account_mut(self.address)
            .storage
            .insert(key.into(), value.into());
    }

    pub fn clear(&mut self, key: &str) {
        self.engine
            .world
            .account_mut(self.address)
            .storage
            .remove(key);
    }

    /// Every slot whose key starts with `prefix`, in key order.
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<(String, Arg)> {
        self.engine
            .world
            .account(&self.address)
            .map(|account| {
                account
                    .storage
                    .range(prefix.to_string()..)
                    .take_while(|(key, _)| key.starts_with(prefix))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    // Permissions on this account

    pub fn has_permission(&self, actor: &Address, verb: &str) -> bool {
        self.engine
            .world
            .has_permission(*actor, self.address, verb)
    }

    pub fn grant_permission(&mut self, actor: Address, verb: &str) {
        self.engine
            .world
            .permissions
            .insert(Permission::new(actor, self.address, verb));
    }

    pub fn revoke_permission(&mut self, actor: Address, verb: &str) {
        self.engine
            .world
            .permissions
            .remove(&Permission::new(actor, self.address, verb));
    }

    // Interactions

    /// Call another account as this one.
    pub fn call(&mut self, to: Address, data: CallData, value: Amount) -> Result<Arg, Revert> {
        self.engine
            .call(self.address, to, value, &data, self.depth + 1)
    }

    /// Call without attaching value.
    pub fn view(&mut self, to: Address, data: CallData) -> Result<Arg, Revert> {
        self.call(to, data, Amount::zero())
    }

    /// Send native value. Subsystem recipients must accept it through their
    /// `receive` method.
    pub fn send_value(&mut self, to: Address, amount: Amount) -> Result<(), Revert> {
        self.call(to, CallData::new("receive"), amount).map(|_| ())
    }

    /// Execute the code at `code_address` in the context of this account.
    pub fn delegate_call(&mut self, code_address: Address, data: CallData) -> Result<Arg, Revert> {
        self.engine.delegate_call(
            self.address,
            self.caller,
            self.value,
            code_address,
            &data,
            self.depth + 1,
        )
    }

    /// Deploy new code with this account as the creator.
    pub fn create(
        &mut self,
        code: Arc<dyn Contract>,
        args: &[Arg],
        value: Amount,
    ) -> Result<Address, Revert> {
        self.engine
            .create(self.address, code, args, value, self.depth + 1)
    }

    /// Remove the code and storage of this account and move its balance to
    /// `beneficiary`.
    pub fn self_destruct(&mut self, beneficiary: Address) -> Result<(), Revert> {
        let balance = self.self_balance();
        self.engine.transfer(self.address, beneficiary, balance)?;
        let account = self.engine.world.account_mut(self.address);
        account.code = None;
        account.storage.clear();

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Account {:?} self-destructed, {} sent to {:?}",
                self.address,
                balance,
                beneficiary
            );
        }
        Ok(())
    }
}
