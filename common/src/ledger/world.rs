use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::call::Arg;
use crate::contract::Contract;
use crate::primitives::{Address, Amount};

/// Permission record: `actor` may perform `verb` on `target`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    pub actor: Address,
    pub target: Address,
    pub verb: String,
}

impl Permission {
    pub fn new(actor: Address, target: Address, verb: &str) -> Self {
        Self {
            actor,
            target,
            verb: verb.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AccountState {
    pub balance: Amount,
    pub nonce: u64,
    pub code: Option<Arc<dyn Contract>>,
    pub storage: BTreeMap<String, Arg>,
}

impl AccountState {
    pub fn has_code(&self) -> bool {
        self.code.is_some()
    }
}

/// Complete ledger state. Ordered maps keep iteration (and therefore every
/// report derived from it) deterministic.
#[derive(Debug, Clone, Default)]
pub struct WorldState {
    pub accounts: BTreeMap<Address, AccountState>,
    pub permissions: BTreeSet<Permission>,
    pub timestamp: u64,
}

impl WorldState {
    pub fn account(&self, address: &Address) -> Option<&AccountState> {
        self.accounts.get(address)
    }

    pub fn account_mut(&mut self, address: Address) -> &mut AccountState {
        self.accounts.entry(address).or_default()
    }

    pub fn balance(&self, address: &Address) -> Amount {
        self.accounts
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn code(&self, address: &Address) -> Option<Arc<dyn Contract>> {
        self.accounts
            .get(address)
            .and_then(|account| account.code.clone())
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.accounts
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    pub fn has_permission(&self, actor: Address, target: Address, verb: &str) -> bool {
        self.permissions
            .contains(&Permission::new(actor, target, verb))
    }
}
