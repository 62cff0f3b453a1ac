//! Isolated per-run ledger context.
//!
//! A [`Namespace`] owns one ledger instance together with the names the
//! scenario gave its accounts. It is threaded through provisioning, the
//! exploit run and verification, then dropped. Nothing is shared between
//! namespaces.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use gauntlet_common::ledger::{InMemoryLedger, LedgerConfig};
use gauntlet_common::primitives::hex_address;
use gauntlet_common::{Address, Arg, Asset, CallData, LedgerService, SnapshotId};
use indexmap::IndexMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::runner::ExploitView;
use crate::scenario::{AccountRef, ArgSpec, AssetRef, CallSpec};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unknown actor '{0}'")]
    UnknownActor(String),
    #[error("unknown subsystem label '{0}'")]
    UnknownLabel(String),
    #[error("unknown snapshot '{0}'")]
    UnknownSnapshot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorInfo {
    pub address: Address,
    pub signer: bool,
}

/// Marks a namespace as checked out until dropped
#[derive(Debug)]
pub struct Lease {
    id: String,
    active: Arc<Mutex<BTreeSet<String>>>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.active.lock().remove(&self.id);
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Namespace {} discarded", self.id);
        }
    }
}

pub struct Namespace {
    id: String,
    ledger: Box<dyn LedgerService>,
    actors: IndexMap<String, ActorInfo>,
    book: IndexMap<String, Address>,
    deployers: IndexMap<String, Address>,
    snapshots: IndexMap<String, SnapshotId>,
    _lease: Lease,
}

impl Namespace {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ledger(&mut self) -> &mut dyn LedgerService {
        self.ledger.as_mut()
    }

    pub fn ledger_ref(&self) -> &dyn LedgerService {
        self.ledger.as_ref()
    }

    pub fn register_actor(&mut self, name: &str, address: Address, signer: bool) {
        self.actors
            .insert(name.to_string(), ActorInfo { address, signer });
    }

    pub fn register_subsystem(&mut self, label: &str, address: Address, deployer: Address) {
        self.book.insert(label.to_string(), address);
        self.deployers.insert(label.to_string(), deployer);
    }

    pub fn record_snapshot(&mut self, label: &str, id: SnapshotId) {
        self.snapshots.insert(label.to_string(), id);
    }

    pub fn actors(&self) -> &IndexMap<String, ActorInfo> {
        &self.actors
    }

    pub fn subsystems(&self) -> &IndexMap<String, Address> {
        &self.book
    }

    pub fn actor(&self, name: &str) -> Result<&ActorInfo, ResolveError> {
        self.actors
            .get(name)
            .ok_or_else(|| ResolveError::UnknownActor(name.to_string()))
    }

    pub fn subsystem(&self, label: &str) -> Result<Address, ResolveError> {
        self.book
            .get(label)
            .copied()
            .ok_or_else(|| ResolveError::UnknownLabel(label.to_string()))
    }

    /// Account that deployed the subsystem under `label`
    pub fn deployer_of(&self, label: &str) -> Result<Address, ResolveError> {
        self.deployers
            .get(label)
            .copied()
            .ok_or_else(|| ResolveError::UnknownLabel(label.to_string()))
    }

    pub fn snapshot(&self, label: &str) -> Result<SnapshotId, ResolveError> {
        self.snapshots
            .get(label)
            .copied()
            .ok_or_else(|| ResolveError::UnknownSnapshot(label.to_string()))
    }

    pub fn resolve_account(&self, account: &AccountRef) -> Result<Address, ResolveError> {
        match account {
            AccountRef::Actor(name) => Ok(self.actor(name)?.address),
            AccountRef::Subsystem(label) => self.subsystem(label),
            AccountRef::Address(address) => Ok(*address),
        }
    }

    pub fn resolve_asset(&self, asset: &AssetRef) -> Result<Asset, ResolveError> {
        match asset {
            AssetRef::Native => Ok(Asset::Native),
            AssetRef::Token(label) => Ok(Asset::Token(self.subsystem(label)?)),
        }
    }

    pub fn resolve_arg(&self, arg: &ArgSpec) -> Result<Arg, ResolveError> {
        match arg {
            ArgSpec::Value(value) => Ok(value.clone()),
            ArgSpec::Account(account) => Ok(Arg::Address(self.resolve_account(account)?)),
            ArgSpec::Payload(call) => Ok(Arg::from(self.resolve_call(call)?)),
            ArgSpec::List(items) => Ok(Arg::List(
                items
                    .iter()
                    .map(|item| self.resolve_arg(item))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }

    pub fn resolve_call(&self, call: &CallSpec) -> Result<CallData, ResolveError> {
        let mut data = CallData::new(call.method.clone());
        for arg in &call.args {
            data.args.push(self.resolve_arg(arg)?);
        }
        Ok(data)
    }

    /// Read-only view handed to exploit planning.
    pub async fn exploit_view(&self) -> anyhow::Result<ExploitView> {
        let mut view = ExploitView::new(self.ledger.timestamp().await?);
        for (name, info) in &self.actors {
            let nonce = self.ledger.nonce(info.address).await?;
            view.add_actor(name, info.address, info.signer, nonce);
        }
        for (label, address) in &self.book {
            let nonce = self.ledger.nonce(*address).await?;
            view.add_subsystem(label, *address, nonce);
        }
        Ok(view)
    }

    /// Human readable name for an address known to this namespace
    pub fn name_of(&self, address: &Address) -> String {
        self.actors
            .iter()
            .find(|(_, info)| info.address == *address)
            .map(|(name, _)| name.clone())
            .or_else(|| {
                self.book
                    .iter()
                    .find(|(_, known)| *known == address)
                    .map(|(label, _)| label.clone())
            })
            .unwrap_or_else(|| hex_address(address))
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.id)
            .field("ledger", &self.ledger.name())
            .field("actors", &self.actors)
            .field("book", &self.book)
            .finish()
    }
}

/// Hands out fresh namespaces, one per scenario run.
#[derive(Debug, Clone)]
pub struct NamespaceFactory {
    config: LedgerConfig,
    seq: Arc<AtomicU64>,
    active: Arc<Mutex<BTreeSet<String>>>,
}

impl NamespaceFactory {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            config,
            seq: Arc::new(AtomicU64::new(0)),
            active: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Check out a namespace backed by a new in-memory ledger.
    pub fn checkout(&self, scenario: &str) -> Namespace {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{scenario}#{seq}");
        let ledger = InMemoryLedger::with_config(id.clone(), self.config.clone());
        self.checkout_with(id, Box::new(ledger))
    }

    /// Check out a namespace over an existing ledger backend.
    pub fn checkout_with(&self, id: String, ledger: Box<dyn LedgerService>) -> Namespace {
        self.active.lock().insert(id.clone());
        log::debug!("Namespace {} checked out on ledger '{}'", id, ledger.name());
        Namespace {
            id: id.clone(),
            ledger,
            actors: IndexMap::new(),
            book: IndexMap::new(),
            deployers: IndexMap::new(),
            snapshots: IndexMap::new(),
            _lease: Lease {
                id,
                active: Arc::clone(&self.active),
            },
        }
    }

    /// Identifiers of namespaces currently checked out
    pub fn active(&self) -> Vec<String> {
        self.active.lock().iter().cloned().collect()
    }
}

impl Default for NamespaceFactory {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}
