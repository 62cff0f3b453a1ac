//! Scenario definition types.
//!
//! Everything here is plain data: a scenario names accounts by actor name or
//! subsystem label, never by address, so the same definition can be
//! provisioned into any number of fresh namespaces.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use gauntlet_common::{Address, Amount, Arg, CallData, Contract, FailureKind};

use crate::namespace::Namespace;

/// A scenario participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorDef {
    pub name: String,
    /// Native balance the actor starts with
    pub native_balance: Amount,
    /// Whether the exploit may issue steps as this actor
    pub signer: bool,
}

impl ActorDef {
    /// Actor the exploit can act as.
    pub fn signer(name: &str, native_balance: Amount) -> Self {
        Self {
            name: name.to_string(),
            native_balance,
            signer: true,
        }
    }

    /// Actor that only takes part in setup and verification.
    pub fn observer(name: &str, native_balance: Amount) -> Self {
        Self {
            name: name.to_string(),
            native_balance,
            signer: false,
        }
    }
}

/// Symbolic account reference, resolved against a namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountRef {
    Actor(String),
    /// Subsystem deployed under this label
    Subsystem(String),
    Address(Address),
}

impl AccountRef {
    pub fn actor(name: &str) -> Self {
        AccountRef::Actor(name.to_string())
    }

    pub fn subsystem(label: &str) -> Self {
        AccountRef::Subsystem(label.to_string())
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountRef::Actor(name) => write!(f, "{name}"),
            AccountRef::Subsystem(label) => write!(f, "{label}"),
            AccountRef::Address(address) => write!(f, "0x{}", hex::encode(address.as_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetRef {
    Native,
    /// Token subsystem deployed under this label
    Token(String),
}

impl AssetRef {
    pub fn token(label: &str) -> Self {
        AssetRef::Token(label.to_string())
    }
}

impl fmt::Display for AssetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetRef::Native => write!(f, "native"),
            AssetRef::Token(label) => write!(f, "{label}"),
        }
    }
}

/// Call argument that may refer to namespace accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgSpec {
    Value(Arg),
    Account(AccountRef),
    Payload(CallSpec),
    List(Vec<ArgSpec>),
}

impl From<Arg> for ArgSpec {
    fn from(value: Arg) -> Self {
        ArgSpec::Value(value)
    }
}

impl From<Amount> for ArgSpec {
    fn from(value: Amount) -> Self {
        ArgSpec::Value(Arg::Uint(value))
    }
}

impl From<u64> for ArgSpec {
    fn from(value: u64) -> Self {
        ArgSpec::Value(Arg::from(value))
    }
}

impl From<bool> for ArgSpec {
    fn from(value: bool) -> Self {
        ArgSpec::Value(Arg::Bool(value))
    }
}

impl From<&str> for ArgSpec {
    fn from(value: &str) -> Self {
        ArgSpec::Value(Arg::from(value))
    }
}

impl From<Address> for ArgSpec {
    fn from(value: Address) -> Self {
        ArgSpec::Value(Arg::Address(value))
    }
}

impl From<AccountRef> for ArgSpec {
    fn from(account: AccountRef) -> Self {
        ArgSpec::Account(account)
    }
}

impl From<CallSpec> for ArgSpec {
    fn from(call: CallSpec) -> Self {
        ArgSpec::Payload(call)
    }
}

impl From<Vec<ArgSpec>> for ArgSpec {
    fn from(items: Vec<ArgSpec>) -> Self {
        ArgSpec::List(items)
    }
}

/// Method call with symbolic arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    pub method: String,
    pub args: Vec<ArgSpec>,
}

impl CallSpec {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, value: impl Into<ArgSpec>) -> Self {
        self.args.push(value.into());
        self
    }
}

impl From<CallData> for CallSpec {
    fn from(data: CallData) -> Self {
        Self {
            method: data.method,
            args: data.args.into_iter().map(ArgSpec::Value).collect(),
        }
    }
}

impl fmt::Display for CallSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                ArgSpec::Value(value) => write!(f, "{value}")?,
                ArgSpec::Account(account) => write!(f, "{account}")?,
                ArgSpec::Payload(call) => write!(f, "{call}")?,
                ArgSpec::List(items) => write!(f, "[{} items]", items.len())?,
            }
        }
        write!(f, ")")
    }
}

/// What a setup call must produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Success,
    /// Revert, optionally of a specific kind
    Revert(Option<FailureKind>),
}

/// One step of the deterministic setup
#[derive(Debug, Clone)]
pub enum SetupAction {
    Deploy {
        label: String,
        deployer: String,
        contract: Arc<dyn Contract>,
        constructor: Vec<ArgSpec>,
        value: Amount,
    },
    /// Native: add to the balance. Token: transfer from the token's deployer.
    Fund {
        account: AccountRef,
        asset: AssetRef,
        amount: Amount,
    },
    Call {
        caller: String,
        target: AccountRef,
        call: CallSpec,
        value: Amount,
        expect: Expect,
    },
    GrantPermission {
        actor: AccountRef,
        target: AccountRef,
        verb: String,
    },
    AdvanceTime(u64),
    /// Take a ledger snapshot that quantities can refer to by label
    Snapshot(String),
}

impl SetupAction {
    /// Short human readable form for logs and errors
    pub fn describe(&self) -> String {
        match self {
            SetupAction::Deploy {
                label,
                deployer,
                contract,
                ..
            } => format!("deploy {} as '{}' from {}", contract.kind(), label, deployer),
            SetupAction::Fund {
                account,
                asset,
                amount,
            } => format!("fund {account} with {amount} {asset}"),
            SetupAction::Call {
                caller,
                target,
                call,
                ..
            } => format!("{caller} calls {target}.{call}"),
            SetupAction::GrantPermission {
                actor,
                target,
                verb,
            } => format!("grant {actor} '{verb}' on {target}"),
            SetupAction::AdvanceTime(seconds) => format!("advance time by {seconds}s"),
            SetupAction::Snapshot(label) => format!("snapshot '{label}'"),
        }
    }
}

/// Amount an assertion compares against
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quantity {
    Literal(Amount),
    /// Balance at a snapshot taken during setup
    Recorded {
        snapshot: String,
        account: AccountRef,
        asset: AssetRef,
    },
    Sum(Vec<Quantity>),
}

impl From<Amount> for Quantity {
    fn from(amount: Amount) -> Self {
        Quantity::Literal(amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub fn holds(self, actual: Amount, expected: Amount) -> bool {
        match self {
            Comparison::Eq => actual == expected,
            Comparison::Gt => actual > expected,
            Comparison::Ge => actual >= expected,
            Comparison::Lt => actual < expected,
            Comparison::Le => actual <= expected,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "==",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }
}

/// Result of a custom predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub holds: bool,
    pub expected: String,
    pub actual: String,
}

/// Derived computation over present state.
///
/// Predicates may issue calls through the namespace; the verifier runs them
/// inside a snapshot and restores it afterwards.
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn evaluate(&self, namespace: &mut Namespace) -> anyhow::Result<Observation>;

    /// Canonical description of what the predicate checks, including its
    /// parameters. `None` leaves the predicate opaque, and a scenario holding
    /// an opaque predicate is never treated as a duplicate of another.
    fn describe(&self) -> Option<String> {
        None
    }
}

#[derive(Clone)]
pub struct CustomAssertion {
    pub name: String,
    pub predicate: Arc<dyn Predicate>,
}

impl fmt::Debug for CustomAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomAssertion")
            .field("name", &self.name)
            .field("predicate", &self.predicate.describe())
            .finish()
    }
}

/// Predicate over ledger state
#[derive(Debug, Clone)]
pub enum Assertion {
    Balance {
        account: AccountRef,
        asset: AssetRef,
        cmp: Comparison,
        expected: Quantity,
    },
    Code {
        account: AccountRef,
        present: bool,
    },
    Permission {
        actor: AccountRef,
        target: AccountRef,
        verb: String,
        granted: bool,
    },
    CallReverts {
        caller: String,
        target: AccountRef,
        call: CallSpec,
        value: Amount,
        kind: Option<FailureKind>,
    },
    CallSucceeds {
        caller: String,
        target: AccountRef,
        call: CallSpec,
        value: Amount,
        /// Expected return value, if checked
        returns: Option<ArgSpec>,
    },
    /// Total balance across `accounts`
    Conservation {
        asset: AssetRef,
        accounts: Vec<AccountRef>,
        expected: Quantity,
    },
    Custom(CustomAssertion),
}

impl Assertion {
    pub fn balance(account: AccountRef, asset: AssetRef, cmp: Comparison, expected: impl Into<Quantity>) -> Self {
        Assertion::Balance {
            account,
            asset,
            cmp,
            expected: expected.into(),
        }
    }

    pub fn balance_eq(account: AccountRef, asset: AssetRef, expected: impl Into<Quantity>) -> Self {
        Self::balance(account, asset, Comparison::Eq, expected)
    }

    pub fn code(account: AccountRef, present: bool) -> Self {
        Assertion::Code { account, present }
    }

    pub fn reverts(caller: &str, target: AccountRef, call: CallSpec, kind: Option<FailureKind>) -> Self {
        Assertion::CallReverts {
            caller: caller.to_string(),
            target,
            call,
            value: Amount::zero(),
            kind,
        }
    }

    pub fn succeeds(caller: &str, target: AccountRef, call: CallSpec) -> Self {
        Assertion::CallSucceeds {
            caller: caller.to_string(),
            target,
            call,
            value: Amount::zero(),
            returns: None,
        }
    }

    pub fn returns(caller: &str, target: AccountRef, call: CallSpec, expected: impl Into<ArgSpec>) -> Self {
        Assertion::CallSucceeds {
            caller: caller.to_string(),
            target,
            call,
            value: Amount::zero(),
            returns: Some(expected.into()),
        }
    }

    pub fn permission(actor: AccountRef, target: AccountRef, verb: &str, granted: bool) -> Self {
        Assertion::Permission {
            actor,
            target,
            verb: verb.to_string(),
            granted,
        }
    }

    pub fn custom(name: &str, predicate: Arc<dyn Predicate>) -> Self {
        Assertion::Custom(CustomAssertion {
            name: name.to_string(),
            predicate,
        })
    }

    /// Human readable form used in verdicts
    pub fn describe(&self) -> String {
        match self {
            Assertion::Balance {
                account,
                asset,
                cmp,
                expected,
            } => format!(
                "balance({account}, {asset}) {} {}",
                cmp.symbol(),
                describe_quantity(expected)
            ),
            Assertion::Code { account, present } => {
                if *present {
                    format!("code present at {account}")
                } else {
                    format!("no code at {account}")
                }
            }
            Assertion::Permission {
                actor,
                target,
                verb,
                granted,
            } => format!(
                "{actor} {} '{verb}' on {target}",
                if *granted { "may" } else { "may not" }
            ),
            Assertion::CallReverts {
                caller,
                target,
                call,
                kind,
                ..
            } => match kind {
                Some(kind) => format!("{caller} -> {target}.{call} reverts ({kind})"),
                None => format!("{caller} -> {target}.{call} reverts"),
            },
            Assertion::CallSucceeds {
                caller,
                target,
                call,
                ..
            } => format!("{caller} -> {target}.{call} succeeds"),
            Assertion::Conservation {
                asset,
                accounts,
                expected,
            } => format!(
                "sum of {asset} over {} accounts == {}",
                accounts.len(),
                describe_quantity(expected)
            ),
            Assertion::Custom(custom) => custom.name.clone(),
        }
    }
}

fn describe_quantity(quantity: &Quantity) -> String {
    match quantity {
        Quantity::Literal(amount) => amount.to_string(),
        Quantity::Recorded {
            snapshot,
            account,
            asset,
        } => format!("balance({account}, {asset})@{snapshot}"),
        Quantity::Sum(parts) => parts
            .iter()
            .map(describe_quantity)
            .collect::<Vec<_>>()
            .join(" + "),
    }
}
