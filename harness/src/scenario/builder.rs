use std::collections::HashSet;
use std::sync::Arc;

use gauntlet_common::{Amount, Contract};
use thiserror::Error;

use super::types::{
    AccountRef, ActorDef, ArgSpec, AssetRef, Assertion, CallSpec, Expect, Quantity, SetupAction,
};
use super::Scenario;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScenarioError {
    #[error("scenario name must not be empty")]
    EmptyName,
    #[error("actor '{0}' is defined more than once")]
    DuplicateActor(String),
    #[error("label '{0}' is used more than once")]
    DuplicateLabel(String),
    #[error("snapshot '{0}' is taken more than once")]
    DuplicateSnapshot(String),
    #[error("{context}: unknown actor '{name}'")]
    UnknownActor { context: String, name: String },
    #[error("{context}: unknown subsystem label '{label}'")]
    UnknownLabel { context: String, label: String },
    #[error("{context}: unknown snapshot '{label}'")]
    UnknownSnapshot { context: String, label: String },
    #[error("scenario has no postconditions")]
    NoPostconditions,
    #[error("scenario '{0}' is already registered")]
    DuplicateName(String),
    #[error("no scenario named '{0}'")]
    UnknownScenario(String),
}

/// Incrementally assembles a [`Scenario`]; `build` validates it.
///
/// Setup actions may only refer to actors and to subsystems deployed by an
/// earlier action. Assertions may refer to any label and to any snapshot.
#[derive(Debug, Clone)]
pub struct ScenarioBuilder {
    name: String,
    description: String,
    actors: Vec<ActorDef>,
    setup: Vec<SetupAction>,
    preconditions: Vec<Assertion>,
    postconditions: Vec<Assertion>,
}

impl ScenarioBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            actors: Vec::new(),
            setup: Vec::new(),
            preconditions: Vec::new(),
            postconditions: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn actor(mut self, actor: ActorDef) -> Self {
        self.actors.push(actor);
        self
    }

    pub fn action(mut self, action: SetupAction) -> Self {
        self.setup.push(action);
        self
    }

    pub fn deploy(
        self,
        label: &str,
        deployer: &str,
        contract: Arc<dyn Contract>,
        constructor: Vec<ArgSpec>,
    ) -> Self {
        self.deploy_with_value(label, deployer, contract, constructor, Amount::zero())
    }

    pub fn deploy_with_value(
        self,
        label: &str,
        deployer: &str,
        contract: Arc<dyn Contract>,
        constructor: Vec<ArgSpec>,
        value: Amount,
    ) -> Self {
        self.action(SetupAction::Deploy {
            label: label.to_string(),
            deployer: deployer.to_string(),
            contract,
            constructor,
            value,
        })
    }

    pub fn fund(self, account: AccountRef, asset: AssetRef, amount: Amount) -> Self {
        self.action(SetupAction::Fund {
            account,
            asset,
            amount,
        })
    }

    /// Setup call that must succeed.
    pub fn call(self, caller: &str, target: AccountRef, call: CallSpec) -> Self {
        self.action(SetupAction::Call {
            caller: caller.to_string(),
            target,
            call,
            value: Amount::zero(),
            expect: Expect::Success,
        })
    }

    pub fn grant(self, actor: AccountRef, target: AccountRef, verb: &str) -> Self {
        self.action(SetupAction::GrantPermission {
            actor,
            target,
            verb: verb.to_string(),
        })
    }

    pub fn advance_time(self, seconds: u64) -> Self {
        self.action(SetupAction::AdvanceTime(seconds))
    }

    pub fn snapshot(self, label: &str) -> Self {
        self.action(SetupAction::Snapshot(label.to_string()))
    }

    pub fn precondition(mut self, assertion: Assertion) -> Self {
        self.preconditions.push(assertion);
        self
    }

    pub fn postcondition(mut self, assertion: Assertion) -> Self {
        self.postconditions.push(assertion);
        self
    }

    pub fn build(self) -> Result<Scenario, ScenarioError> {
        if self.name.trim().is_empty() {
            return Err(ScenarioError::EmptyName);
        }

        let mut actors = HashSet::new();
        for actor in &self.actors {
            if !actors.insert(actor.name.as_str()) {
                return Err(ScenarioError::DuplicateActor(actor.name.clone()));
            }
        }

        // setup is validated in order: labels and snapshots become visible
        // once the action introducing them has run
        let mut labels: HashSet<&str> = HashSet::new();
        let mut snapshots: HashSet<&str> = HashSet::new();
        for (index, action) in self.setup.iter().enumerate() {
            let checker = Checker {
                actors: &actors,
                labels: &labels,
                snapshots: &snapshots,
            };
            checker.action(&format!("setup action {index}"), action)?;
            match action {
                SetupAction::Deploy { label, .. } => {
                    if actors.contains(label.as_str()) || !labels.insert(label.as_str()) {
                        return Err(ScenarioError::DuplicateLabel(label.clone()));
                    }
                }
                SetupAction::Snapshot(label) => {
                    if !snapshots.insert(label.as_str()) {
                        return Err(ScenarioError::DuplicateSnapshot(label.clone()));
                    }
                }
                _ => {}
            }
        }

        let checker = Checker {
            actors: &actors,
            labels: &labels,
            snapshots: &snapshots,
        };

        for (index, assertion) in self.preconditions.iter().enumerate() {
            checker.assertion(&format!("precondition {index}"), assertion)?;
        }
        if self.postconditions.is_empty() {
            return Err(ScenarioError::NoPostconditions);
        }
        for (index, assertion) in self.postconditions.iter().enumerate() {
            checker.assertion(&format!("postcondition {index}"), assertion)?;
        }

        Ok(Scenario {
            name: self.name,
            description: self.description,
            actors: self.actors,
            setup: self.setup,
            preconditions: self.preconditions,
            postconditions: self.postconditions,
        })
    }
}

/// Reference checks against the names known at one point of the setup
struct Checker<'a> {
    actors: &'a HashSet<&'a str>,
    labels: &'a HashSet<&'a str>,
    snapshots: &'a HashSet<&'a str>,
}

impl Checker<'_> {
    fn actor(&self, context: &str, name: &str) -> Result<(), ScenarioError> {
        if self.actors.contains(name) {
            Ok(())
        } else {
            Err(ScenarioError::UnknownActor {
                context: context.to_string(),
                name: name.to_string(),
            })
        }
    }

    fn label(&self, context: &str, label: &str) -> Result<(), ScenarioError> {
        if self.labels.contains(label) {
            Ok(())
        } else {
            Err(ScenarioError::UnknownLabel {
                context: context.to_string(),
                label: label.to_string(),
            })
        }
    }

    fn account(&self, context: &str, account: &AccountRef) -> Result<(), ScenarioError> {
        match account {
            AccountRef::Actor(name) => self.actor(context, name),
            AccountRef::Subsystem(label) => self.label(context, label),
            AccountRef::Address(_) => Ok(()),
        }
    }

    fn asset(&self, context: &str, asset: &AssetRef) -> Result<(), ScenarioError> {
        match asset {
            AssetRef::Native => Ok(()),
            AssetRef::Token(label) => self.label(context, label),
        }
    }

    fn arg(&self, context: &str, arg: &ArgSpec) -> Result<(), ScenarioError> {
        match arg {
            ArgSpec::Value(_) => Ok(()),
            ArgSpec::Account(account) => self.account(context, account),
            ArgSpec::Payload(call) => self.call(context, call),
            ArgSpec::List(items) => items.iter().try_for_each(|item| self.arg(context, item)),
        }
    }

    fn call(&self, context: &str, call: &CallSpec) -> Result<(), ScenarioError> {
        call.args.iter().try_for_each(|arg| self.arg(context, arg))
    }

    fn quantity(&self, context: &str, quantity: &Quantity) -> Result<(), ScenarioError> {
        match quantity {
            Quantity::Literal(_) => Ok(()),
            Quantity::Recorded {
                snapshot,
                account,
                asset,
            } => {
                if !self.snapshots.contains(snapshot.as_str()) {
                    return Err(ScenarioError::UnknownSnapshot {
                        context: context.to_string(),
                        label: snapshot.clone(),
                    });
                }
                self.account(context, account)?;
                self.asset(context, asset)
            }
            Quantity::Sum(parts) => parts.iter().try_for_each(|part| self.quantity(context, part)),
        }
    }

    fn action(&self, context: &str, action: &SetupAction) -> Result<(), ScenarioError> {
        match action {
            SetupAction::Deploy {
                deployer,
                constructor,
                ..
            } => {
                self.actor(context, deployer)?;
                constructor.iter().try_for_each(|arg| self.arg(context, arg))
            }
            SetupAction::Fund { account, asset, .. } => {
                self.account(context, account)?;
                self.asset(context, asset)
            }
            SetupAction::Call {
                caller,
                target,
                call,
                ..
            } => {
                self.actor(context, caller)?;
                self.account(context, target)?;
                self.call(context, call)
            }
            SetupAction::GrantPermission { actor, target, .. } => {
                self.account(context, actor)?;
                self.account(context, target)
            }
            SetupAction::AdvanceTime(_) | SetupAction::Snapshot(_) => Ok(()),
        }
    }

    fn assertion(&self, context: &str, assertion: &Assertion) -> Result<(), ScenarioError> {
        match assertion {
            Assertion::Balance {
                account,
                asset,
                expected,
                ..
            } => {
                self.account(context, account)?;
                self.asset(context, asset)?;
                self.quantity(context, expected)
            }
            Assertion::Code { account, .. } => self.account(context, account),
            Assertion::Permission { actor, target, .. } => {
                self.account(context, actor)?;
                self.account(context, target)
            }
            Assertion::CallReverts {
                caller,
                target,
                call,
                ..
            } => {
                self.actor(context, caller)?;
                self.account(context, target)?;
                self.call(context, call)
            }
            Assertion::CallSucceeds {
                caller,
                target,
                call,
                returns,
                ..
            } => {
                self.actor(context, caller)?;
                self.account(context, target)?;
                self.call(context, call)?;
                match returns {
                    Some(expected) => self.arg(context, expected),
                    None => Ok(()),
                }
            }
            Assertion::Conservation {
                asset,
                accounts,
                expected,
            } => {
                self.asset(context, asset)?;
                accounts
                    .iter()
                    .try_for_each(|account| self.account(context, account))?;
                self.quantity(context, expected)
            }
            Assertion::Custom(_) => Ok(()),
        }
    }
}
