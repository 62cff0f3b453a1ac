//! Scenario definitions: actors, deterministic setup, pre- and
//! postconditions.

mod builder;
mod types;

use sha3::{Digest, Keccak256};

pub use builder::{ScenarioBuilder, ScenarioError};
pub use types::{
    AccountRef, ActorDef, ArgSpec, AssetRef, Assertion, CallSpec, Comparison, CustomAssertion,
    Expect, Observation, Predicate, Quantity, SetupAction,
};

/// A validated, immutable scenario definition.
///
/// Build one with [`Scenario::builder`]; the builder rejects references to
/// unknown actors, labels and snapshots.
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    description: String,
    actors: Vec<ActorDef>,
    setup: Vec<SetupAction>,
    preconditions: Vec<Assertion>,
    postconditions: Vec<Assertion>,
}

impl Scenario {
    pub fn builder(name: &str) -> ScenarioBuilder {
        ScenarioBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn actors(&self) -> &[ActorDef] {
        &self.actors
    }

    pub fn setup(&self) -> &[SetupAction] {
        &self.setup
    }

    pub fn preconditions(&self) -> &[Assertion] {
        &self.preconditions
    }

    pub fn postconditions(&self) -> &[Assertion] {
        &self.postconditions
    }

    /// Whether every custom assertion describes itself, so that equal
    /// fingerprints mean equal behaviour.
    pub fn is_comparable(&self) -> bool {
        self.preconditions
            .iter()
            .chain(&self.postconditions)
            .all(|assertion| match assertion {
                Assertion::Custom(custom) => custom.predicate.describe().is_some(),
                _ => true,
            })
    }

    /// Hash of everything that determines how the scenario behaves. Name
    /// and description are left out, so two registrations of the same
    /// content under different names share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(format!("{:?}", self.actors).as_bytes());
        hasher.update(format!("{:?}", self.setup).as_bytes());
        hasher.update(format!("{:?}", self.preconditions).as_bytes());
        hasher.update(format!("{:?}", self.postconditions).as_bytes());
        hex::encode(hasher.finalize())
    }
}
