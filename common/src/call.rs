//! Call payloads.
//!
//! A [`CallData`] names a subsystem method and carries its typed arguments.
//! Arguments can themselves be nested calls, which is how lending pools
//! receive callback payloads and governance queues actions.

use crate::error::{FailureKind, Revert};
use crate::primitives::{Address, Amount};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single typed argument or return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arg {
    /// No value (empty return data)
    Unit,
    Uint(Amount),
    Address(Address),
    Bool(bool),
    Text(String),
    Bytes(Vec<u8>),
    /// Nested call payload
    Call(Box<CallData>),
    List(Vec<Arg>),
}

impl Arg {
    pub fn as_uint(&self) -> Option<Amount> {
        match self {
            Arg::Uint(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self {
            Arg::Address(address) => Some(*address),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Arg::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Arg::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallData> {
        match self {
            Arg::Call(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Arg]> {
        match self {
            Arg::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Arg::Unit)
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Unit => write!(f, "()"),
            Arg::Uint(value) => write!(f, "{value}"),
            Arg::Address(address) => write!(f, "0x{}", hex::encode(address.as_bytes())),
            Arg::Bool(flag) => write!(f, "{flag}"),
            Arg::Text(text) => write!(f, "{text:?}"),
            Arg::Bytes(bytes) => write!(f, "0x{}", hex::encode(bytes)),
            Arg::Call(call) => write!(f, "{call}"),
            Arg::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<Amount> for Arg {
    fn from(value: Amount) -> Self {
        Arg::Uint(value)
    }
}

impl From<u64> for Arg {
    fn from(value: u64) -> Self {
        Arg::Uint(U256::from(value))
    }
}

impl From<Address> for Arg {
    fn from(address: Address) -> Self {
        Arg::Address(address)
    }
}

impl From<bool> for Arg {
    fn from(flag: bool) -> Self {
        Arg::Bool(flag)
    }
}

impl From<&str> for Arg {
    fn from(text: &str) -> Self {
        Arg::Text(text.to_string())
    }
}

impl From<String> for Arg {
    fn from(text: String) -> Self {
        Arg::Text(text)
    }
}

impl From<CallData> for Arg {
    fn from(call: CallData) -> Self {
        Arg::Call(Box::new(call))
    }
}

impl From<Vec<Arg>> for Arg {
    fn from(items: Vec<Arg>) -> Self {
        Arg::List(items)
    }
}

/// Method name plus positional arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallData {
    pub method: String,
    #[serde(default)]
    pub args: Vec<Arg>,
}

impl CallData {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, value: impl Into<Arg>) -> Self {
        self.args.push(value.into());
        self
    }

    fn missing(&self, index: usize, expected: &str) -> Revert {
        Revert::new(
            FailureKind::InvalidInput,
            format!(
                "{}: argument {} is not {}",
                self.method, index, expected
            ),
        )
    }

    pub fn get(&self, index: usize) -> Result<&Arg, Revert> {
        self.args
            .get(index)
            .ok_or_else(|| self.missing(index, "present"))
    }

    pub fn uint(&self, index: usize) -> Result<Amount, Revert> {
        self.get(index)?
            .as_uint()
            .ok_or_else(|| self.missing(index, "an integer"))
    }

    pub fn address(&self, index: usize) -> Result<Address, Revert> {
        self.get(index)?
            .as_address()
            .ok_or_else(|| self.missing(index, "an address"))
    }

    pub fn bool(&self, index: usize) -> Result<bool, Revert> {
        self.get(index)?
            .as_bool()
            .ok_or_else(|| self.missing(index, "a boolean"))
    }

    pub fn text(&self, index: usize) -> Result<&str, Revert> {
        self.get(index)?
            .as_text()
            .ok_or_else(|| self.missing(index, "text"))
    }

    pub fn call(&self, index: usize) -> Result<&CallData, Revert> {
        self.get(index)?
            .as_call()
            .ok_or_else(|| self.missing(index, "a call payload"))
    }

    pub fn list(&self, index: usize) -> Result<&[Arg], Revert> {
        self.get(index)?
            .as_list()
            .ok_or_else(|| self.missing(index, "a list"))
    }

    /// Argument list of addresses.
    pub fn addresses(&self, index: usize) -> Result<Vec<Address>, Revert> {
        self.list(index)?
            .iter()
            .map(|item| {
                item.as_address()
                    .ok_or_else(|| self.missing(index, "a list of addresses"))
            })
            .collect()
    }
}

impl fmt::Display for CallData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ")")
    }
}

/// A top-level transaction submitted to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    pub from: Address,
    pub to: Address,
    #[serde(default)]
    pub value: Amount,
    pub data: CallData,
}

impl Call {
    pub fn new(from: Address, to: Address, data: CallData) -> Self {
        Self {
            from,
            to,
            value: Amount::zero(),
            data,
        }
    }

    pub fn with_value(mut self, value: Amount) -> Self {
        self.value = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_accessors() {
        let target = Address::repeat_byte(1);
        let data = CallData::new("flash_loan")
            .arg(10u64)
            .arg(target)
            .arg(CallData::new("approve").arg(true));

        assert_eq!(data.uint(0).unwrap(), U256::from(10));
        assert_eq!(data.address(1).unwrap(), target);
        assert_eq!(data.call(2).unwrap().method, "approve");
    }

    #[test]
    fn test_wrong_type_is_invalid_input() {
        let data = CallData::new("transfer").arg("not a number");
        let revert = data.uint(0).unwrap_err();
        assert_eq!(revert.kind, FailureKind::InvalidInput);

        let revert = data.address(3).unwrap_err();
        assert_eq!(revert.kind, FailureKind::InvalidInput);
    }

    #[test]
    fn test_display() {
        let data = CallData::new("transfer").arg(5u64).arg(true);
        assert_eq!(data.to_string(), "transfer(5, true)");
    }
}
