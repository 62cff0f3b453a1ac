//! Ledger primitives.
//!
//! Accounts are 20-byte addresses and every amount is a 256-bit unsigned
//! integer, so 18-decimal token quantities never overflow.

use primitive_types::{H160, U256};
use sha3::{Digest, Keccak256};
use std::fmt;

/// Account identifier (externally owned or subsystem)
pub type Address = H160;

/// Non-negative resource amount
pub type Amount = U256;

/// Number of decimals used by the native currency and the reference tokens
pub const DECIMALS: u32 = 18;

/// Asset identifier: the native currency or a token-type subsystem.
///
/// Non-fungible collections are tokens too; their balance is the number of
/// units the holder owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Asset {
    /// Native currency held directly by accounts
    Native,
    /// Token tracked by the subsystem deployed at this address
    Token(Address),
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Token(address) => write!(f, "token:{}", hex_address(address)),
        }
    }
}

/// Whole units scaled by 10^18.
pub fn ether(units: u64) -> Amount {
    U256::from(units) * U256::exp10(DECIMALS as usize)
}

/// `units` scaled by 10^`decimals`, or `None` when the result does not fit
/// in 256 bits.
pub fn scaled(units: u64, decimals: u32) -> Option<Amount> {
    U256::from(10u8)
        .checked_pow(U256::from(decimals))?
        .checked_mul(U256::from(units))
}

/// Address of a contract created by `creator` when its nonce is `nonce`.
///
/// Keccak-256 over the creator bytes and the big-endian nonce, keeping the
/// low 20 bytes. Scenarios rely on this to name addresses before anything is
/// deployed at them.
pub fn derive_contract_address(creator: &Address, nonce: u64) -> Address {
    let mut hasher = Keccak256::new();
    hasher.update(creator.as_bytes());
    hasher.update(nonce.to_be_bytes());
    let digest = hasher.finalize();
    H160::from_slice(&digest[12..])
}

/// Deterministic address for a named actor.
pub fn actor_address(name: &str) -> Address {
    let mut hasher = Keccak256::new();
    hasher.update(b"actor:");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    H160::from_slice(&digest[12..])
}

/// Full lowercase hex with `0x` prefix (the `Display` impl of `H160` abbreviates).
pub fn hex_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Storage key built from a prefix and a list of addresses.
pub fn slot(prefix: &str, addresses: &[&Address]) -> String {
    let mut key = String::from(prefix);
    for address in addresses {
        key.push('/');
        key.push_str(&hex::encode(address.as_bytes()));
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ether_scaling() {
        assert_eq!(ether(1), U256::from(1_000_000_000_000_000_000u128));
        assert_eq!(ether(0), U256::zero());
        assert_eq!(scaled(5, 2), Some(U256::from(500)));
        assert_eq!(scaled(3, 18), Some(ether(3)));
    }

    #[test]
    fn test_scaled_overflow_is_none() {
        assert_eq!(scaled(0, 77), Some(U256::zero()));
        assert_eq!(scaled(u64::MAX, 59), None);
        assert_eq!(scaled(1, 78), None);
        assert_eq!(scaled(1, u32::MAX), None);
    }

    #[test]
    fn test_contract_address_is_deterministic() {
        let creator = actor_address("deployer");
        let a = derive_contract_address(&creator, 0);
        let b = derive_contract_address(&creator, 0);
        let c = derive_contract_address(&creator, 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_actor_addresses_differ() {
        assert_ne!(actor_address("player"), actor_address("deployer"));
        assert_ne!(actor_address("player"), Address::zero());
    }

    #[test]
    fn test_slot_format() {
        let holder = Address::repeat_byte(0xab);
        assert_eq!(
            slot("balance", &[&holder]),
            format!("balance/{}", "ab".repeat(20))
        );
    }
}
