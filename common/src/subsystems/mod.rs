//! Reference subsystems.
//!
//! Each module implements one stateful service the scenario catalog
//! provisions. They deliberately reproduce the flaws the catalog scenarios
//! exploit; see the module docs for the flaw each one carries.

pub mod abi_smuggling;
pub mod compromised;
pub mod naive_receiver;
pub mod proxy;
pub mod scripted;
pub mod selfie;
pub mod side_entrance;
pub mod token;
pub mod truster;
pub mod unstoppable;
pub mod wallet_mining;

use crate::primitives::Address;

/// Value a flash-loan receiver returns to acknowledge the callback
pub const CALLBACK_SUCCESS: &str = "flash_loan_receiver.on_flash_loan";

/// Marker address standing for the native currency in flash-loan APIs
pub fn native_marker() -> Address {
    Address::repeat_byte(0xee)
}

/// Seconds in a day
pub const DAY: u64 = 24 * 60 * 60;
