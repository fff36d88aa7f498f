/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::types::{Address, PublicKeyBytes, WalletID, SIBLING_PASSIVE_WINDOW};
use borsh::{BorshDeserialize, BorshSerialize};

/// Status of a slot that no host fills.
pub const INACTIVE: u8 = u8::MAX;

/// Status of a fully participating sibling.
pub const ACTIVE: u8 = 0;

/// Public record of a host occupying one of the quorum's slots.
///
/// A sibling with `status == 0` is active: it must heartbeat every block and is paid through
/// compensation. Any status between 1 and 254 is passive: the sibling takes part in consensus but
/// its heartbeats are not required, and the status counts down by one every compile until the
/// sibling becomes active.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Sibling {
    pub status: u8,
    pub index: u8,
    pub address: Address,
    pub public_key: PublicKeyBytes,
    pub wallet_id: WalletID,
}

impl Sibling {
    /// A sibling that will ask to be added to the quorum. The slot and wallet are assigned when
    /// the request executes.
    pub fn candidate(address: Address, public_key: PublicKeyBytes) -> Sibling {
        Sibling {
            status: SIBLING_PASSIVE_WINDOW,
            index: 0,
            address,
            public_key,
            wallet_id: WalletID::new(0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ACTIVE
    }

    pub fn is_inactive(&self) -> bool {
        self.status == INACTIVE
    }

    pub fn is_passive(&self) -> bool {
        !self.is_active() && !self.is_inactive()
    }

    /// Whether this record describes the host at `address` holding `public_key`.
    pub fn is_identity(&self, address: &Address, public_key: &PublicKeyBytes) -> bool {
        !self.is_inactive() && self.address == *address && self.public_key == *public_key
    }
}

impl Default for Sibling {
    fn default() -> Self {
        Sibling {
            status: INACTIVE,
            index: 0,
            address: Address::default(),
            public_key: [0; 32],
            wallet_id: WalletID::new(0),
        }
    }
}
