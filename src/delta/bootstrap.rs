/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bringing an engine to life, either as the first sibling of a new quorum or from a peer's
//! snapshot.

use super::scripts::{default_script, fountain_script};
use super::{DeltaError, Engine};
use crate::state::{Metadata, Sibling, Wallet};
use crate::types::{
    Balance, PublicKeyBytes, WalletID, BOOTSTRAP_SIBLING_BALANCE, FOUNTAIN_BALANCE,
    FOUNTAIN_WALLET_ID, SNAPSHOT_LENGTH,
};

impl Engine {
    /// Genesis: create the fountain wallet and `sibling`'s tether wallet, and make `sibling` the
    /// quorum's first, already active, sibling. Returns its slot.
    pub fn bootstrap(
        &mut self,
        sibling: Sibling,
        tether_wallet: WalletID,
        tether_public_key: &PublicKeyBytes,
    ) -> Result<u8, DeltaError> {
        self.state.insert_wallet(
            Wallet::new(FOUNTAIN_WALLET_ID, Balance::new(FOUNTAIN_BALANCE), fountain_script()),
            true,
        )?;
        self.state.insert_wallet(
            Wallet::new(
                tether_wallet,
                Balance::new(BOOTSTRAP_SIBLING_BALANCE),
                default_script(tether_public_key),
            ),
            true,
        )?;
        let slot = self.state.add_sibling(tether_wallet, sibling)?;
        self.state.metadata.siblings[slot as usize].status = 0;

        self.reset_history();
        self.identify();
        Ok(slot)
    }

    /// Adopt the metadata of a peer's snapshot. Only for joining participants.
    pub fn bootstrap_set_metadata(&mut self, metadata: Metadata) {
        self.state.metadata = metadata;
    }

    /// Adopt one wallet of a peer's snapshot, keeping its event counters.
    pub fn bootstrap_insert_wallet(&mut self, wallet: Wallet) -> Result<(), DeltaError> {
        Ok(self.state.insert_wallet(wallet, false)?)
    }

    /// Finish adopting a snapshot: the next compile starts a fresh history at the snapshot's
    /// height.
    pub fn bootstrap_join_setup(&mut self) {
        self.reset_history();
        self.identify();
    }

    fn reset_history(&mut self) {
        self.active_history_head = None;
        self.active_history_length = SNAPSHOT_LENGTH;
        self.recent_history_head = None;
    }
}
