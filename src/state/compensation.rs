/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use super::{State, StateError};
use crate::types::{Balance, WalletID};

impl State {
    /// Charge every wallet for the storage it uses and pay the active siblings.
    ///
    /// Each wallet pays `storage_price * compensation_weight * active_siblings`. A wallet that
    /// cannot pay is removed. Every active sibling's tether wallet is then credited with
    /// `storage_price` times the total weight of the wallets that paid. Returns the removed ids.
    pub fn execute_compensation(&mut self) -> Result<Vec<WalletID>, StateError> {
        let price = self.metadata.storage_price;
        if price == Balance::new(0) {
            return Ok(Vec::new());
        }
        let active = Balance::new(self.metadata.active_siblings() as u128);

        let mut removed = Vec::new();
        let mut quorum_weight: u64 = 0;
        for id in self.wallet_tree.post_order() {
            let mut wallet = self.load_wallet(id)?;
            let weight = wallet.compensation_weight();
            let charge = price.mul(Balance::new(weight as u128)).mul(active);
            if charge.compare(&wallet.balance) > 0 {
                log::debug!("wallet {} cannot pay {} and is removed", id, charge);
                self.remove_wallet(id)?;
                removed.push(id);
            } else {
                wallet.balance = wallet.balance.sub(charge);
                self.save_wallet(&wallet)?;
                quorum_weight += weight;
            }
        }

        let compensation = price.mul(Balance::new(quorum_weight as u128));
        let payees: Vec<WalletID> = self
            .metadata
            .siblings
            .iter()
            .filter(|s| s.is_active())
            .map(|s| s.wallet_id)
            .collect();
        for id in payees {
            match self.load_wallet(id) {
                Ok(mut wallet) => {
                    wallet.balance = wallet.balance.add(compensation);
                    self.save_wallet(&wallet)?;
                }
                Err(StateError::WalletNotFound(_)) => {
                    log::warn!("sibling wallet {} is gone, compensation not paid", id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(removed)
    }
}
