/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The operations scripts reach through the interpreter's transactional instructions.
//!
//! Each takes the calling wallet by mutable reference. The caller wallet is saved by the
//! interpreter when the script ends; any other wallet touched here is saved immediately and
//! journaled so that a rejected script can be undone.

use crate::merkle::segment_hash;
use crate::state::{EventKind, SectorUpdate, State, StateError, Undo, UpdateSectorArgs, Wallet};
use crate::types::{
    Balance, CryptoHash, WalletID, ATOMS_PER_QUORUM, ATOMS_PER_SECTOR, ATOM_SIZE, MAX_DEADLINE,
    MAX_K, MAX_UPDATES, MIN_K, QUORUM_SIZE,
};
use std::fs;

fn valid_k(k: u8) -> bool {
    (MIN_K..=MAX_K).contains(&k)
}

impl State {
    /// Create wallet `child_id`, funded with `balance` out of `parent`'s balance.
    pub fn create_wallet(
        &mut self,
        parent: &mut Wallet,
        child_id: WalletID,
        balance: Balance,
        script: Vec<u8>,
    ) -> Result<(), StateError> {
        if parent.balance.compare(&balance) < 0 {
            return Err(StateError::InsufficientBalance);
        }
        self.insert_wallet(Wallet::new(child_id, balance, script), true)?;
        parent.balance = parent.balance.sub(balance);
        Ok(())
    }

    pub fn send_coin(
        &mut self,
        source: &mut Wallet,
        amount: Balance,
        destination: WalletID,
    ) -> Result<(), StateError> {
        if source.balance.compare(&amount) < 0 {
            return Err(StateError::InsufficientBalance);
        }
        if destination == source.id {
            return Ok(());
        }
        let mut receiver = self.load_wallet(destination)?;
        receiver.balance = receiver.balance.add(amount);
        self.save_wallet(&receiver)?;
        source.balance = source.balance.sub(amount);
        Ok(())
    }

    /// Propose a new version of `wallet`'s sector. Returns the event counter that identifies the
    /// pending update.
    pub fn update_sector(
        &mut self,
        wallet: &mut Wallet,
        args: UpdateSectorArgs,
    ) -> Result<u32, StateError> {
        let height = self.metadata.height;
        if !wallet.sector.parent_available(args.parent_counter) {
            return Err(StateError::NonCurrentParent);
        }
        if args.atoms as usize <= QUORUM_SIZE {
            return Err(StateError::TooFewAtoms);
        }
        if args.atoms > ATOMS_PER_SECTOR {
            return Err(StateError::TooManyAtoms);
        }
        if !valid_k(args.k) {
            return Err(StateError::InvalidK(args.k));
        }
        if args.d < args.k || args.d as usize > QUORUM_SIZE {
            return Err(StateError::InvalidD(args.d));
        }
        if args.confirmations_required as usize > QUORUM_SIZE {
            return Err(StateError::TooManyConfirmations);
        }
        if args.confirmations_required < args.k {
            return Err(StateError::TooFewConfirmations);
        }
        if args.deadline < height + 2 {
            return Err(StateError::DeadlineTooEarly);
        }
        if args.deadline > height + MAX_DEADLINE {
            return Err(StateError::DeadlineTooFar);
        }
        if wallet.sector.active_updates.len() >= MAX_UPDATES {
            return Err(StateError::TooManyUpdates);
        }
        if self.wallet_tree.total_weight() + args.atoms as u64 > ATOMS_PER_QUORUM {
            return Err(StateError::InsufficientAtoms);
        }

        let counter = self.schedule_event(
            args.deadline,
            EventKind::SectorUpdateExpiry {
                wallet_id: wallet.id,
            },
        );
        wallet.sector.active_updates.push(SectorUpdate {
            wallet_id: wallet.id,
            parent_counter: args.parent_counter,
            atoms: args.atoms,
            k: args.k,
            d: args.d,
            hash_set: args.hash_set,
            confirmations_required: args.confirmations_required,
            confirmations: [false; QUORUM_SIZE],
            event_counter: counter,
            event_expiration: args.deadline,
        });
        wallet.sector.update_atoms += args.atoms as u32;
        Ok(counter)
    }

    /// Resize `wallet`'s sector to `atoms` zeroed atoms, discarding its contents.
    pub fn resize_sector_erase(
        &mut self,
        wallet: &mut Wallet,
        atoms: u16,
        k: u8,
    ) -> Result<(), StateError> {
        if atoms > ATOMS_PER_SECTOR {
            return Err(StateError::TooManyAtoms);
        }
        if atoms > 0 && !valid_k(k) {
            return Err(StateError::InvalidK(k));
        }
        let current_weight = self
            .wallet_tree
            .get_weight(wallet.id)
            .ok_or(StateError::WalletNotFound(wallet.id))?;
        let new_weight =
            wallet.compensation_weight() - wallet.sector.atoms as u64 + atoms as u64;
        if self.wallet_tree.total_weight() - current_weight + new_weight > ATOMS_PER_QUORUM {
            return Err(StateError::InsufficientAtoms);
        }

        let path = self.sector_filename(wallet.id);
        let previous = fs::read(&path).ok();
        self.record(Undo::SegmentReplaced {
            path: path.clone(),
            previous,
        });

        if atoms == 0 {
            let _ = fs::remove_file(&path);
            wallet.sector.hash_set = Default::default();
        } else {
            let zeros = vec![0u8; atoms as usize * ATOM_SIZE];
            fs::write(&path, &zeros)?;
            let root: CryptoHash = segment_hash(&zeros)?;
            wallet.sector.hash_set = [root; QUORUM_SIZE];
        }
        wallet.sector.atoms = atoms;
        wallet.sector.k = k;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_utilities::temp_state;

    fn funded(state: &mut State, id: u64, balance: u128) -> Wallet {
        let wallet = Wallet::new(WalletID::new(id), Balance::new(balance), vec![]);
        state.insert_wallet(wallet.clone(), true).unwrap();
        wallet
    }

    fn args(parent_counter: u32, deadline: u32) -> UpdateSectorArgs {
        UpdateSectorArgs {
            parent_counter,
            atoms: 16,
            k: 2,
            d: 2,
            hash_set: Default::default(),
            confirmations_required: 3,
            deadline,
        }
    }

    #[test]
    fn create_and_send() {
        let (mut state, _dir) = temp_state("script_api_send");
        let mut parent = funded(&mut state, 1, 100);

        // 1. Creating a child moves the balance.
        state
            .create_wallet(&mut parent, WalletID::new(2), Balance::new(40), vec![0x38])
            .unwrap();
        assert_eq!(parent.balance, Balance::new(60));
        assert!(matches!(
            state.create_wallet(&mut parent, WalletID::new(3), Balance::new(61), vec![]),
            Err(StateError::InsufficientBalance)
        ));
        assert!(matches!(
            state.create_wallet(&mut parent, WalletID::new(2), Balance::new(1), vec![]),
            Err(StateError::WalletExists(_))
        ));
        assert_eq!(parent.balance, Balance::new(60));

        // 2. Sending.
        state
            .send_coin(&mut parent, Balance::new(10), WalletID::new(2))
            .unwrap();
        assert_eq!(parent.balance, Balance::new(50));
        assert_eq!(state.load_wallet(WalletID::new(2)).unwrap().balance, Balance::new(50));
        let own_id = parent.id;
        state.send_coin(&mut parent, Balance::new(10), own_id).unwrap();
        assert_eq!(parent.balance, Balance::new(50));
        assert!(state
            .send_coin(&mut parent, Balance::new(1), WalletID::new(9))
            .is_err());
    }

    #[test]
    fn update_sector_checks() {
        let (mut state, _dir) = temp_state("script_api_update");
        let mut wallet = funded(&mut state, 1, 0);
        state.metadata.height = 10;

        let mut bad = args(5, 20);
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::NonCurrentParent)));
        bad = args(0, 20);
        bad.atoms = 4;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::TooFewAtoms)));
        bad.atoms = ATOMS_PER_SECTOR + 1;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::TooManyAtoms)));
        bad = args(0, 20);
        bad.k = 3;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::InvalidK(3))));
        bad = args(0, 20);
        bad.d = 1;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::InvalidD(1))));
        bad.d = 0;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::InvalidD(0))));
        bad.d = 5;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::InvalidD(5))));
        assert!(wallet.sector.active_updates.is_empty());
        bad = args(0, 20);
        bad.confirmations_required = 5;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::TooManyConfirmations)));
        bad.confirmations_required = 1;
        assert!(matches!(state.update_sector(&mut wallet, bad.clone()), Err(StateError::TooFewConfirmations)));
        assert!(matches!(state.update_sector(&mut wallet, args(0, 11)), Err(StateError::DeadlineTooEarly)));
        assert!(matches!(state.update_sector(&mut wallet, args(0, 311)), Err(StateError::DeadlineTooFar)));

        // Chains of updates are allowed up to MAX_UPDATES.
        let first = state.update_sector(&mut wallet, args(0, 12)).unwrap();
        let mut parent = first;
        for _ in 1..MAX_UPDATES {
            parent = state.update_sector(&mut wallet, args(parent, 20)).unwrap();
        }
        assert!(matches!(state.update_sector(&mut wallet, args(parent, 20)), Err(StateError::TooManyUpdates)));
        assert_eq!(wallet.sector.update_atoms, 16 * MAX_UPDATES as u32);
        assert_eq!(state.event_list().len(), MAX_UPDATES);
        assert_eq!(wallet.sector.update(first).unwrap().event_expiration, 12);
    }

    #[test]
    fn resize_erases_sector() {
        let (mut state, _dir) = temp_state("script_api_resize");
        let mut wallet = funded(&mut state, 1, 0);

        state.resize_sector_erase(&mut wallet, 8, 2).unwrap();
        let path = state.sector_filename(wallet.id);
        assert_eq!(std::fs::read(&path).unwrap(), vec![0u8; 8 * ATOM_SIZE]);
        assert_eq!(wallet.sector.atoms, 8);
        assert_eq!(
            wallet.sector.hash_set[3],
            segment_hash(&vec![0u8; 8 * ATOM_SIZE]).unwrap()
        );

        assert!(matches!(state.resize_sector_erase(&mut wallet, 8, 0), Err(StateError::InvalidK(0))));

        state.resize_sector_erase(&mut wallet, 0, 0).unwrap();
        assert!(!std::path::Path::new(&path).exists());
        assert_eq!(wallet.sector.hash_set, <[CryptoHash; QUORUM_SIZE]>::default());
    }
}
