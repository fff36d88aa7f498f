/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Applying a block to the state.
//!
//! [`Engine::compile`] is the state transition function of the quorum. Its steps run in a fixed
//! order, and every step depends only on the block and the state left by the previous steps:
//! 1. Roll the block history, if the active file is full.
//! 2. Derive the block's seed from the germ of the previous block.
//! 3. Toss every active sibling whose heartbeat is unsigned or built on another parent. Storage
//!    proofs are checked too, but only reported.
//! 4. Hash the entropy of the surviving heartbeats into the new germ.
//! 5. Run the script inputs.
//! 6. Apply the signed update advancements.
//! 7. Fire the events that expired.
//! 8. Charge wallets for storage and pay the siblings.
//! 9. Move passive siblings closer to becoming active.
//! 10. Advance the height and record the block.

use super::{Block, DeltaError, Engine};
use crate::events::*;
use crate::interpreter::{self, Trap};
use crate::state::{EventKind, ScriptInput, StateError, UpdateOutcome};
use crate::types::crypto_primitives::{hash, hash_concat, verify_signature};
use crate::types::{CryptoHash, Entropy, QUORUM_SIZE};
use borsh::BorshSerialize;
use std::time::SystemTime;

impl Engine {
    /// Apply `block`, which must be built for the current height. Returns the block's hash, which
    /// is the next block's parent.
    ///
    /// An error leaves the state partially updated. Callers treat it as fatal.
    pub fn compile(&mut self, block: &Block) -> Result<CryptoHash, DeltaError> {
        let height = self.height();
        if block.height != height {
            return Err(DeltaError::HeightMismatch {
                expected: height,
                got: block.height,
            });
        }

        self.roll_history_if_full()?;
        let proof_location = self.state.proof_location();

        let external_entropy: Entropy = [0; 32];
        self.state.metadata.seed =
            hash_concat(&[&external_entropy, &self.state.metadata.germ]).bytes();

        let mut sibling_entropy = Vec::with_capacity(32 * QUORUM_SIZE);
        for index in 0..QUORUM_SIZE {
            let sibling = &self.state.metadata.siblings[index];
            if !sibling.is_active() {
                continue;
            }
            let heartbeat = &block.heartbeats[index];
            let signed = verify_signature(
                &sibling.public_key,
                &heartbeat.signing_bytes(),
                &block.heartbeat_signatures[index],
            );
            if !signed || heartbeat.parent_block != self.state.metadata.parent_block {
                log::warn!(
                    "tossing sibling {} at height {}: {}",
                    index,
                    height,
                    if signed { "heartbeat on a stale parent" } else { "bad heartbeat signature" }
                );
                self.state.toss_sibling(index as u8);
                self.publish(Event::TossSibling(TossSiblingEvent {
                    timestamp: SystemTime::now(),
                    height,
                    sibling_index: index as u8,
                }));
                continue;
            }

            if !self
                .state
                .verify_storage_proof(proof_location, index as u8, &heartbeat.storage_proof)
            {
                log::warn!(
                    "sibling {} sent an invalid storage proof for {:?} at height {}",
                    index,
                    proof_location,
                    height
                );
            }
            sibling_entropy.extend_from_slice(&heartbeat.entropy);
        }
        self.state.metadata.germ = hash(&sibling_entropy).bytes();

        for input in &block.script_inputs {
            self.handle_script_input(input)?;
        }

        for (advancement, signature) in block
            .update_advancements
            .iter()
            .zip(&block.advancement_signatures)
        {
            let Some(sibling) = self
                .state
                .metadata
                .siblings
                .get(advancement.sibling_index as usize)
            else {
                continue;
            };
            if sibling.is_inactive()
                || !verify_signature(&sibling.public_key, &advancement.try_to_vec()?, signature)
            {
                log::debug!("ignoring unsigned advancement {:?}", advancement);
                continue;
            }
            match self.state.advance_update(advancement) {
                Ok(_) | Err(StateError::WalletNotFound(_)) => (),
                Err(err) => return Err(err.into()),
            }
        }

        while let Some(event) = self.state.event_list.pop_first_expired(height) {
            self.fire_event(event.counter, event.kind)?;
        }

        self.state.execute_compensation()?;
        self.state.countdown_passive_siblings();

        let block_hash = block.hash();
        self.state.metadata.parent_block = block_hash;
        self.state.metadata.height += 1;
        self.state.metadata.po_storage_seed = hash(&self.state.metadata.germ);

        self.append_block(block)?;
        self.identify();
        self.publish(Event::CompileBlock(CompileBlockEvent {
            timestamp: SystemTime::now(),
            height,
            block: block_hash,
        }));
        Ok(block_hash)
    }

    /// Run `input` unless it expired, already ran, or has a deadline too far ahead, and remember
    /// it until its deadline.
    fn handle_script_input(&mut self, input: &ScriptInput) -> Result<(), DeltaError> {
        if !input.deadline_in_window(self.height()) {
            return Ok(());
        }
        let script_hash = input.hash();
        match self.state.load_wallet(input.wallet_id) {
            Ok(wallet) if wallet.known_scripts.contains_key(&script_hash) => return Ok(()),
            Ok(_) => (),
            Err(StateError::WalletNotFound(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        let (cost, result) = interpreter::execute(&mut self.state, input);
        // Storage failures are the node's, not the script's.
        if let Err(Trap::State(err @ (StateError::Io(_) | StateError::Encoding(_)))) = result {
            return Err(err.into());
        }
        if let Err(trap) = &result {
            if !trap.is_termination() {
                log::debug!("script of wallet {} trapped: {}", input.wallet_id, trap);
            }
        }
        self.publish(Event::ExecuteScript(ExecuteScriptEvent {
            timestamp: SystemTime::now(),
            wallet_id: input.wallet_id,
            script_input: script_hash,
            cost,
            trap: result.as_ref().err().map(ToString::to_string),
        }));

        // The script may have removed its own wallet.
        match self.state.load_wallet(input.wallet_id) {
            Ok(mut wallet) => {
                self.state.learn_script(&mut wallet, script_hash, input.deadline);
                self.state.save_wallet(&wallet)?;
                Ok(())
            }
            Err(StateError::WalletNotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn fire_event(&mut self, counter: u32, kind: EventKind) -> Result<(), DeltaError> {
        match kind {
            EventKind::ScriptInputExpiry { wallet_id, hash } => {
                match self.state.forget_script(wallet_id, &hash) {
                    Ok(()) | Err(StateError::WalletNotFound(_)) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            EventKind::SectorUpdateExpiry { wallet_id } => {
                let outcome = match self.state.expire_sector_update(wallet_id, counter) {
                    Ok(outcome) => outcome,
                    Err(StateError::WalletNotFound(_)) => UpdateOutcome::Unknown,
                    Err(err) => return Err(err.into()),
                };
                match outcome {
                    UpdateOutcome::Committed { repair_needed } => {
                        self.publish(Event::CommitSectorUpdate(CommitSectorUpdateEvent {
                            timestamp: SystemTime::now(),
                            wallet_id,
                            counter,
                            repair_needed,
                        }))
                    }
                    UpdateOutcome::Dropped(counters) => {
                        self.publish(Event::DropSectorUpdate(DropSectorUpdateEvent {
                            timestamp: SystemTime::now(),
                            wallet_id,
                            counters,
                        }))
                    }
                    UpdateOutcome::Unknown => (),
                }
                Ok(())
            }
        }
    }
}
