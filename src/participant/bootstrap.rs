/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The two ways a participant enters a quorum.
//!
//! Bootstrapping creates the genesis state, compiles the first block alone and starts ticking.
//!
//! Joining rebuilds the state from a peer: the peer's most recent snapshot, then every block
//! compiled since. Meanwhile the joiner asks the quorum to add it as a sibling, and lines its
//! rounds up with the peer's so that it starts ticking at the start of a round. The join request
//! is sent during step 3 of round `H`, so it lands in block `H + 1`, and the joiner starts ticking at the
//! start of round `H + 2`, once it has the state that block `H + 1` left.

use super::rpc_client::{RpcClient, RpcError};
use super::{Participant, ParticipantError};
use crate::delta::scripts::add_sibling_input;
use crate::networking::messages::RpcRequest;
use crate::networking::network::Network;
use crate::state::{ScriptInput, Sibling};
use crate::types::crypto_primitives::{Keypair, SigningKey};
use crate::types::{Address, PublicKeyBytes, WalletID, FOUNTAIN_WALLET_ID, QUORUM_SIZE};
use std::thread;
use std::time::{Duration, Instant};

const STEPS_PER_ROUND: u32 = QUORUM_SIZE as u32 + 1;

/// The step of the peer's round the join request goes out in. It must reach the quorum well
/// before the round ends.
const JOIN_REQUEST_STEP: u8 = 3;

/// Number of times a block the peer has not compiled yet is asked for again.
const BLOCK_RETRIES: u32 = 20;

impl<N: Network + 'static> Participant<N> {
    pub(crate) fn bootstrap(
        &mut self,
        tether_wallet: WalletID,
        tether_public_key: &PublicKeyBytes,
    ) -> Result<(), ParticipantError> {
        if tether_wallet == FOUNTAIN_WALLET_ID {
            return Err(ParticipantError::ReservedWalletId);
        }

        let sibling = Sibling::candidate(self.address.clone(), self.consensus.keypair.public_bytes());
        let slot = self
            .consensus
            .engine_mut()
            .bootstrap(sibling, tether_wallet, tether_public_key)?;
        log::info!("bootstrapped a quorum as sibling {} with tether wallet {}", slot, tether_wallet);

        // The genesis block only carries our own update.
        self.consensus.new_signed_update();
        let block = self.consensus.condense_block();
        self.consensus.engine_mut().compile(&block)?;
        self.consensus.new_signed_update();

        self.start_ticking();
        Ok(())
    }

    pub(crate) fn join(
        &mut self,
        tether_wallet: WalletID,
        tether_key: SigningKey,
        quorum: &[Address],
    ) -> Result<(), ParticipantError> {
        if tether_wallet == FOUNTAIN_WALLET_ID {
            return Err(ParticipantError::ReservedWalletId);
        }
        let peer = quorum.first().ok_or(ParticipantError::EmptyQuorum)?.clone();
        let mut client = self.client();

        // 1. Adopt the peer's most recent snapshot.
        let head = client.recent_snapshot_height(&peer)?;
        let metadata = client.snapshot_metadata(&peer, head)?;
        let mut wallets = Vec::new();
        for id in client.snapshot_wallet_list(&peer, head)? {
            wallets.push(client.snapshot_wallet(&peer, head, id)?);
        }
        {
            let mut engine = self.consensus.engine_mut();
            engine.bootstrap_set_metadata(metadata);
            for wallet in wallets {
                engine.bootstrap_insert_wallet(wallet)?;
            }
            engine.bootstrap_join_setup();
        }
        log::info!("joining through {:?} from snapshot {}", peer, head);

        // 2. Replay the blocks compiled since.
        let peer_height = client.metadata(&peer)?.height;
        while self.height() < peer_height {
            self.fetch_and_compile_next_block(&mut client, &peer)?;
        }

        // 3. Ask for a sibling slot during step 3 of the peer's round.
        let mut progress = client.consensus_progress(&peer)?;
        let mut received = Instant::now();
        if progress.current_step != JOIN_REQUEST_STEP {
            let steps_ahead = (JOIN_REQUEST_STEP as u32 + STEPS_PER_ROUND
                - progress.current_step as u32)
                % STEPS_PER_ROUND;
            let until_step = (self.step_duration * steps_ahead)
                .saturating_sub(Duration::from_millis(progress.step_progress));
            thread::sleep(until_step + self.step_duration / 10);
            progress = client.consensus_progress(&peer)?;
            received = Instant::now();
        }
        let keypair = Keypair::new(tether_key);
        let candidate = Sibling::candidate(self.address.clone(), self.consensus.keypair.public_bytes());
        let join_request = ScriptInput {
            wallet_id: tether_wallet,
            input: add_sibling_input(&candidate, &keypair)?,
            deadline: progress.height + 2,
        };
        for address in quorum {
            client.notify(address, RpcRequest::AddScriptInput(join_request.clone()));
        }

        // 4. Catch up with the round the request was sent in.
        while self.height() < progress.height {
            self.fetch_and_compile_next_block(&mut client, &peer)?;
        }

        // 5. Start ticking when the round after it starts.
        let until_round_end = (self.step_duration * (STEPS_PER_ROUND - progress.current_step as u32))
            .saturating_sub(Duration::from_millis(progress.step_progress));
        let round_start = received + until_round_end + self.step_duration * STEPS_PER_ROUND;
        thread::sleep(round_start.saturating_duration_since(Instant::now()));
        self.start_ticking();

        // 6. The blocks of both rounds, the last of which holds the join request.
        while self.height() < progress.height + 2 {
            self.fetch_and_compile_next_block(&mut client, &peer)?;
        }

        match self.sibling_index() {
            Some(index) => log::info!("joined the quorum as sibling {}", index),
            None => log::warn!(
                "caught up with {:?} at height {}, but the quorum did not add this participant",
                peer,
                self.height()
            ),
        }
        Ok(())
    }

    /// Download the block at the current height from `peer` and compile it. A block the peer has
    /// not compiled yet is asked for again, a tenth of a step later.
    fn fetch_and_compile_next_block(
        &mut self,
        client: &mut RpcClient<N>,
        peer: &Address,
    ) -> Result<(), ParticipantError> {
        let height = self.height();
        let mut attempts = 0;
        let block = loop {
            match client.block(peer, height) {
                Ok(block) => break block,
                Err(RpcError::Remote(reason)) if attempts < BLOCK_RETRIES => {
                    log::debug!("block {} not available yet: {}", height, reason);
                    attempts += 1;
                    thread::sleep(self.step_duration / 10);
                }
                Err(err) => return Err(err.into()),
            }
        };
        self.consensus.engine_mut().compile(&block)?;
        Ok(())
    }
}
