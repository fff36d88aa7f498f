/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The iterative-signature protocol siblings use to agree on each block.
//!
//! A round lasts `QUORUM_SIZE + 1` steps. At the start of a round every sibling sends its
//! [`Update`] for the round to the other siblings as a [`SignedUpdate`] carrying its own signature.
//! A sibling that accepts a signed update adds its signature to the chain and relays it. Because
//! a relay made during step `s` needs at least `s` signatures to be accepted, an update that
//! reaches one honest sibling in time reaches every honest sibling in time, and at the end of the
//! round all of them [condense](Consensus::condense_block) the same block.
//!
//! ## Locks
//!
//! The engine lock is always taken before the updates lock. The step lock is only held long
//! enough to read or write the step.

use super::rpc_client::RpcClient;
use super::update::{SignedUpdate, Update};
use crate::delta::{Block, Engine, Heartbeat};
use crate::events::*;
use crate::networking::messages::{ConsensusProgress, RpcRequest};
use crate::networking::network::Network;
use crate::state::{ScriptInput, UpdateAdvancement};
use crate::types::crypto_primitives::{hash, verify_signature, Keypair};
use crate::types::{Address, CryptoHash, QUORUM_SIZE};
use borsh::BorshSerialize;
use rand_core::{OsRng, RngCore};
use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};
use std::mem;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Instant, SystemTime};

/// Why a [`SignedUpdate`] was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    /// The participant is not ticking yet.
    NotReady,
    /// Signatories and signatures differ in number, or there are none.
    SignatoryMismatch,
    /// The update builds on another block than this participant's parent.
    InvalidParent,
    /// Fewer signatures than steps elapsed this round: the update is late.
    OutOfSync,
    SignatoryOutOfBounds(u8),
    /// The signatory's slot is not filled.
    NonSibling(u8),
    DoubleSign(u8),
    InvalidSignature(u8),
    /// The update was already received.
    HaveHeartbeat,
    /// Its author already sent two different updates this round.
    ManyHeartbeats,
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::NotReady => write!(f, "not ready to receive updates"),
            ConsensusError::SignatoryMismatch => {
                write!(f, "signed update has a different number of signatures and signatories")
            }
            ConsensusError::InvalidParent => write!(f, "signed update targets another parent block"),
            ConsensusError::OutOfSync => {
                write!(f, "signed update is late for the current step")
            }
            ConsensusError::SignatoryOutOfBounds(index) => {
                write!(f, "signatory {} is out of bounds", index)
            }
            ConsensusError::NonSibling(index) => write!(f, "signatory {} is not a sibling", index),
            ConsensusError::DoubleSign(index) => write!(f, "signatory {} signed twice", index),
            ConsensusError::InvalidSignature(index) => {
                write!(f, "signature of signatory {} is invalid", index)
            }
            ConsensusError::HaveHeartbeat => write!(f, "update already received"),
            ConsensusError::ManyHeartbeats => {
                write!(f, "author already sent two updates this round")
            }
        }
    }
}

impl std::error::Error for ConsensusError {}

/// Everything collected for the next block.
#[derive(Default)]
pub(crate) struct UpdateBuffers {
    /// Updates received this round, by author.
    pub(crate) updates: [HashMap<CryptoHash, Update>; QUORUM_SIZE],
    /// Submitted script inputs not yet put in an update.
    pub(crate) script_inputs: Vec<ScriptInput>,
    /// Segments this sibling stored, not yet announced.
    pub(crate) update_advancements: Vec<UpdateAdvancement>,
}

pub(crate) struct StepState {
    pub(crate) ticking: bool,
    pub(crate) current_step: u8,
    pub(crate) step_start: Instant,
}

impl Default for StepState {
    fn default() -> Self {
        StepState {
            ticking: false,
            current_step: 0,
            step_start: Instant::now(),
        }
    }
}

/// The state shared by the threads of a participant. Each thread works on its own clone.
#[derive(Clone)]
pub(crate) struct Consensus<N: Network> {
    pub(crate) engine: Arc<RwLock<Engine>>,
    pub(crate) updates: Arc<Mutex<UpdateBuffers>>,
    pub(crate) step: Arc<RwLock<StepState>>,
    pub(crate) keypair: Keypair,
    pub(crate) client: RpcClient<N>,
    pub(crate) event_publisher: Option<Sender<Event>>,
}

impl<N: Network> Consensus<N> {
    pub(crate) fn new(
        engine: Engine,
        keypair: Keypair,
        client: RpcClient<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Consensus<N> {
        Consensus {
            engine: Arc::new(RwLock::new(engine)),
            updates: Arc::new(Mutex::new(UpdateBuffers::default())),
            step: Arc::new(RwLock::new(StepState::default())),
            keypair,
            client,
            event_publisher,
        }
    }

    pub(crate) fn engine(&self) -> RwLockReadGuard<'_, Engine> {
        self.engine.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn engine_mut(&self) -> RwLockWriteGuard<'_, Engine> {
        self.engine.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn buffers(&self) -> MutexGuard<'_, UpdateBuffers> {
        self.updates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step_state(&self) -> RwLockReadGuard<'_, StepState> {
        self.step.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn step_state_mut(&self) -> RwLockWriteGuard<'_, StepState> {
        self.step.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn progress(&self) -> ConsensusProgress {
        let height = self.engine().height();
        let step = self.step_state();
        ConsensusProgress {
            height,
            current_step: step.current_step,
            step_progress: step.step_start.elapsed().as_millis() as u64,
        }
    }

    /// Check `signed_update` and, if it is acceptable, store it, add this sibling's signature and
    /// relay it to the other siblings.
    ///
    /// A participant that is a step ahead of or behind the author across a block boundary sees
    /// [`ConsensusError::InvalidParent`]. The stepper retries such updates once, right after its
    /// next tick.
    pub(crate) fn handle_signed_update(
        &mut self,
        mut signed_update: SignedUpdate,
    ) -> Result<(), ConsensusError> {
        let current_step = {
            let step = self.step_state();
            if !step.ticking {
                return Err(ConsensusError::NotReady);
            }
            step.current_step
        };

        if signed_update.signatories.len() != signed_update.signatures.len()
            || signed_update.signatories.is_empty()
        {
            return Err(ConsensusError::SignatoryMismatch);
        }

        let engine = self.engine();
        let metadata = engine.metadata();
        if signed_update.update.heartbeat.parent_block != metadata.parent_block {
            return Err(ConsensusError::InvalidParent);
        }
        if current_step as usize > signed_update.signatures.len() {
            return Err(ConsensusError::OutOfSync);
        }

        let update_hash = signed_update.update.hash();
        let mut message = SignedUpdate::chained_message(&update_hash, &[]);
        let mut seen = [false; QUORUM_SIZE];
        for (&signatory, signature) in signed_update
            .signatories
            .iter()
            .zip(&signed_update.signatures)
        {
            let Some(sibling) = metadata.siblings.get(signatory as usize) else {
                return Err(ConsensusError::SignatoryOutOfBounds(signatory));
            };
            if sibling.is_inactive() {
                return Err(ConsensusError::NonSibling(signatory));
            }
            if mem::replace(&mut seen[signatory as usize], true) {
                return Err(ConsensusError::DoubleSign(signatory));
            }
            if !verify_signature(&sibling.public_key, &message, signature) {
                return Err(ConsensusError::InvalidSignature(signatory));
            }
            message.extend_from_slice(signature.as_bytes());
        }

        let author = signed_update.signatories[0] as usize;
        {
            let mut buffers = self.buffers();
            let received = &mut buffers.updates[author];
            if received.contains_key(&update_hash) {
                return Err(ConsensusError::HaveHeartbeat);
            }
            if received.len() >= 2 {
                return Err(ConsensusError::ManyHeartbeats);
            }
            received.insert(update_hash, signed_update.update.clone());
        }

        let height = metadata.height;
        let me = engine.sibling_index();
        let peers = other_siblings(&engine, me);
        drop(engine);

        Event::publish(
            &self.event_publisher,
            Event::ReceiveSignedUpdate(ReceiveSignedUpdateEvent {
                timestamp: SystemTime::now(),
                height,
                signatories: signed_update.signatories.clone(),
            }),
        );

        let Some(me) = me else { return Ok(()) };
        if seen[me as usize] {
            return Ok(());
        }
        signed_update.signatures.push(self.keypair.sign(&message));
        signed_update.signatories.push(me);
        for peer in peers {
            self.client
                .notify(&peer, RpcRequest::HandleSignedUpdate(signed_update.clone()));
        }
        Ok(())
    }

    /// Turn the updates of the round into the next block, and empty the per-sibling buffers.
    ///
    /// Only siblings that sent exactly one update contribute a heartbeat. Script inputs and
    /// advancements are deduplicated and ordered by hash, so every sibling that received the same
    /// updates builds the same block.
    pub(crate) fn condense_block(&self) -> Block {
        let engine = self.engine();
        let metadata = engine.metadata();
        let mut block = Block {
            height: metadata.height,
            parent_block: metadata.parent_block,
            ..Default::default()
        };

        let mut script_inputs = BTreeMap::new();
        let mut advancements = BTreeMap::new();
        let mut buffers = self.buffers();
        for (index, received) in buffers.updates.iter().enumerate() {
            if received.len() != 1 {
                continue;
            }
            let Some(update) = received.values().next() else {
                continue;
            };
            block.heartbeats[index] = update.heartbeat.clone();
            block.heartbeat_signatures[index] = update.heartbeat_signature;

            for input in &update.script_inputs {
                if input.deadline_in_window(metadata.height) {
                    script_inputs.insert(input.hash(), input.clone());
                }
            }
            for (advancement, signature) in update
                .update_advancements
                .iter()
                .zip(&update.advancement_signatures)
            {
                let Some(sibling) = metadata.siblings.get(advancement.sibling_index as usize)
                else {
                    continue;
                };
                let Ok(bytes) = advancement.try_to_vec() else {
                    continue;
                };
                if verify_signature(&sibling.public_key, &bytes, signature) {
                    advancements.insert(hash(&bytes), (advancement.clone(), *signature));
                }
            }
        }
        buffers.updates = Default::default();

        block.script_inputs = script_inputs.into_values().collect();
        let (update_advancements, advancement_signatures) = advancements.into_values().unzip();
        block.update_advancements = update_advancements;
        block.advancement_signatures = advancement_signatures;
        block
    }

    /// Write this sibling's update for the round, keep it and send it to the other siblings.
    /// Does nothing if this participant is not a sibling.
    pub(crate) fn new_signed_update(&mut self) {
        let engine = self.engine();
        let Some(me) = engine.sibling_index() else {
            return;
        };

        let mut entropy = [0u8; 32];
        OsRng.fill_bytes(&mut entropy);
        let heartbeat = Heartbeat {
            parent_block: engine.metadata().parent_block,
            entropy,
            storage_proof: engine.state().build_storage_proof(),
        };
        let heartbeat_signature = self.keypair.sign(&heartbeat.signing_bytes());

        let update = {
            let mut buffers = self.buffers();
            let update_advancements = mem::take(&mut buffers.update_advancements);
            let advancement_signatures = update_advancements
                .iter()
                .map(|advancement| self.keypair.sign(&advancement.try_to_vec().unwrap_or_default()))
                .collect();
            let update = Update {
                heartbeat,
                heartbeat_signature,
                script_inputs: mem::take(&mut buffers.script_inputs),
                update_advancements,
                advancement_signatures,
            };
            buffers.updates[me as usize].insert(update.hash(), update.clone());
            update
        };

        let height = engine.height();
        let peers = other_siblings(&engine, Some(me));
        drop(engine);

        let signed_update = SignedUpdate {
            signatures: vec![self.keypair.sign(update.hash().as_bytes())],
            signatories: vec![me],
            update,
        };
        for peer in peers {
            self.client
                .notify(&peer, RpcRequest::HandleSignedUpdate(signed_update.clone()));
        }
        Event::publish(
            &self.event_publisher,
            Event::NewSignedUpdate(NewSignedUpdateEvent {
                timestamp: SystemTime::now(),
                height,
                sibling_index: me,
            }),
        );
    }

    /// Mark the participant as ticking from step 0 of a round that starts now.
    pub(crate) fn begin_ticking(&self) {
        let mut step = self.step_state_mut();
        step.ticking = true;
        step.current_step = 0;
        step.step_start = Instant::now();
    }

    /// Advance one step. The last step of a round ends it: the block is condensed and compiled,
    /// and the update for the next round is sent.
    pub(crate) fn tick(&mut self) {
        let current_step = self.step_state().current_step;
        if (current_step as usize) < QUORUM_SIZE {
            let mut step = self.step_state_mut();
            step.current_step += 1;
            step.step_start = Instant::now();
            return;
        }

        let block = self.condense_block();
        if let Err(err) = self.engine_mut().compile(&block) {
            panic!("failed to compile block {}: {}", block.height, err);
        }
        {
            let mut step = self.step_state_mut();
            step.current_step = 0;
            step.step_start = Instant::now();
        }
        self.new_signed_update();
    }
}

/// Addresses of the siblings other than `me`.
fn other_siblings(engine: &Engine, me: Option<u8>) -> Vec<Address> {
    engine
        .metadata()
        .siblings
        .iter()
        .enumerate()
        .filter(|(index, sibling)| !sibling.is_inactive() && Some(*index as u8) != me)
        .map(|(_, sibling)| sibling.address.clone())
        .collect()
}
