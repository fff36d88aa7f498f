/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, start, and stop a participant of a quorum.
//!
//! A participant runs a [delta engine](crate::delta::Engine) and takes part in the quorum's
//! consensus: in every round it sends a signed update to the other siblings, co-signs theirs, and
//! at the end of the round condenses everything it received into a block and compiles it.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the participant](ParticipantSpec),
//! - The function to [start](ParticipantSpec::start) a [Participant] given its specification, which
//!   either bootstraps a new quorum or joins an existing one,
//! - [The type](Participant) which keeps the participant alive, and answers the same requests peers
//!   send over the network.
//!
//! ## Starting a participant
//!
//! ```ignore
//! let participant =
//!     ParticipantSpec::builder()
//!     .network(network)
//!     .configuration(configuration)
//!     .role(Role::Join { tether_wallet, tether_key, quorum: vec![peer] })
//!     .on_compile_block(compile_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! ### Required setters
//! - `.network(...)`
//! - `.configuration(...)`
//! - `.role(...)`
//!
//! ### Optional setters
//!
//! The optional setters register handlers for events from [crate::events]:
//! - `.on_compile_block(...)`
//! - `.on_toss_sibling(...)`
//! - `.on_execute_script(...)`
//! - `.on_commit_sector_update(...)`
//! - `.on_drop_sector_update(...)`
//! - `.on_new_signed_update(...)`
//! - `.on_receive_signed_update(...)`
//! - `.on_reject_signed_update(...)`
//! - `.on_start_repair(...)`
//! - `.on_end_repair(...)`
//!
//! The participant's [configuration](Configuration) is built the same way:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .address(Address::new("localhost", 9981))
//!     .file_prefix("/var/lib/quorum/".to_string())
//!     .rpc_timeout(Duration::from_secs(2))
//!     .log_events(true)
//!     .build();
//! ```

pub mod api;
pub mod bootstrap;
pub mod consensus;
pub mod repair;
pub mod rpc_client;
pub mod stepper;
pub mod update;

use self::api::start_rpc_server;
use self::consensus::Consensus;
use self::repair::start_repair_worker;
use self::rpc_client::{RpcClient, RpcError};
use self::stepper::start_stepper;
use self::update::SignedUpdate;
use crate::delta::{Block, DeltaError, Engine, SegmentUpload};
use crate::event_bus::*;
use crate::events::*;
use crate::networking::messages::ConsensusProgress;
use crate::networking::network::Network;
use crate::networking::receiving::{start_polling, PendingResponses, RpcServerStub};
use crate::networking::sending::SenderHandle;
use crate::state::{Metadata, ScriptInput, Wallet};
use crate::types::crypto_primitives::{Keypair, SigningKey};
use crate::types::{Address, PublicKeyBytes, WalletID, STEP_DURATION};
use std::fmt::{self, Display, Formatter};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;
use typed_builder::TypedBuilder;

#[derive(Debug)]
pub enum ParticipantError {
    Delta(DeltaError),
    Rpc(RpcError),
    Io(io::Error),
    /// The operation needs this participant to hold a sibling slot.
    NotSibling,
    /// The participant is stopping and no longer takes signed updates.
    ShuttingDown,
    /// Tether wallets cannot use the fountain's id.
    ReservedWalletId,
    /// A joining participant was given no peers to join through.
    EmptyQuorum,
}

impl Display for ParticipantError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantError::Delta(err) => write!(f, "{}", err),
            ParticipantError::Rpc(err) => write!(f, "{}", err),
            ParticipantError::Io(err) => write!(f, "participant i/o failed: {}", err),
            ParticipantError::NotSibling => write!(f, "this participant is not a sibling"),
            ParticipantError::ShuttingDown => write!(f, "the participant is shutting down"),
            ParticipantError::ReservedWalletId => write!(f, "wallet id 0 belongs to the fountain"),
            ParticipantError::EmptyQuorum => write!(f, "no quorum peers to join through"),
        }
    }
}

impl std::error::Error for ParticipantError {}

impl From<DeltaError> for ParticipantError {
    fn from(value: DeltaError) -> Self {
        ParticipantError::Delta(value)
    }
}

impl From<RpcError> for ParticipantError {
    fn from(value: RpcError) -> Self {
        ParticipantError::Rpc(value)
    }
}

impl From<io::Error> for ParticipantError {
    fn from(value: io::Error) -> Self {
        ParticipantError::Io(value)
    }
}

/// Stores the user-defined parameters required to start a participant:
/// 1. The participant's [keypair](ed25519_dalek::SigningKey), which signs heartbeats and updates.
/// 2. The address peers reach it at. Together with the public key, this is how the participant
///    finds its own slot among the siblings.
/// 3. The prefix of every file the participant's engine writes.
/// 4. The duration of one consensus step. All siblings of a quorum must use the same duration.
/// 5. How long to wait for the response to an RPC before giving up.
/// 6. The "Log Events" flag, which registers the default logging handler of every event type.
///
/// ## Log Events
///
/// Events are logged using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
/// printed onto a terminal or to a file, set up a [logging
/// implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
#[derive(TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].
    Required:
    - `.me(...)`
    - `.address(...)`
    - `.file_prefix(...)`
    - `.rpc_timeout(...)`
    - `.log_events(...)`
    Optional:
    - `.step_duration(...)`
"
))]
pub struct Configuration {
    #[builder(setter(doc = "Set the participant's keypair, used to sign heartbeats and updates. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the address other participants reach this participant at. Required."))]
    pub address: Address,
    #[builder(setter(doc = "Set the prefix of the files the participant writes, e.g. a directory ending in a slash. Required."))]
    pub file_prefix: String,
    #[builder(default = STEP_DURATION, setter(doc = "Set the duration of one consensus step. Defaults to 1.8 seconds. Optional."))]
    pub step_duration: Duration,
    #[builder(setter(doc = "Set the maximum time to wait for the response to an RPC. Required."))]
    pub rpc_timeout: Duration,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// How a participant enters its quorum.
pub enum Role {
    /// Start a new quorum as its first sibling. The tether wallet is created with the bootstrap
    /// balance and controlled by `tether_public_key`.
    Bootstrap {
        tether_wallet: WalletID,
        tether_public_key: PublicKeyBytes,
    },
    /// Join the quorum `quorum` belongs to, paying the sibling deposit from `tether_wallet`,
    /// which `tether_key` controls. The first address of `quorum` provides the snapshot and
    /// the blocks to catch up with.
    Join {
        tether_wallet: WalletID,
        tether_key: SigningKey,
        quorum: Vec<Address>,
    },
}

/// Stores all the parameters and trait implementations required to run a [Participant].
#[derive(TypedBuilder)]
#[builder(builder_method(doc =
    "
    Create a builder for building a [ParticipantSpec]. On the builder call the following methods to construct a valid [ParticipantSpec].
    Required:
    - `.network(...)`
    - `.configuration(...)`
    - `.role(...)`
    Optional:
    - `.on_compile_block(...)`
    - `.on_toss_sibling(...)`
    - `.on_execute_script(...)`
    - `.on_commit_sector_update(...)`
    - `.on_drop_sector_update(...)`
    - `.on_new_signed_update(...)`
    - `.on_receive_signed_update(...)`
    - `.on_reject_signed_update(...)`
    - `.on_start_repair(...)`
    - `.on_end_repair(...)`
"
))]
pub struct ParticipantSpec<N: Network + 'static> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a participant. Required."))]
    configuration: Configuration,
    #[builder(setter(doc = "Set whether the participant bootstraps a new quorum or joins an existing one. Required."))]
    role: Role,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&CompileBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CompileBlockEvent>),
    doc = "Register a handler closure to be invoked after the participant compiles a block. Optional."))]
    on_compile_block: Option<HandlerPtr<CompileBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TossSiblingEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TossSiblingEvent>),
    doc = "Register a handler closure to be invoked after a block tosses a sibling out of the quorum. Optional."))]
    on_toss_sibling: Option<HandlerPtr<TossSiblingEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ExecuteScriptEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ExecuteScriptEvent>),
    doc = "Register a handler closure to be invoked after a wallet script runs. Optional."))]
    on_execute_script: Option<HandlerPtr<ExecuteScriptEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitSectorUpdateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitSectorUpdateEvent>),
    doc = "Register a handler closure to be invoked after a sector update commits. Optional."))]
    on_commit_sector_update: Option<HandlerPtr<CommitSectorUpdateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DropSectorUpdateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DropSectorUpdateEvent>),
    doc = "Register a handler closure to be invoked after sector updates are dropped. Optional."))]
    on_drop_sector_update: Option<HandlerPtr<DropSectorUpdateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewSignedUpdateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewSignedUpdateEvent>),
    doc = "Register a handler closure to be invoked after the participant sends its update for a round. Optional."))]
    on_new_signed_update: Option<HandlerPtr<NewSignedUpdateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSignedUpdateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSignedUpdateEvent>),
    doc = "Register a handler closure to be invoked after the participant accepts a peer's signed update. Optional."))]
    on_receive_signed_update: Option<HandlerPtr<ReceiveSignedUpdateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectSignedUpdateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectSignedUpdateEvent>),
    doc = "Register a handler closure to be invoked after the participant rejects a signed update. Optional."))]
    on_reject_signed_update: Option<HandlerPtr<RejectSignedUpdateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartRepairEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartRepairEvent>),
    doc = "Register a handler closure to be invoked when the participant starts rebuilding a segment. Optional."))]
    on_start_repair: Option<HandlerPtr<StartRepairEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndRepairEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndRepairEvent>),
    doc = "Register a handler closure to be invoked when a segment repair ends. Optional."))]
    on_end_repair: Option<HandlerPtr<EndRepairEvent>>,
}

impl<N: Network + 'static> ParticipantSpec<N> {
    /// Starts all threads and channels of a participant, then bootstraps or joins the quorum. The
    /// participant is ticking in step with its quorum when this returns.
    pub fn start(self) -> Result<Participant<N>, ParticipantError> {
        let configuration = self.configuration;
        let keypair = Keypair::new(configuration.me);

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_compile_block,
            self.on_toss_sibling,
            self.on_execute_script,
            self.on_commit_sector_update,
            self.on_drop_sector_update,
            self.on_new_signed_update,
            self.on_receive_signed_update,
            self.on_reject_signed_update,
            self.on_start_repair,
            self.on_end_repair,
        );
        let (event_publisher, event_subscriber): (Option<Sender<Event>>, Option<Receiver<Event>>) =
            if !event_handlers.is_empty() {
                Some(mpsc::channel()).unzip()
            } else {
                (None, None)
            };
        let (event_bus_shutdown, event_bus) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(shutdown), Some(bus))
            }
            None => (None, None),
        };

        let mut engine = Engine::new(&configuration.file_prefix);
        engine.set_identity(configuration.address.clone(), keypair.public_bytes());
        if let Some(publisher) = &event_publisher {
            engine.set_event_publisher(publisher.clone());
        }
        let (repair_sender, repairs) = mpsc::channel();
        engine.set_repair_sender(repair_sender);

        let pending = PendingResponses::default();
        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, requests) =
            start_polling(self.network.clone(), pending.clone(), poller_shutdown_receiver);
        let client = RpcClient::new(self.network.clone(), pending, configuration.rpc_timeout);
        let consensus = Consensus::new(engine, keypair, client, event_publisher);

        let (signed_update_sender, signed_update_receiver) = mpsc::channel();
        let (rpc_server_shutdown, rpc_server_shutdown_receiver) = mpsc::channel();
        let rpc_server = start_rpc_server(
            consensus.clone(),
            SenderHandle::new(self.network),
            RpcServerStub::new(requests),
            signed_update_sender.clone(),
            rpc_server_shutdown_receiver,
        );
        let (repair_worker_shutdown, repair_worker_shutdown_receiver) = mpsc::channel();
        let repair_worker =
            start_repair_worker(consensus.clone(), repairs, repair_worker_shutdown_receiver);

        let mut participant = Participant {
            consensus,
            address: configuration.address,
            step_duration: configuration.step_duration,
            signed_update_sender,
            signed_update_receiver: Some(signed_update_receiver),
            poller: Some(poller),
            poller_shutdown,
            rpc_server: Some(rpc_server),
            rpc_server_shutdown,
            repair_worker: Some(repair_worker),
            repair_worker_shutdown,
            stepper: None,
            stepper_shutdown: None,
            event_bus,
            event_bus_shutdown,
        };

        match self.role {
            Role::Bootstrap {
                tether_wallet,
                tether_public_key,
            } => participant.bootstrap(tether_wallet, &tether_public_key)?,
            Role::Join {
                tether_wallet,
                tether_key,
                quorum,
            } => participant.join(tether_wallet, tether_key, &quorum)?,
        }
        Ok(participant)
    }
}

/// A handle to the background threads of a participant. When this value is dropped, all
/// background threads are gracefully shut down.
///
/// The methods mirror the requests peers send over the network, but are answered locally.
pub struct Participant<N: Network + 'static> {
    consensus: Consensus<N>,
    address: Address,
    step_duration: Duration,
    signed_update_sender: Sender<SignedUpdate>,
    /// Taken by the stepper once the participant starts ticking.
    signed_update_receiver: Option<Receiver<SignedUpdate>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    rpc_server: Option<JoinHandle<()>>,
    rpc_server_shutdown: Sender<()>,
    repair_worker: Option<JoinHandle<()>>,
    repair_worker_shutdown: Sender<()>,
    stepper: Option<JoinHandle<()>>,
    stepper_shutdown: Option<Sender<()>>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network + 'static> Participant<N> {
    /// Start the stepper. The current instant becomes the start of step 0 of a round.
    pub(crate) fn start_ticking(&mut self) {
        let Some(signed_updates) = self.signed_update_receiver.take() else {
            return;
        };
        let (shutdown, shutdown_receiver) = mpsc::channel();
        self.stepper = Some(start_stepper(
            self.consensus.clone(),
            self.step_duration,
            signed_updates,
            shutdown_receiver,
        ));
        self.stepper_shutdown = Some(shutdown);
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// This participant's slot among the siblings, if it holds one.
    pub fn sibling_index(&self) -> Option<u8> {
        self.consensus.engine().sibling_index()
    }

    pub fn height(&self) -> u32 {
        self.consensus.engine().height()
    }

    /// A client that shares this participant's connection to the network.
    pub fn client(&self) -> RpcClient<N> {
        self.consensus.client.clone()
    }

    pub fn metadata(&self) -> Metadata {
        self.consensus.engine().metadata().clone()
    }

    pub fn block(&self, height: u32) -> Result<Block, ParticipantError> {
        Ok(self.consensus.engine().load_block(height)?)
    }

    pub fn wallet(&self, id: WalletID) -> Result<Wallet, ParticipantError> {
        Ok(self.consensus.engine().load_wallet(id)?)
    }

    pub fn wallet_ids(&self) -> Vec<WalletID> {
        self.consensus.engine().wallet_list()
    }

    pub fn recent_snapshot_height(&self) -> u32 {
        self.consensus.engine().recent_snapshot()
    }

    pub fn snapshot_metadata(&self, head: u32) -> Result<Metadata, ParticipantError> {
        Ok(self.consensus.engine().load_snapshot_metadata(head)?)
    }

    pub fn snapshot_wallet_list(&self, head: u32) -> Result<Vec<WalletID>, ParticipantError> {
        Ok(self.consensus.engine().load_snapshot_wallet_list(head)?)
    }

    pub fn snapshot_wallet(&self, head: u32, id: WalletID) -> Result<Wallet, ParticipantError> {
        Ok(self.consensus.engine().load_snapshot_wallet(head, id)?)
    }

    /// This sibling's segment of `id`'s sector.
    pub fn download_segment(&self, id: WalletID) -> Result<Vec<u8>, ParticipantError> {
        Ok(self.consensus.engine().load_segment(id)?)
    }

    /// Store this sibling's segment of a pending sector update. Returns `Ok(false)` if the segment
    /// does not match the update.
    pub fn upload_segment(&self, upload: &SegmentUpload) -> Result<bool, ParticipantError> {
        self.consensus.upload_segment(upload)
    }

    /// Queue a script input for this sibling's next update.
    pub fn add_script_input(&self, input: ScriptInput) {
        self.consensus.add_script_input(input)
    }

    /// Pass a signed update to the stepper. Updates that arrive before the participant ticks wait
    /// in the stepper's queue.
    pub fn handle_signed_update(&self, signed_update: SignedUpdate) -> Result<(), ParticipantError> {
        self.signed_update_sender
            .send(signed_update)
            .map_err(|_| ParticipantError::ShuttingDown)
    }

    pub fn consensus_progress(&self) -> ConsensusProgress {
        self.consensus.progress()
    }
}

impl<N: Network + 'static> Drop for Participant<N> {
    fn drop(&mut self) {
        // The RPC server and the stepper read from the poller's channels, so the poller stops
        // last.
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        if let Some(shutdown) = self.stepper_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(stepper) = self.stepper.take() {
            let _ = stepper.join();
        }

        let _ = self.rpc_server_shutdown.send(());
        if let Some(rpc_server) = self.rpc_server.take() {
            let _ = rpc_server.join();
        }

        let _ = self.repair_worker_shutdown.send(());
        if let Some(repair_worker) = self.repair_worker.take() {
            let _ = repair_worker.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
