/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rebuilding a sibling's missing segment from the segments of the other siblings.
//!
//! The engine asks for a repair when a sector update commits without this sibling holding its
//! segment. The repair worker downloads `k` verified segments, decodes the sector, re-encodes it
//! and keeps the segment that belongs to this sibling, provided it hashes to the root the quorum
//! recorded for it.

use super::consensus::Consensus;
use crate::delta::{DeltaError, Engine};
use crate::erasure::{rs_encode, rs_recover, ErasureError};
use crate::events::*;
use crate::merkle::{segment_hash, MerkleError};
use crate::networking::network::Network;
use crate::types::{Address, WalletID, ATOM_SIZE, QUORUM_SIZE};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

#[derive(Debug)]
pub enum RepairError {
    Delta(DeltaError),
    Erasure(ErasureError),
    Merkle(MerkleError),
    Io(io::Error),
    NotSibling,
    EmptySector,
    NotEnoughSegments { have: usize, need: usize },
    /// The rebuilt segment does not hash to the recorded root, or the sector changed meanwhile.
    HashMismatch,
}

impl Display for RepairError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RepairError::Delta(err) => write!(f, "{}", err),
            RepairError::Erasure(err) => write!(f, "{}", err),
            RepairError::Merkle(err) => write!(f, "{}", err),
            RepairError::Io(err) => write!(f, "repair i/o failed: {}", err),
            RepairError::NotSibling => write!(f, "only siblings hold segments"),
            RepairError::EmptySector => write!(f, "sector is empty"),
            RepairError::NotEnoughSegments { have, need } => {
                write!(f, "gathered {} valid segments, need {}", have, need)
            }
            RepairError::HashMismatch => write!(f, "rebuilt segment does not match its root"),
        }
    }
}

impl std::error::Error for RepairError {}

impl From<DeltaError> for RepairError {
    fn from(value: DeltaError) -> Self {
        RepairError::Delta(value)
    }
}

impl From<ErasureError> for RepairError {
    fn from(value: ErasureError) -> Self {
        RepairError::Erasure(value)
    }
}

impl From<MerkleError> for RepairError {
    fn from(value: MerkleError) -> Self {
        RepairError::Merkle(value)
    }
}

impl From<io::Error> for RepairError {
    fn from(value: io::Error) -> Self {
        RepairError::Io(value)
    }
}

/// Spawn the repair worker, which starts one repair thread per wallet id it receives, unless a
/// repair of that wallet is already running.
pub(crate) fn start_repair_worker<N: Network + 'static>(
    consensus: Consensus<N>,
    repairs: Receiver<WalletID>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Repair worker thread disconnected from main thread")
            }
        }

        match repairs.recv_timeout(Duration::from_millis(50)) {
            Ok(wallet_id) => {
                if !in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(wallet_id)
                {
                    log::debug!("repair of wallet {} already running", wallet_id);
                    continue;
                }
                let mut consensus = consensus.clone();
                let in_flight = in_flight.clone();
                thread::spawn(move || {
                    Event::publish(
                        &consensus.event_publisher,
                        Event::StartRepair(StartRepairEvent {
                            timestamp: SystemTime::now(),
                            wallet_id,
                        }),
                    );
                    let success = match repair_segment(&mut consensus, wallet_id) {
                        Ok(()) => true,
                        Err(err) => {
                            log::warn!("failed to repair wallet {}: {}", wallet_id, err);
                            false
                        }
                    };
                    in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&wallet_id);
                    Event::publish(
                        &consensus.event_publisher,
                        Event::EndRepair(EndRepairEvent {
                            timestamp: SystemTime::now(),
                            wallet_id,
                            success,
                        }),
                    );
                });
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(50)),
        }
    })
}

/// Rebuild and store this sibling's segment of `wallet_id`'s sector.
pub(crate) fn repair_segment<N: Network>(
    consensus: &mut Consensus<N>,
    wallet_id: WalletID,
) -> Result<(), RepairError> {
    let (sector, me, peers) = {
        let engine = consensus.engine();
        let wallet = engine.load_wallet(wallet_id)?;
        let me = engine.sibling_index().ok_or(RepairError::NotSibling)?;
        (wallet.sector, me, segment_holders(&engine, me))
    };
    if sector.atoms == 0 {
        return Err(RepairError::EmptySector);
    }
    let k = sector.k as usize;
    let segment_len = sector.atoms as usize * ATOM_SIZE;

    let mut segments = Vec::with_capacity(k);
    let mut indices = Vec::with_capacity(k);
    for (index, address) in peers {
        if segments.len() == k {
            break;
        }
        let segment = match consensus.client.download_segment(&address, wallet_id) {
            Ok(segment) => segment,
            Err(err) => {
                log::debug!("sibling {} did not send its segment of {}: {}", index, wallet_id, err);
                continue;
            }
        };
        if segment.len() != segment_len || segment_hash(&segment)? != sector.hash_set[index as usize] {
            log::warn!("sibling {} sent a corrupt segment of {}", index, wallet_id);
            continue;
        }
        segments.push(segment);
        indices.push(index);
    }
    if segments.len() < k {
        return Err(RepairError::NotEnoughSegments {
            have: segments.len(),
            need: k,
        });
    }

    let mut readers: Vec<&[u8]> = segments.iter().map(Vec::as_slice).collect();
    let mut data = Vec::with_capacity(k * segment_len);
    rs_recover(readers.as_mut_slice(), &indices, &mut data, sector.k)?;
    let mut rebuilt: [Vec<u8>; QUORUM_SIZE] = Default::default();
    rs_encode(&mut data.as_slice(), &mut rebuilt, sector.k)?;
    let segment = &rebuilt[me as usize];
    if segment_hash(segment)? != sector.hash_set[me as usize] {
        return Err(RepairError::HashMismatch);
    }

    let engine = consensus.engine_mut();
    let current = engine.load_wallet(wallet_id)?;
    if current.sector.hash_set != sector.hash_set {
        return Err(RepairError::HashMismatch);
    }
    let sector_file = engine.state().sector_filename(wallet_id);
    let staging = format!("{}.repair", sector_file);
    fs::write(&staging, segment)?;
    fs::rename(&staging, &sector_file)?;
    log::debug!("repaired segment {} of wallet {}", me, wallet_id);
    Ok(())
}

/// The other siblings that hold segments, with their slots.
fn segment_holders(engine: &Engine, me: u8) -> Vec<(u8, Address)> {
    engine
        .metadata()
        .siblings
        .iter()
        .enumerate()
        .filter(|(index, sibling)| !sibling.is_inactive() && *index as u8 != me)
        .map(|(index, sibling)| (index as u8, sibling.address.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::messages::{Message, RpcRequest, RpcResponse};
    use crate::networking::receiving::{start_polling, PendingResponses};
    use crate::participant::rpc_client::RpcClient;
    use crate::state::test_utilities::{prefix, temp_dir};
    use crate::state::{Sibling, Wallet};
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use crate::types::{Balance, CryptoHash};
    use rand_core::OsRng;
    use std::collections::{HashMap, VecDeque};
    use std::sync::mpsc;

    /// Siblings that answer segment downloads straight from a table, and ignore everything else.
    #[derive(Clone)]
    struct SegmentServers {
        segments: Arc<HashMap<Address, Vec<u8>>>,
        inbox: Arc<Mutex<VecDeque<(Address, Message)>>>,
    }

    impl Network for SegmentServers {
        fn send(&mut self, peer: &Address, message: Message) {
            if let Message::Request {
                id,
                request: RpcRequest::DownloadSegment(_),
            } = message
            {
                let response = match self.segments.get(peer) {
                    Some(segment) => RpcResponse::Segment(segment.clone()),
                    None => RpcResponse::Error(String::from("no segment")),
                };
                self.inbox
                    .lock()
                    .unwrap()
                    .push_back((peer.clone(), Message::Response { id, response }));
            }
        }

        fn recv(&mut self) -> Option<(Address, Message)> {
            self.inbox.lock().unwrap().pop_front()
        }
    }

    fn address(index: usize) -> Address {
        Address::new("sibling", 7000 + index as u16)
    }

    #[test]
    fn missing_segment_is_rebuilt_from_peers() {
        let mut csprg = OsRng {};
        let keys: Vec<Keypair> = (0..QUORUM_SIZE)
            .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
            .collect();
        let dir = temp_dir("repair_rebuild");
        let wallet_id = WalletID::new(40);

        // 1. A quorum of four, seen by sibling 3.
        let mut engine = Engine::new(&prefix(&dir));
        engine.set_identity(address(3), keys[3].public_bytes());
        engine
            .bootstrap(
                Sibling::candidate(address(0), keys[0].public_bytes()),
                WalletID::new(1),
                &[0; 32],
            )
            .unwrap();
        for (index, keypair) in keys.iter().enumerate().skip(1) {
            engine
                .state
                .add_sibling(
                    WalletID::new(10 + index as u64),
                    Sibling::candidate(address(index), keypair.public_bytes()),
                )
                .unwrap();
        }
        assert_eq!(engine.identify(), Some(3));

        // 2. A wallet whose sector is committed, with sibling 3's segment missing.
        let data: Vec<u8> = (0..2 * 8 * ATOM_SIZE).map(|i| (i % 251) as u8).collect();
        let mut segments: [Vec<u8>; QUORUM_SIZE] = Default::default();
        assert_eq!(rs_encode(&mut data.as_slice(), &mut segments, 2).unwrap(), 8);
        let mut hash_set = [CryptoHash::default(); QUORUM_SIZE];
        for (hash, segment) in hash_set.iter_mut().zip(&segments) {
            *hash = segment_hash(segment).unwrap();
        }
        let mut wallet = Wallet::new(wallet_id, Balance::new(100), vec![]);
        wallet.sector.atoms = 8;
        wallet.sector.k = 2;
        wallet.sector.d = 2;
        wallet.sector.hash_set = hash_set;
        engine.state.insert_wallet(wallet, true).unwrap();

        // 3. Sibling 0 serves garbage, siblings 1 and 2 serve their segments.
        let mut served = HashMap::new();
        served.insert(address(0), vec![0xAA; segments[0].len()]);
        served.insert(address(1), segments[1].clone());
        served.insert(address(2), segments[2].clone());
        let network = SegmentServers {
            segments: Arc::new(served),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
        };
        let pending = PendingResponses::default();
        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, _requests) = start_polling(network.clone(), pending.clone(), poller_shutdown_receiver);
        let client = RpcClient::new(network, pending, Duration::from_secs(1));
        let mut consensus = Consensus::new(engine, keys[3].clone(), client, None);

        // 4. The rebuilt segment is sibling 3's.
        repair_segment(&mut consensus, wallet_id).unwrap();
        let sector_file = consensus.engine().state().sector_filename(wallet_id);
        assert_eq!(fs::read(&sector_file).unwrap(), segments[3]);
        assert!(fs::metadata(format!("{}.repair", sector_file)).is_err());

        poller_shutdown.send(()).unwrap();
        poller.join().unwrap();
    }

    #[test]
    fn repair_fails_without_enough_segments() {
        let mut csprg = OsRng {};
        let me = Keypair::new(SigningKey::generate(&mut csprg));
        let other = Keypair::new(SigningKey::generate(&mut csprg));
        let dir = temp_dir("repair_short");
        let wallet_id = WalletID::new(40);

        // 1. Sibling 1 of a quorum of two.
        let mut engine = Engine::new(&prefix(&dir));
        engine.set_identity(address(1), me.public_bytes());
        engine
            .bootstrap(
                Sibling::candidate(address(0), other.public_bytes()),
                WalletID::new(1),
                &[0; 32],
            )
            .unwrap();
        engine
            .state
            .add_sibling(WalletID::new(2), Sibling::candidate(address(1), me.public_bytes()))
            .unwrap();
        assert_eq!(engine.identify(), Some(1));
        let mut wallet = Wallet::new(wallet_id, Balance::new(100), vec![]);
        wallet.sector.atoms = 4;
        wallet.sector.k = 2;
        wallet.sector.d = 2;
        engine.state.insert_wallet(wallet, true).unwrap();
        engine
            .state
            .insert_wallet(Wallet::new(WalletID::new(41), Balance::new(1), vec![]), true)
            .unwrap();

        // 2. Nobody serves anything.
        let network = SegmentServers {
            segments: Arc::new(HashMap::new()),
            inbox: Arc::new(Mutex::new(VecDeque::new())),
        };
        let pending = PendingResponses::default();
        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, _requests) = start_polling(network.clone(), pending.clone(), poller_shutdown_receiver);
        let client = RpcClient::new(network, pending, Duration::from_millis(500));
        let mut consensus = Consensus::new(engine, me, client, None);

        // 3. One peer is not enough for k = 2, and an empty sector is nothing to repair.
        assert!(matches!(
            repair_segment(&mut consensus, wallet_id),
            Err(RepairError::NotEnoughSegments { have: 0, need: 2 })
        ));
        assert!(matches!(
            repair_segment(&mut consensus, WalletID::new(41)),
            Err(RepairError::EmptySector)
        ));

        poller_shutdown.send(()).unwrap();
        poller.join().unwrap();
    }
}
