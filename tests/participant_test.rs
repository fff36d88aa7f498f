/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of participants running over a mock network: a quorum bootstrapped by one sibling, and a
//! second participant joining it.

mod common;

use std::{
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use common::{
    files::TestDir,
    logging::setup_logger,
    network::{mock_network, NetworkStub},
};
use ed25519_dalek::SigningKey;
use log::LevelFilter;
use quorum_rs::{
    participant::{Configuration, Participant, ParticipantSpec, Role},
    types::{crypto_primitives::Keypair, Address, WalletID, FOUNTAIN_WALLET_ID},
};
use rand_core::OsRng;

const TETHER: WalletID = WalletID::new(24);

fn configuration(dir: &TestDir, address: &Address, step_duration: Duration) -> Configuration {
    let mut csprg = OsRng {};
    Configuration::builder()
        .me(SigningKey::generate(&mut csprg))
        .address(address.clone())
        .file_prefix(dir.prefix(&address.to_string()))
        .step_duration(step_duration)
        .rpc_timeout(Duration::from_secs(2))
        .log_events(true)
        .build()
}

/// Poll `condition` until it holds or `limit` passes.
fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn bootstrapped_participant_ticks() {
    setup_logger(LevelFilter::Warn);
    let mut csprg = OsRng {};
    let tether = Keypair::new(SigningKey::generate(&mut csprg));
    let dir = TestDir::new("bootstrap_ticks");
    let address = Address::new("localhost", 9981);
    let step_duration = Duration::from_millis(300);
    let network = mock_network([address.clone()].into_iter()).remove(0);

    // 1. Bootstrap, counting the blocks compiled after start returns.
    let compiled = Arc::new(Mutex::new(Vec::new()));
    let compiled_in_handler = compiled.clone();
    let participant: Participant<NetworkStub> = ParticipantSpec::builder()
        .network(network)
        .configuration(configuration(&dir, &address, step_duration))
        .role(Role::Bootstrap {
            tether_wallet: TETHER,
            tether_public_key: tether.public_bytes(),
        })
        .on_compile_block(move |event| compiled_in_handler.lock().unwrap().push(event.height))
        .build()
        .start()
        .unwrap();

    // 2. The genesis block is compiled and the first round has begun.
    assert_eq!(participant.sibling_index(), Some(0));
    assert_eq!(participant.height(), 1);
    let progress = participant.consensus_progress();
    assert_eq!(progress.height, 1);
    assert_eq!(progress.current_step, 0);

    // 3. One step later the participant is at step 1.
    thread::sleep(step_duration + Duration::from_millis(50));
    assert_eq!(participant.consensus_progress().current_step, 1);

    // 4. The wallets and the genesis block are served over the network, too.
    assert_eq!(participant.wallet_ids(), vec![FOUNTAIN_WALLET_ID, TETHER]);
    let mut client = participant.client();
    assert_eq!(
        client.wallet_ids(participant.address()).unwrap(),
        vec![FOUNTAIN_WALLET_ID, TETHER]
    );
    assert_eq!(
        client.block(participant.address(), 0).unwrap(),
        participant.block(0).unwrap()
    );
    assert!(client.block(participant.address(), 5).is_err());

    // 5. Rounds keep ending with a block.
    assert!(wait_until(step_duration * 12, || participant.height() >= 2));
    assert!(wait_until(Duration::from_secs(1), || compiled.lock().unwrap().contains(&1)));
}

#[test]
fn bootstrap_with_fountain_tether_fails() {
    setup_logger(LevelFilter::Warn);
    let dir = TestDir::new("bootstrap_fountain");
    let address = Address::new("localhost", 9982);
    let network = mock_network([address.clone()].into_iter()).remove(0);

    let result = ParticipantSpec::builder()
        .network(network)
        .configuration(configuration(&dir, &address, Duration::from_millis(300)))
        .role(Role::Bootstrap {
            tether_wallet: FOUNTAIN_WALLET_ID,
            tether_public_key: [1; 32],
        })
        .build()
        .start();
    assert!(result.is_err());
}

#[test]
fn participant_joins_quorum() {
    setup_logger(LevelFilter::Warn);
    let mut csprg = OsRng {};
    let tether_key = SigningKey::generate(&mut csprg);
    let tether = Keypair::new(tether_key.clone());
    let dir = TestDir::new("join");
    let step_duration = Duration::from_millis(200);
    let first_address = Address::new("localhost", 9991);
    let second_address = Address::new("localhost", 9992);
    let mut networks = mock_network([first_address.clone(), second_address.clone()].into_iter());
    let second_network = networks.remove(1);
    let first_network = networks.remove(0);

    // 1. The first participant bootstraps the quorum.
    let first = ParticipantSpec::builder()
        .network(first_network)
        .configuration(configuration(&dir, &first_address, step_duration))
        .role(Role::Bootstrap {
            tether_wallet: TETHER,
            tether_public_key: tether.public_bytes(),
        })
        .build()
        .start()
        .unwrap();

    // 2. The second joins through it, paying with the same tether wallet.
    let second = ParticipantSpec::builder()
        .network(second_network)
        .configuration(configuration(&dir, &second_address, step_duration))
        .role(Role::Join {
            tether_wallet: TETHER,
            tether_key,
            quorum: vec![first_address.clone()],
        })
        .build()
        .start()
        .unwrap();
    assert_eq!(second.sibling_index(), Some(1));

    // 3. Once the passive window is over, both participants see two active siblings.
    let both_active = |participant: &Participant<NetworkStub>| {
        let metadata = participant.metadata();
        metadata.siblings[0].is_active() && metadata.siblings[1].is_active()
    };
    assert!(wait_until(step_duration * 5 * 12, || both_active(&first) && both_active(&second)));
    assert_eq!(second.metadata().siblings[1].address, second_address);
    assert_eq!(first.metadata().siblings[1].address, second_address);

    // 4. The two keep building the same chain.
    let height = first.height().min(second.height()) + 1;
    assert!(wait_until(step_duration * 5 * 3, || {
        first.height() > height && second.height() > height
    }));
    assert_eq!(first.block(height).unwrap(), second.block(height).unwrap());
    assert!(both_active(&first) && both_active(&second));
}
