/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of the delta engine in isolation: several engines fed the same blocks, an engine built
//! from another's snapshot, and a sector update from proposal to commit.

mod common;

use std::sync::mpsc;

use borsh::BorshSerialize;
use common::{files::TestDir, logging::setup_logger};
use ed25519_dalek::SigningKey;
use log::LevelFilter;
use quorum_rs::{
    delta::{
        scripts::{
            add_sibling_input, create_fountain_wallet_input, default_script, propose_upload_input,
            send_coin_input, sign_input,
        },
        Block, Engine, Heartbeat, SegmentUpload,
    },
    erasure::rs_encode,
    events::Event,
    merkle::segment_hash,
    state::{ScriptInput, Sibling, UpdateAdvancement, UpdateSectorArgs},
    types::{
        crypto_primitives::Keypair, Address, Balance, CryptoHash, WalletID, ATOM_SIZE,
        BOOTSTRAP_SIBLING_BALANCE, FOUNTAIN_WALLET_ID,
    },
};
use rand_core::OsRng;

const TETHER: WalletID = WalletID::new(1);

fn bootstrapped_engine(prefix: &str, sibling: &Keypair, tether: &Keypair) -> Engine {
    let address = Address::new("sibling", 7000);
    let mut engine = Engine::new(prefix);
    engine.set_identity(address.clone(), sibling.public_bytes());
    engine
        .bootstrap(
            Sibling::candidate(address, sibling.public_bytes()),
            TETHER,
            &tether.public_bytes(),
        )
        .unwrap();
    engine
}

/// A block for `engine`'s height that carries sibling 0's heartbeat.
fn next_block(engine: &Engine, sibling: &Keypair, script_inputs: Vec<ScriptInput>) -> Block {
    let heartbeat = Heartbeat {
        parent_block: engine.metadata().parent_block,
        entropy: [engine.height() as u8; 32],
        storage_proof: engine.state().build_storage_proof(),
    };
    let mut block = Block {
        height: engine.height(),
        parent_block: engine.metadata().parent_block,
        script_inputs,
        ..Default::default()
    };
    block.heartbeat_signatures[0] = sibling.sign(&heartbeat.signing_bytes());
    block.heartbeats[0] = heartbeat;
    block
}

fn assert_same_state(a: &Engine, b: &Engine) {
    assert_eq!(a.metadata(), b.metadata());
    assert_eq!(a.wallet_list(), b.wallet_list());
    for id in a.wallet_list() {
        assert_eq!(a.load_wallet(id).unwrap(), b.load_wallet(id).unwrap());
    }
}

#[test]
fn engines_fed_the_same_blocks_agree() {
    setup_logger(LevelFilter::Warn);
    let mut csprg = OsRng {};
    let sibling = Keypair::new(SigningKey::generate(&mut csprg));
    let tether = Keypair::new(SigningKey::generate(&mut csprg));
    let newcomer = Keypair::new(SigningKey::generate(&mut csprg));
    let dir = TestDir::new("engines_agree");

    // 1. Four engines from the same genesis. The first one produces the blocks.
    let mut engines: Vec<Engine> = (0..4)
        .map(|i| bootstrapped_engine(&dir.prefix(&format!("engine{}", i)), &sibling, &tether))
        .collect();

    // 2. A wallet from the fountain, a transfer into it, and a new sibling.
    let new_wallet = WalletID::new(77);
    let inputs = vec![
        vec![ScriptInput {
            wallet_id: FOUNTAIN_WALLET_ID,
            input: create_fountain_wallet_input(new_wallet, &default_script(&tether.public_bytes())),
            deadline: 5,
        }],
        vec![ScriptInput {
            wallet_id: TETHER,
            input: sign_input(&tether, &send_coin_input(new_wallet, Balance::new(500))),
            deadline: 5,
        }],
        vec![ScriptInput {
            wallet_id: TETHER,
            input: add_sibling_input(
                &Sibling::candidate(Address::new("newcomer", 7001), newcomer.public_bytes()),
                &tether,
            )
            .unwrap(),
            deadline: 5,
        }],
        vec![],
    ];
    for script_inputs in inputs {
        let block = next_block(&engines[0], &sibling, script_inputs);
        let hashes: Vec<CryptoHash> = engines
            .iter_mut()
            .map(|engine| engine.compile(&block).unwrap())
            .collect();
        assert!(hashes.iter().all(|hash| *hash == hashes[0]));
    }

    // 3. Every engine ends in the same state, with the effects of all three inputs.
    for engine in &engines[1..] {
        assert_same_state(&engines[0], engine);
    }
    let engine = &engines[0];
    assert_eq!(engine.height(), 4);
    assert_eq!(engine.wallet_list(), vec![FOUNTAIN_WALLET_ID, TETHER, new_wallet]);
    let funded = engine.load_wallet(new_wallet).unwrap();
    assert!(funded.balance.compare(&Balance::new(500)) >= 0);
    let siblings = &engine.metadata().siblings;
    assert!(siblings[0].is_active());
    assert!(siblings[1].is_passive());
    assert_eq!(siblings[1].public_key, newcomer.public_bytes());
    assert_eq!(siblings[1].wallet_id, TETHER);
}

#[test]
fn engine_rebuilt_from_snapshot_matches() {
    setup_logger(LevelFilter::Warn);
    let mut csprg = OsRng {};
    let sibling = Keypair::new(SigningKey::generate(&mut csprg));
    let tether = Keypair::new(SigningKey::generate(&mut csprg));
    let dir = TestDir::new("snapshot_rebuild");
    let mut source = bootstrapped_engine(&dir.prefix("source"), &sibling, &tether);

    // 1. Five blocks: the history rolls, and snapshots, at heights 0 and 3.
    for height in 0..5u32 {
        let inputs = vec![ScriptInput {
            wallet_id: TETHER,
            input: sign_input(
                &tether,
                &send_coin_input(FOUNTAIN_WALLET_ID, Balance::new(height as u128 + 1)),
            ),
            deadline: height + 4,
        }];
        let block = next_block(&source, &sibling, inputs);
        source.compile(&block).unwrap();
    }
    assert_eq!(source.recent_snapshot(), 3);

    // 2. A second engine adopts snapshot 3 and replays blocks 3 and 4.
    let mut joiner = Engine::new(&dir.prefix("joiner"));
    joiner.bootstrap_set_metadata(source.load_snapshot_metadata(3).unwrap());
    for id in source.load_snapshot_wallet_list(3).unwrap() {
        joiner
            .bootstrap_insert_wallet(source.load_snapshot_wallet(3, id).unwrap())
            .unwrap();
    }
    joiner.bootstrap_join_setup();
    assert_eq!(joiner.height(), 3);
    for height in 3..5 {
        joiner.compile(&source.load_block(height).unwrap()).unwrap();
    }

    // 3. Both engines agree, including the script inputs still remembered.
    assert_same_state(&source, &joiner);
    let tether_wallet = joiner.load_wallet(TETHER).unwrap();
    assert_eq!(
        tether_wallet.known_scripts,
        source.load_wallet(TETHER).unwrap().known_scripts
    );
    assert!(!tether_wallet.known_scripts.is_empty());
    assert_eq!(
        tether_wallet.balance,
        Balance::new(BOOTSTRAP_SIBLING_BALANCE - (1 + 2 + 3 + 4 + 5))
    );
}

#[test]
fn sector_update_commits_on_confirmed_siblings() {
    setup_logger(LevelFilter::Warn);
    let mut csprg = OsRng {};
    let keys: Vec<Keypair> = (0..4)
        .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
        .collect();
    let addresses: Vec<Address> = (0..4).map(|i| Address::new("sibling", 7000 + i)).collect();
    let tether = Keypair::new(SigningKey::generate(&mut csprg));
    let dir = TestDir::new("sector_update");

    // 1. Four engines, one per sibling. All start from sibling 0's genesis.
    let mut engines = Vec::new();
    let mut repairs = Vec::new();
    let mut events = Vec::new();
    for i in 0..4 {
        let mut engine = Engine::new(&dir.prefix(&format!("engine{}", i)));
        engine.set_identity(addresses[i].clone(), keys[i].public_bytes());
        engine
            .bootstrap(
                Sibling::candidate(addresses[0].clone(), keys[0].public_bytes()),
                TETHER,
                &tether.public_bytes(),
            )
            .unwrap();
        let (repair_sender, repair_receiver) = mpsc::channel();
        engine.set_repair_sender(repair_sender);
        let (publisher, subscriber) = mpsc::channel();
        engine.set_event_publisher(publisher);
        engines.push(engine);
        repairs.push(repair_receiver);
        events.push(subscriber);
    }
    let compile_everywhere = |engines: &mut Vec<Engine>, block: Block| {
        for engine in engines.iter_mut() {
            engine.compile(&block).unwrap();
        }
    };

    // 2. Block 0 adds siblings 1 to 3, each engine finds its slot.
    let joins = (1..4)
        .map(|i| ScriptInput {
            wallet_id: TETHER,
            input: add_sibling_input(
                &Sibling::candidate(addresses[i].clone(), keys[i].public_bytes()),
                &tether,
            )
            .unwrap(),
            deadline: 3,
        })
        .collect();
    let block = next_block(&engines[0], &keys[0], joins);
    compile_everywhere(&mut engines, block);
    for (i, engine) in engines.iter().enumerate() {
        assert_eq!(engine.sibling_index(), Some(i as u8));
    }

    // 3. Block 1 proposes 16 atoms per segment, k = 2, three confirmations, deadline 4.
    let data: Vec<u8> = (0..2 * 16 * ATOM_SIZE).map(|i| (i % 253) as u8).collect();
    let mut segments: [Vec<u8>; 4] = Default::default();
    assert_eq!(rs_encode(&mut data.as_slice(), &mut segments, 2).unwrap(), 16);
    let mut hash_set = [CryptoHash::default(); 4];
    for (hash, segment) in hash_set.iter_mut().zip(&segments) {
        *hash = segment_hash(segment).unwrap();
    }
    let proposal = UpdateSectorArgs {
        parent_counter: 0,
        atoms: 16,
        k: 2,
        d: 2,
        hash_set,
        confirmations_required: 3,
        deadline: 4,
    };
    let input = ScriptInput {
        wallet_id: TETHER,
        input: sign_input(&tether, &propose_upload_input(&proposal).unwrap()),
        deadline: 3,
    };
    let block = next_block(&engines[0], &keys[0], vec![input]);
    compile_everywhere(&mut engines, block);
    let wallet = engines[0].load_wallet(TETHER).unwrap();
    assert_eq!(wallet.sector.active_updates.len(), 1);
    let update_index = wallet.sector.active_updates[0].counter();

    // 4. Siblings 0 to 2 get their segments. A wrong segment is refused.
    for i in 0..3 {
        let wrong = SegmentUpload {
            wallet_id: TETHER,
            update_index,
            new_segment: segments[(i + 1) % 4].clone(),
        };
        assert!(!engines[i].process_segment_upload(&wrong).unwrap());
        let upload = SegmentUpload {
            new_segment: segments[i].clone(),
            ..wrong
        };
        assert!(engines[i].process_segment_upload(&upload).unwrap());
    }

    // 5. Block 2 carries their signed advancements.
    let mut block = next_block(&engines[0], &keys[0], vec![]);
    for i in 0..3 {
        let advancement = UpdateAdvancement {
            sibling_index: i as u8,
            wallet_id: TETHER,
            update_index,
        };
        block
            .advancement_signatures
            .push(keys[i].sign(&advancement.try_to_vec().unwrap()));
        block.update_advancements.push(advancement);
    }
    compile_everywhere(&mut engines, block);

    // 6. The update commits when block 4 compiles.
    while engines[0].height() <= 4 {
        let block = next_block(&engines[0], &keys[0], vec![]);
        compile_everywhere(&mut engines, block);
    }
    for engine in &engines[1..] {
        assert_same_state(&engines[0], engine);
    }
    let wallet = engines[0].load_wallet(TETHER).unwrap();
    assert!(wallet.sector.active_updates.is_empty());
    assert_eq!(wallet.sector.atoms, 16);
    assert_eq!(wallet.sector.k, 2);
    assert_eq!(wallet.sector.hash_set, hash_set);
    assert_eq!(wallet.sector.recent_update_counter, update_index);

    // 7. The uploaders hold their segments. Sibling 3 has none, and asks for a repair.
    for i in 0..3 {
        assert_eq!(engines[i].load_segment(TETHER).unwrap(), segments[i]);
        assert!(repairs[i].try_recv().is_err());
    }
    assert!(engines[3].load_segment(TETHER).is_err());
    assert_eq!(repairs[3].try_recv().unwrap(), TETHER);
    for (i, subscriber) in events.iter().enumerate() {
        let commits: Vec<bool> = subscriber
            .try_iter()
            .filter_map(|event| match event {
                Event::CommitSectorUpdate(event) if event.wallet_id == TETHER => {
                    Some(event.repair_needed)
                }
                _ => None,
            })
            .collect();
        assert_eq!(commits, vec![i == 3]);
    }
}
