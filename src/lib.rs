/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Replicated state machine and consensus core for a quorum of storage hosts.
//!
//! A quorum is up to [four](types::QUORUM_SIZE) siblings that keep identical copies of a state of
//! wallets. Each wallet owns a balance, a script, and a sector of erasure-coded data of which each
//! sibling stores one segment. Siblings agree on the blocks that change the state in fixed rounds
//! of signed updates.
//!
//! The crate is layered bottom-up:
//! - [types], [encoding], [erasure] and [merkle] hold the primitives,
//! - [state] is the on-disk wallet store,
//! - [interpreter] runs wallet scripts against it,
//! - [delta] is the deterministic engine that compiles blocks,
//! - [participant] runs the engine in a quorum over a user-provided [network](networking::network::Network).

pub mod types;

pub mod encoding;

pub mod erasure;

pub mod merkle;

pub mod state;

pub mod interpreter;

pub mod delta;

pub mod networking;

pub mod participant;

pub mod events;

pub(crate) mod event_bus;

pub(crate) mod logging;
