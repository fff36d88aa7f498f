/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable peer-to-peer (P2P) networking.
//!
//! Participants only ever talk in request/response pairs. The transport is supplied by the user
//! through the [`Network`](network::Network) trait; this module defines the wire messages and the
//! threads that route them.

pub mod network;

pub mod messages;

pub(crate) mod receiving;

pub(crate) mod sending;
