/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for sending messages to the P2P network.

use super::messages::{Message, RpcResponse};
use super::network::Network;
use crate::types::Address;

/// Handle for sending messages to the [`Network`].
///
/// It can be used to send instances of any type that implement the [`Into<Message>`] trait.
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: &Address, msg: S) {
        self.network.send(peer, msg.into())
    }

    /// Answer request `id` from `peer`.
    pub(crate) fn respond(&mut self, peer: &Address, id: u64, response: RpcResponse) {
        self.network.send(peer, Message::Response { id, response })
    }
}
