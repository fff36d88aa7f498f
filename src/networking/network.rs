/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use super::messages::Message;
use crate::types::Address;

/// A transport between participants, addressed by their [`Address`].
///
/// Implementations deliver whole [`Message`]s and must never block: a send to an unreachable peer
/// is dropped, and the caller notices when its request times out.
pub trait Network: Clone + Send {
    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: &Address, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(Address, Message)>;
}
