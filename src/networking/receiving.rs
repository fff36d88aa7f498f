/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from the P2P network.

use super::messages::{Message, RpcRequest, RpcResponse};
use super::network::Network;
use crate::types::Address;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// Callers waiting for a response, by request id.
pub(crate) type PendingResponses = Arc<Mutex<HashMap<u64, Sender<RpcResponse>>>>;

/// A request taken off the network: who sent it, its id and the request itself.
pub(crate) type IncomingRequest = (Address, u64, RpcRequest);

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them.
///
/// Requests are passed to the returned receiver, which the RPC server drains. A response is
/// delivered to whoever registered its id in `pending`, and dropped if nobody did, e.g. because
/// the caller already timed out.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    pending: PendingResponses,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, Receiver<IncomingRequest>) {
    let (to_request_receiver, request_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        match network.recv() {
            Some((origin, Message::Request { id, request })) => {
                let _ = to_request_receiver.send((origin, id, request));
            }
            Some((origin, Message::Response { id, response })) => {
                let waiting = match pending.lock() {
                    Ok(mut pending) => pending.remove(&id),
                    Err(_) => return,
                };
                match waiting {
                    Some(waiting) => {
                        let _ = waiting.send(response);
                    }
                    None => log::debug!("dropping unsolicited response {} from {}", id, origin),
                }
            }
            None => thread::yield_now(),
        }
    });
    (poller_thread, request_receiver)
}

/// A receiving end for requests. [`RpcServerStub::recv_request`] returns the next request, if one
/// arrives before the deadline.
pub(crate) struct RpcServerStub {
    requests: Receiver<IncomingRequest>,
}

impl RpcServerStub {
    pub(crate) fn new(requests: Receiver<IncomingRequest>) -> RpcServerStub {
        RpcServerStub { requests }
    }

    pub(crate) fn recv_request(
        &self,
        deadline: Instant,
    ) -> Result<IncomingRequest, RpcRequestReceiveError> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match self.requests.recv_timeout(timeout) {
            Ok(request) => Ok(request),
            Err(RecvTimeoutError::Timeout) => Err(RpcRequestReceiveError::NotAvailable),
            Err(RecvTimeoutError::Disconnected) => Err(RpcRequestReceiveError::Disconnected),
        }
    }
}

#[derive(Debug)]
pub(crate) enum RpcRequestReceiveError {
    Disconnected,
    NotAvailable,
}
