/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that keeps a sibling's round in step with the rest of the quorum.
//!
//! Every `step_duration` the stepper [ticks](Consensus::tick). Between ticks it processes the
//! signed updates the RPC server hands it, so that updates are never handled concurrently with
//! condensing or compiling a block.

use super::consensus::{Consensus, ConsensusError};
use super::update::SignedUpdate;
use crate::events::*;
use crate::networking::network::Network;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

const MAX_WAIT: Duration = Duration::from_millis(50);

pub(crate) fn start_stepper<N: Network + 'static>(
    mut consensus: Consensus<N>,
    step_duration: Duration,
    signed_updates: Receiver<SignedUpdate>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        consensus.begin_ticking();
        let mut ticks: u64 = 0;
        let mut next_tick = Instant::now() + step_duration;
        // Updates that built on another parent, with the tick at which to try them again.
        let mut deferred: Vec<(u64, SignedUpdate)> = Vec::new();

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) => return,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("Stepper thread disconnected from main thread")
                }
            }

            if Instant::now() >= next_tick {
                // Ticks are scheduled from the start of ticking, so slow rounds do not drift.
                next_tick += step_duration;
                ticks += 1;
                consensus.tick();

                let (due, later): (Vec<_>, Vec<_>) = deferred.into_iter().partition(|(at, _)| *at <= ticks);
                deferred = later;
                for (_, signed_update) in due {
                    receive(&mut consensus, signed_update, false);
                }
            }

            let wait = next_tick
                .saturating_duration_since(Instant::now())
                .min(MAX_WAIT);
            match signed_updates.recv_timeout(wait) {
                Ok(signed_update) => {
                    if let Some(signed_update) = receive(&mut consensus, signed_update, true) {
                        deferred.push((ticks + 1, signed_update));
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => thread::sleep(wait),
            }
        }
    })
}

/// Handle one signed update. If it builds on another parent and `may_defer` is set, it is
/// returned instead of being rejected, and the caller tries it once more right after the next
/// tick. There is no fixed delay: the wait is whatever remains of the current step.
fn receive<N: Network>(
    consensus: &mut Consensus<N>,
    signed_update: SignedUpdate,
    may_defer: bool,
) -> Option<SignedUpdate> {
    match consensus.handle_signed_update(signed_update.clone()) {
        Ok(()) => None,
        Err(ConsensusError::InvalidParent) if may_defer => Some(signed_update),
        Err(ConsensusError::HaveHeartbeat) => None,
        Err(err) => {
            log::debug!(
                "rejected update from {:?}: {}",
                signed_update.signatories.first(),
                err
            );
            Event::publish(
                &consensus.event_publisher,
                Event::RejectSignedUpdate(RejectSignedUpdateEvent {
                    timestamp: SystemTime::now(),
                    height: consensus.engine().height(),
                    reason: err.to_string(),
                }),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::consensus::tests::{signed_by, two_sibling_consensus, update_from};
    use crate::types::crypto_primitives::{Keypair, SigningKey};
    use crate::types::CryptoHash;
    use rand_core::OsRng;
    use std::sync::mpsc;

    #[test]
    fn updates_on_another_parent_are_deferred_once() {
        let mut csprg = OsRng {};
        let me = Keypair::new(SigningKey::generate(&mut csprg));
        let other = Keypair::new(SigningKey::generate(&mut csprg));
        let (mut consensus, _dir) = two_sibling_consensus("stepper_defer", &me, &other);
        let (publisher, subscriber) = mpsc::channel();
        consensus.event_publisher = Some(publisher);

        // 1. An update on an unknown parent is handed back on the first attempt.
        let mut update = update_from(&consensus, vec![]);
        update.heartbeat.parent_block = CryptoHash::new([7; 32]);
        let early = signed_by(update, vec![(1, &other)]);
        let returned = receive(&mut consensus, early.clone(), true);
        assert_eq!(returned.map(|signed_update| signed_update.update), Some(early.update.clone()));
        assert_eq!(subscriber.try_iter().count(), 0);

        // 2. On the retry after the tick it is rejected for good.
        assert!(receive(&mut consensus, early, false).is_none());
        assert!(subscriber
            .try_iter()
            .any(|event| matches!(event, Event::RejectSignedUpdate(_))));

        // 3. An update on the current parent is taken straight away.
        let good = signed_by(update_from(&consensus, vec![]), vec![(1, &other)]);
        assert!(receive(&mut consensus, good, true).is_none());
        assert_eq!(consensus.buffers().updates[1].len(), 1);
    }
}
