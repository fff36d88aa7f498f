/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The contributions siblings exchange during a round.

use crate::delta::Heartbeat;
use crate::state::{ScriptInput, UpdateAdvancement};
use crate::types::crypto_primitives::hash;
use crate::types::{CryptoHash, SignatureBytes};
use borsh::{BorshDeserialize, BorshSerialize};

/// What one sibling contributes to the next block.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Update {
    pub heartbeat: Heartbeat,
    pub heartbeat_signature: SignatureBytes,
    pub script_inputs: Vec<ScriptInput>,
    pub update_advancements: Vec<UpdateAdvancement>,
    /// One per advancement, by the sibling the advancement names.
    pub advancement_signatures: Vec<SignatureBytes>,
}

impl Update {
    pub fn hash(&self) -> CryptoHash {
        hash(&self.try_to_vec().unwrap_or_default())
    }
}

/// An [`Update`] with the chain of signatures collected while it was relayed.
///
/// `signatories[0]` is the sibling that wrote the update. Signature `i` covers the update's hash
/// followed by signatures `0..i`, so every relay makes the signed message longer and a signature
/// cannot be moved to another position in the chain.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedUpdate {
    pub update: Update,
    pub signatories: Vec<u8>,
    pub signatures: Vec<SignatureBytes>,
}

impl SignedUpdate {
    /// The message the next signatory signs, given the first `signatures` signatures.
    pub fn chained_message(update_hash: &CryptoHash, signatures: &[SignatureBytes]) -> Vec<u8> {
        let mut message = Vec::with_capacity(32 + 64 * signatures.len());
        message.extend_from_slice(update_hash.as_bytes());
        for signature in signatures {
            message.extend_from_slice(signature.as_bytes());
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_message_grows_with_each_signature() {
        let update_hash = Update::default().hash();
        let first = SignatureBytes::new([1; 64]);
        let second = SignatureBytes::new([2; 64]);

        let message = SignedUpdate::chained_message(&update_hash, &[first, second]);
        assert_eq!(message.len(), 32 + 128);
        assert_eq!(&message[..32], update_hash.as_bytes());
        assert_eq!(&message[32..96], first.as_bytes());
        assert_eq!(&message[96..], second.as_bytes());
    }
}
