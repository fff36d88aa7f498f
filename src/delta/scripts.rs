/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Builders for the standard wallet scripts and the inputs that drive them.
//!
//! A [default script](default_script) verifies that its input is `signature ++ body`, signed by
//! the wallet's key, and then transfers control to `body`. The `*_input` builders produce such
//! bodies; wrap them with [`sign_input`] before submitting.

use crate::state::{Sibling, UpdateSectorArgs};
use crate::types::crypto_primitives::Keypair;
use crate::types::{Balance, PublicKeyBytes, WalletID, FOUNTAIN_GRANT};
use borsh::BorshSerialize;
use std::io;

/// The fountain creates a wallet with id and script taken from its input, funded with
/// [`FOUNTAIN_GRANT`].
pub fn fountain_script() -> Vec<u8> {
    let grant = (FOUNTAIN_GRANT as u16).to_le_bytes();
    vec![
        0x34, 0x08, //             data_push 8 (id)
        0x02, grant[0], grant[1], // push_short grant
        0xE4, //                   push_rest (script)
        0x42, //                   add_wallet
        0xFF, //                   exit
    ]
}

/// Input for the fountain: the new wallet's id followed by its script.
pub fn create_fountain_wallet_input(id: WalletID, script: &[u8]) -> Vec<u8> {
    let mut input = id.to_le_bytes().to_vec();
    input.extend_from_slice(script);
    input
}

/// A script that runs its input only if it carries a valid signature by `public_key`.
pub fn default_script(public_key: &PublicKeyBytes) -> Vec<u8> {
    let mut script = vec![
        0x32, 0x0C, 0x00, // data_goto 12 (the key, right after this code)
        0x34, 0x20, //       data_push 32
        0xE4, //             push_rest (signature ++ body)
        0x40, //             verify
        0xE5, //             cond_reject
        0x33, 0x40, 0x00, // data_move 64 (past the signature)
        0x38, //             transfer
    ];
    script.extend_from_slice(public_key);
    script
}

/// `signature(body) ++ body`.
pub fn sign_input(keypair: &Keypair, body: &[u8]) -> Vec<u8> {
    let mut input = keypair.sign(body).bytes().to_vec();
    input.extend_from_slice(body);
    input
}

/// Ask the quorum to take `sibling` into a free slot, tethered to the calling wallet.
pub fn add_sibling_input(sibling: &Sibling, keypair: &Keypair) -> io::Result<Vec<u8>> {
    let mut body = vec![
        0x33, 0x06, 0x00, // data_move 6
        0xE4, //             push_rest
        0x41, //             add_sibling
        0xFF, //             exit
    ];
    body.extend(sibling.try_to_vec()?);
    Ok(sign_input(keypair, &body))
}

/// Unsigned body sending `amount` to `destination`.
pub fn send_coin_input(destination: WalletID, amount: Balance) -> Vec<u8> {
    let mut body = vec![
        0x33, 0x09, 0x00, // data_move 9
        0x34, 0x08, //       data_push 8 (destination)
        0x34, 0x10, //       data_push 16 (amount)
        0x43, //             send
        0xFF, //             exit
    ];
    body.extend_from_slice(&destination.to_le_bytes());
    body.extend_from_slice(&amount.to_le_bytes());
    body
}

/// Unsigned body resizing the caller's sector to `atoms` zeroed atoms.
pub fn resize_sector_input(atoms: u16, k: u8) -> Vec<u8> {
    let atoms = atoms.to_le_bytes();
    vec![
        0x02, atoms[0], atoms[1], // push_short atoms
        0x44, k, //                  resize_sec k
        0xFF, //                     exit
    ]
}

/// Unsigned body proposing a sector update.
pub fn propose_upload_input(args: &UpdateSectorArgs) -> io::Result<Vec<u8>> {
    let mut body = vec![
        0x33, 0x06, 0x00, // data_move 6
        0xE4, //             push_rest
        0x45, //             prop_upload
        0xFF, //             exit
    ];
    body.extend(args.try_to_vec()?);
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::assembler::disassemble;

    #[test]
    fn scripts_disassemble_cleanly() {
        assert_eq!(
            disassemble(&fountain_script()).unwrap(),
            "data_push 8\npush_short 25000\npush_rest\nadd_wallet\nexit\n"
        );
        let text = disassemble(&default_script(&[7; 32])).unwrap();
        assert!(text.starts_with("data_goto 12\ndata_push 32\npush_rest\nverify\ncond_reject\ndata_move 64\ntransfer\n<--data-->\n"));
        assert_eq!(default_script(&[7; 32]).len(), 12 + 32);
    }
}
