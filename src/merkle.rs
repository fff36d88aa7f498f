/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Merkle trees over the atoms of a segment, and the storage proofs built from them.
//!
//! A tree over `n` atoms is split at the largest power of two strictly below `n`: the left subtree
//! is always perfect and the right subtree holds the remainder. A storage proof for atom `i` is the
//! list of sister subtree roots met on the way from the atom to the root, lowest level first.

use crate::encoding::read_full;
use crate::types::crypto_primitives::{hash, hash_concat};
use crate::types::{CryptoHash, ATOM_SIZE};
use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Seek, SeekFrom};

#[derive(Debug)]
pub enum MerkleError {
    NoAtoms,
    IndexOutOfRange { index: u64, atoms: u64 },
    /// The source ended before the declared number of atoms was read.
    ShortRead,
    Io(io::Error),
}

impl Display for MerkleError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MerkleError::NoAtoms => write!(f, "cannot build a tree over zero atoms"),
            MerkleError::IndexOutOfRange { index, atoms } => {
                write!(f, "atom {} is outside a tree of {} atoms", index, atoms)
            }
            MerkleError::ShortRead => write!(f, "segment ended before its last atom"),
            MerkleError::Io(err) => write!(f, "merkle i/o failed: {}", err),
        }
    }
}

impl From<io::Error> for MerkleError {
    fn from(value: io::Error) -> Self {
        MerkleError::Io(value)
    }
}

/// Proof that a sibling holds one atom of its segment.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StorageProof {
    pub atom_base: [u8; ATOM_SIZE],
    pub hash_stack: Vec<Option<CryptoHash>>,
}

fn split_point(num_atoms: u64) -> u64 {
    num_atoms.next_power_of_two() / 2
}

/// Root of the tree over the next `num_atoms` atoms of `reader`.
pub fn merkle_collapse(reader: &mut impl Read, num_atoms: u64) -> Result<CryptoHash, MerkleError> {
    match num_atoms {
        0 => Err(MerkleError::NoAtoms),
        1 => {
            let mut atom = [0u8; ATOM_SIZE];
            if read_full(reader, &mut atom)? < ATOM_SIZE {
                return Err(MerkleError::ShortRead);
            }
            Ok(hash(&atom))
        }
        n => {
            let mid = split_point(n);
            let left = merkle_collapse(reader, mid)?;
            let right = merkle_collapse(reader, n - mid)?;
            Ok(hash_concat(&[left.as_bytes(), right.as_bytes()]))
        }
    }
}

/// Root of the tree over an in-memory segment. Trailing bytes that do not fill an atom are ignored.
pub fn segment_hash(segment: &[u8]) -> Result<CryptoHash, MerkleError> {
    merkle_collapse(&mut &segment[..], (segment.len() / ATOM_SIZE) as u64)
}

/// Build the proof for atom `proof_index` of a tree over `num_atoms` atoms stored at the start of
/// `reader`.
pub fn build_proof<R: Read + Seek>(
    reader: &mut R,
    num_atoms: u64,
    proof_index: u64,
) -> Result<StorageProof, MerkleError> {
    if num_atoms == 0 {
        return Err(MerkleError::NoAtoms);
    }
    if proof_index >= num_atoms {
        return Err(MerkleError::IndexOutOfRange {
            index: proof_index,
            atoms: num_atoms,
        });
    }

    let mut proof = StorageProof::default();
    reader.seek(SeekFrom::Start(proof_index * ATOM_SIZE as u64))?;
    if read_full(reader, &mut proof.atom_base)? < ATOM_SIZE {
        return Err(MerkleError::ShortRead);
    }

    let mut size = 1;
    while size < num_atoms {
        let sister = if proof_index % (2 * size) < size {
            (proof_index / size + 1) * size
        } else {
            (proof_index / size - 1) * size
        };
        if sister >= num_atoms {
            proof.hash_stack.push(None);
        } else {
            reader.seek(SeekFrom::Start(sister * ATOM_SIZE as u64))?;
            let width = size.min(num_atoms - sister);
            proof.hash_stack.push(Some(merkle_collapse(reader, width)?));
        }
        size *= 2;
    }
    Ok(proof)
}

/// Fold `stack` into a root, starting from the hash of the proven atom.
pub fn fold_hashes(
    base_hash: CryptoHash,
    proof_index: u64,
    stack: &[Option<CryptoHash>],
) -> CryptoHash {
    let mut node = base_hash;
    let mut size = 1u64;
    for sister in stack {
        if let Some(sister) = sister {
            node = if proof_index % (2 * size) < size {
                hash_concat(&[node.as_bytes(), sister.as_bytes()])
            } else {
                hash_concat(&[sister.as_bytes(), node.as_bytes()])
            };
        }
        size *= 2;
    }
    node
}

pub fn verify_proof(root: &CryptoHash, proof_index: u64, proof: &StorageProof) -> bool {
    fold_hashes(hash(&proof.atom_base), proof_index, &proof.hash_stack) == *root
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn atoms(n: usize) -> Vec<u8> {
        (0..n * ATOM_SIZE).map(|i| (i / ATOM_SIZE) as u8 ^ (i as u8)).collect()
    }

    #[test]
    fn small_trees() {
        let data = atoms(3);
        let h = |i: usize| hash(&data[i * ATOM_SIZE..(i + 1) * ATOM_SIZE]);

        assert_eq!(merkle_collapse(&mut &data[..], 1).unwrap(), h(0));
        let two = hash_concat(&[h(0).as_bytes(), h(1).as_bytes()]);
        assert_eq!(merkle_collapse(&mut &data[..], 2).unwrap(), two);
        let three = hash_concat(&[two.as_bytes(), h(2).as_bytes()]);
        assert_eq!(segment_hash(&data).unwrap(), three);
    }

    #[test]
    fn five_atoms_split_four_and_one() {
        let data = atoms(5);
        let h = |i: usize| hash(&data[i * ATOM_SIZE..(i + 1) * ATOM_SIZE]);

        let left = merkle_collapse(&mut &data[..4 * ATOM_SIZE], 4).unwrap();
        let root = hash_concat(&[left.as_bytes(), h(4).as_bytes()]);
        assert_eq!(segment_hash(&data).unwrap(), root);
        assert_eq!(split_point(5), 4);
        assert_eq!(split_point(4), 2);
        assert_eq!(split_point(3), 2);
    }

    #[test]
    fn every_proof_folds_to_the_root() {
        for n in [1u64, 2, 3, 5, 8, 13, 32, 33] {
            let data = atoms(n as usize);
            let root = segment_hash(&data).unwrap();
            for i in 0..n {
                let proof = build_proof(&mut Cursor::new(&data), n, i).unwrap();
                let atom = &data[i as usize * ATOM_SIZE..(i as usize + 1) * ATOM_SIZE];
                assert_eq!(&proof.atom_base[..], atom);
                assert_eq!(fold_hashes(hash(atom), i, &proof.hash_stack), root);
                assert!(verify_proof(&root, i, &proof));
            }
        }
    }

    #[test]
    fn tampered_proof_fails() {
        let data = atoms(6);
        let root = segment_hash(&data).unwrap();
        let mut proof = build_proof(&mut Cursor::new(&data), 6, 4).unwrap();
        proof.atom_base[0] ^= 1;
        assert!(!verify_proof(&root, 4, &proof));
    }

    #[test]
    fn errors() {
        let data = atoms(2);
        assert!(matches!(
            merkle_collapse(&mut &data[..], 0),
            Err(MerkleError::NoAtoms)
        ));
        assert!(matches!(
            merkle_collapse(&mut &data[..], 3),
            Err(MerkleError::ShortRead)
        ));
        assert!(matches!(
            build_proof(&mut Cursor::new(&data), 2, 2),
            Err(MerkleError::IndexOutOfRange { .. })
        ));
    }
}
