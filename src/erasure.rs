/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Reed-Solomon erasure coding of sector data across the siblings of a quorum.
//!
//! Data is cut into stripes of `k` atoms. Each stripe is extended with `QUORUM_SIZE - k` parity
//! atoms over GF(2^8), and atom `i` of every stripe is appended to segment `i`. Any `k` of the
//! `QUORUM_SIZE` segments suffice to reproduce the data.

use crate::encoding::read_full;
use crate::types::{ATOMS_PER_SECTOR, ATOM_SIZE, QUORUM_SIZE};
use reed_solomon_erasure::galois_8::ReedSolomon;
use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Write};

#[derive(Debug)]
pub enum ErasureError {
    InvalidK(u8),
    EmptyInput,
    TooManyAtoms,
    SegmentCountMismatch { segments: usize, indices: usize, k: u8 },
    InvalidIndex(u8),
    DuplicateIndex(u8),
    /// A segment ended in the middle of a stripe.
    ShortSegment,
    Codec(reed_solomon_erasure::Error),
    Io(io::Error),
}

impl Display for ErasureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErasureError::InvalidK(k) => write!(f, "k must be in 1..{}, got {}", QUORUM_SIZE, k),
            ErasureError::EmptyInput => write!(f, "no data to encode"),
            ErasureError::TooManyAtoms => {
                write!(f, "input exceeds {} atoms per segment", ATOMS_PER_SECTOR)
            }
            ErasureError::SegmentCountMismatch {
                segments,
                indices,
                k,
            } => write!(
                f,
                "recovery needs exactly {} segments, got {} segments and {} indices",
                k, segments, indices
            ),
            ErasureError::InvalidIndex(i) => write!(f, "segment index {} out of range", i),
            ErasureError::DuplicateIndex(i) => write!(f, "segment index {} given twice", i),
            ErasureError::ShortSegment => write!(f, "segment ended mid-stripe"),
            ErasureError::Codec(err) => write!(f, "reed-solomon failure: {}", err),
            ErasureError::Io(err) => write!(f, "erasure i/o failed: {}", err),
        }
    }
}

impl From<io::Error> for ErasureError {
    fn from(value: io::Error) -> Self {
        ErasureError::Io(value)
    }
}

impl From<reed_solomon_erasure::Error> for ErasureError {
    fn from(value: reed_solomon_erasure::Error) -> Self {
        ErasureError::Codec(value)
    }
}

fn codec(k: u8) -> Result<ReedSolomon, ErasureError> {
    if k < 1 || k as usize >= QUORUM_SIZE {
        return Err(ErasureError::InvalidK(k));
    }
    Ok(ReedSolomon::new(k as usize, QUORUM_SIZE - k as usize)?)
}

/// Encode everything `input` yields into the `QUORUM_SIZE` segments, returning the number of atoms
/// appended to each segment.
pub fn rs_encode(
    input: &mut impl Read,
    segments: &mut [Vec<u8>; QUORUM_SIZE],
    k: u8,
) -> Result<u16, ErasureError> {
    let rs = codec(k)?;
    let k = k as usize;
    let mut stripe = vec![0u8; k * ATOM_SIZE];
    let mut atoms: u16 = 0;

    loop {
        stripe.iter_mut().for_each(|b| *b = 0);
        if read_full(input, &mut stripe)? == 0 {
            break;
        }
        if atoms >= ATOMS_PER_SECTOR {
            return Err(ErasureError::TooManyAtoms);
        }

        let mut shards: Vec<Vec<u8>> = stripe.chunks(ATOM_SIZE).map(|c| c.to_vec()).collect();
        shards.resize(QUORUM_SIZE, vec![0u8; ATOM_SIZE]);
        rs.encode(&mut shards)?;

        for (segment, shard) in segments.iter_mut().zip(shards) {
            segment.extend_from_slice(&shard);
        }
        atoms += 1;
    }

    if atoms == 0 {
        return Err(ErasureError::EmptyInput);
    }
    Ok(atoms)
}

/// Rebuild the original data from `k` segments, where `segments[j]` is the segment held at
/// position `indices[j]`. Returns the number of bytes written to `output`.
pub fn rs_recover<R: Read>(
    segments: &mut [R],
    indices: &[u8],
    output: &mut impl Write,
    k: u8,
) -> Result<usize, ErasureError> {
    let rs = codec(k)?;
    if segments.len() != k as usize || indices.len() != k as usize {
        return Err(ErasureError::SegmentCountMismatch {
            segments: segments.len(),
            indices: indices.len(),
            k,
        });
    }
    let mut seen = [false; QUORUM_SIZE];
    for &i in indices {
        if i as usize >= QUORUM_SIZE {
            return Err(ErasureError::InvalidIndex(i));
        }
        if seen[i as usize] {
            return Err(ErasureError::DuplicateIndex(i));
        }
        seen[i as usize] = true;
    }

    let mut written = 0;
    loop {
        let mut shards: Vec<Option<Vec<u8>>> = vec![None; QUORUM_SIZE];
        let mut exhausted = 0;
        for (segment, &i) in segments.iter_mut().zip(indices) {
            let mut atom = vec![0u8; ATOM_SIZE];
            match read_full(segment, &mut atom)? {
                0 => exhausted += 1,
                n if n == ATOM_SIZE => shards[i as usize] = Some(atom),
                _ => return Err(ErasureError::ShortSegment),
            }
        }
        if exhausted == segments.len() {
            break;
        }
        if exhausted > 0 {
            return Err(ErasureError::ShortSegment);
        }

        rs.reconstruct_data(&mut shards)?;
        for shard in shards.iter().take(k as usize) {
            let shard = shard.as_ref().ok_or(ErasureError::ShortSegment)?;
            output.write_all(shard)?;
            written += shard.len();
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn recover_from_every_subset() {
        for k in 1..QUORUM_SIZE as u8 {
            let data = sample(1000);
            let mut segments: [Vec<u8>; QUORUM_SIZE] = Default::default();
            let atoms = rs_encode(&mut data.as_slice(), &mut segments, k).unwrap();
            let stripe = k as usize * ATOM_SIZE;
            assert_eq!(atoms as usize, (data.len() + stripe - 1) / stripe);

            let mut expected = data.clone();
            expected.resize(atoms as usize * stripe, 0);

            // every choice of k distinct segments, in both orders when k == 2
            let choices: Vec<Vec<u8>> = match k {
                1 => (0..4).map(|i| vec![i]).collect(),
                2 => (0..4u8)
                    .flat_map(|a| (0..4u8).filter(move |b| *b != a).map(move |b| vec![a, b]))
                    .collect(),
                _ => vec![vec![0, 1, 2], vec![3, 1, 0], vec![1, 2, 3], vec![2, 3, 0]],
            };
            for indices in choices {
                let mut readers: Vec<&[u8]> =
                    indices.iter().map(|&i| segments[i as usize].as_slice()).collect();
                let mut out = Vec::new();
                let written = rs_recover(&mut readers, &indices, &mut out, k).unwrap();
                assert_eq!(written, expected.len());
                assert_eq!(out, expected);
            }
        }
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut segments: [Vec<u8>; QUORUM_SIZE] = Default::default();
        assert!(matches!(
            rs_encode(&mut [1u8; 10].as_slice(), &mut segments, 0),
            Err(ErasureError::InvalidK(0))
        ));
        assert!(matches!(
            rs_encode(&mut [1u8; 10].as_slice(), &mut segments, 4),
            Err(ErasureError::InvalidK(4))
        ));
        assert!(matches!(
            rs_encode(&mut [0u8; 0].as_slice(), &mut segments, 2),
            Err(ErasureError::EmptyInput)
        ));

        let mut readers: Vec<&[u8]> = vec![&[0u8; 32], &[0u8; 32]];
        let mut out = Vec::new();
        assert!(matches!(
            rs_recover(&mut readers, &[1, 1], &mut out, 2),
            Err(ErasureError::DuplicateIndex(1))
        ));
        assert!(matches!(
            rs_recover(&mut readers, &[1, 4], &mut out, 2),
            Err(ErasureError::InvalidIndex(4))
        ));
    }

    #[test]
    fn short_segment_is_an_error() {
        let mut segments: [Vec<u8>; QUORUM_SIZE] = Default::default();
        rs_encode(&mut sample(200).as_slice(), &mut segments, 2).unwrap();
        segments[1].truncate(segments[1].len() - 5);
        let mut readers: Vec<&[u8]> = vec![segments[0].as_slice(), segments[1].as_slice()];
        let mut out = Vec::new();
        assert!(matches!(
            rs_recover(&mut readers, &[0, 1], &mut out, 2),
            Err(ErasureError::ShortSegment)
        ));
    }

    #[test]
    fn oversized_input_is_rejected() {
        let mut segments: [Vec<u8>; QUORUM_SIZE] = Default::default();
        let data = vec![1u8; ATOMS_PER_SECTOR as usize * ATOM_SIZE + 1];
        assert!(matches!(
            rs_encode(&mut data.as_slice(), &mut segments, 1),
            Err(ErasureError::TooManyAtoms)
        ));
    }
}
