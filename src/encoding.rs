/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Little-endian value codecs and length-prefixed record framing.
//!
//! Values pushed on the interpreter stack are arbitrary byte strings. The decoders in this module
//! interpret such a string as a fixed-width little-endian number, zero-padding short inputs and
//! ignoring bytes past the width.
//!
//! Records are serialized with [`borsh`]. When persisted, each record is framed as
//! `u32 LE length || borsh bytes` so that files can hold sequences of records.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};
use std::io::{self, Read, Write};

fn padded<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut buf = [0u8; N];
    let len = bytes.len().min(N);
    buf[..len].copy_from_slice(&bytes[..len]);
    buf
}

pub fn decode_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes(padded(bytes))
}

pub fn decode_i16(bytes: &[u8]) -> i16 {
    i16::from_le_bytes(padded(bytes))
}

pub fn decode_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(padded(bytes))
}

pub fn decode_u64(bytes: &[u8]) -> u64 {
    u64::from_le_bytes(padded(bytes))
}

pub fn decode_i64(bytes: &[u8]) -> i64 {
    i64::from_le_bytes(padded(bytes))
}

pub fn decode_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes(padded(bytes))
}

pub fn decode_f64(bytes: &[u8]) -> f64 {
    f64::from_le_bytes(padded(bytes))
}

pub fn decode_u128(bytes: &[u8]) -> u128 {
    u128::from_le_bytes(padded(bytes))
}

#[derive(Debug)]
pub enum EncodingError {
    Io(io::Error),
    /// A frame declared more bytes than remained in its source.
    Truncated { declared: usize, available: usize },
}

impl Display for EncodingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EncodingError::Io(err) => write!(f, "record i/o failed: {}", err),
            EncodingError::Truncated {
                declared,
                available,
            } => write!(
                f,
                "record declares {} bytes but only {} are available",
                declared, available
            ),
        }
    }
}

impl From<io::Error> for EncodingError {
    fn from(value: io::Error) -> Self {
        EncodingError::Io(value)
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before the reader ran dry.
/// Unlike [`Read::read_exact`], hitting the end of the stream part way is not an error.
pub fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Serialize `record` and frame it with its length.
pub fn to_prefixed_bytes<T: BorshSerialize>(record: &T) -> Result<Vec<u8>, EncodingError> {
    let body = record.try_to_vec()?;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Write `record` to `writer` as one length-prefixed frame, returning the number of bytes written.
pub fn write_prefixed<T: BorshSerialize>(
    writer: &mut impl Write,
    record: &T,
) -> Result<usize, EncodingError> {
    let framed = to_prefixed_bytes(record)?;
    writer.write_all(&framed)?;
    Ok(framed.len())
}

/// Read the body of one length-prefixed frame.
pub fn read_prefixed_raw(reader: &mut impl Read) -> Result<Vec<u8>, EncodingError> {
    let mut len_bytes = [0u8; 4];
    let got = read_full(reader, &mut len_bytes)?;
    if got < 4 {
        return Err(EncodingError::Truncated {
            declared: 4,
            available: got,
        });
    }
    let declared = u32::from_le_bytes(len_bytes) as usize;
    let mut body = vec![0u8; declared];
    let available = read_full(reader, &mut body)?;
    if available < declared {
        return Err(EncodingError::Truncated {
            declared,
            available,
        });
    }
    Ok(body)
}

/// Read one length-prefixed frame and deserialize its body.
pub fn read_prefixed<T: BorshDeserialize>(reader: &mut impl Read) -> Result<T, EncodingError> {
    let body = read_prefixed_raw(reader)?;
    Ok(T::try_from_slice(&body)?)
}

/// Deserialize a record from an in-memory frame.
pub fn from_prefixed_bytes<T: BorshDeserialize>(mut bytes: &[u8]) -> Result<T, EncodingError> {
    read_prefixed(&mut bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoders_pad_and_truncate() {
        assert_eq!(decode_u16(&[0x0A]), 10);
        assert_eq!(decode_i64(&[0xFF; 8]), -1);
        assert_eq!(decode_i64(&[0xFF; 4]), 0xFFFF_FFFF);
        assert_eq!(decode_u32(&[1, 0, 0, 0, 9, 9]), 1);
        assert_eq!(decode_f64(&2.5f64.to_le_bytes()), 2.5);
        assert_eq!(decode_i16(&[0xFF, 0x7F]), i16::MAX);
    }

    #[test]
    fn prefixed_frames_are_sequential() {
        let mut file = Vec::new();
        write_prefixed(&mut file, &(7u32, String::from("seven"))).unwrap();
        write_prefixed(&mut file, &vec![1u8, 2, 3]).unwrap();

        let mut reader = file.as_slice();
        let first: (u32, String) = read_prefixed(&mut reader).unwrap();
        let second: Vec<u8> = read_prefixed(&mut reader).unwrap();
        assert_eq!(first, (7, String::from("seven")));
        assert_eq!(second, vec![1, 2, 3]);
        assert!(reader.is_empty());
    }

    #[test]
    fn overlong_frame_is_truncated() {
        let mut framed = to_prefixed_bytes(&vec![5u8; 10]).unwrap();
        framed.truncate(framed.len() - 3);
        match from_prefixed_bytes::<Vec<u8>>(&framed) {
            Err(EncodingError::Truncated {
                declared,
                available,
            }) => {
                assert_eq!(declared, 14);
                assert_eq!(available, 11);
            }
            other => panic!("expected a truncated frame, got {:?}", other),
        }
    }
}
