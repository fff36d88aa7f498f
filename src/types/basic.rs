/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Constants and "inert" types shared by every layer of the quorum.
//!
//! The types defined here follow the newtype pattern: they are sent around, stored, and inspected,
//! but carry no behavior beyond the arithmetic and formatting defined in this module.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    num::ParseIntError,
    str::FromStr,
    time::Duration,
};

/// Number of siblings in a quorum.
pub const QUORUM_SIZE: usize = 4;

/// Size in bytes of the unit of storage accounting and hashing.
pub const ATOM_SIZE: usize = 32;

/// Maximum number of atoms in one sector segment.
pub const ATOMS_PER_SECTOR: u16 = 1024;

/// Maximum total weight of all wallets in the quorum.
pub const ATOMS_PER_QUORUM: u64 = 16_777_216;

/// Number of blocks held by one block-history file.
pub const SNAPSHOT_LENGTH: u32 = 3;

/// Wall-clock duration of one consensus step.
pub const STEP_DURATION: Duration = Duration::from_millis(1800);

/// Smallest accepted erasure-coding `k`.
pub const MIN_K: u8 = 1;

/// Largest accepted erasure-coding `k`.
pub const MAX_K: u8 = 2;

/// Maximum number of in-flight updates on one sector.
pub const MAX_UPDATES: usize = 8;

/// Furthest deadline, in blocks, that a script input or sector update may declare.
pub const MAX_DEADLINE: u32 = 300;

/// Instruction budget of a single script execution.
pub const MAX_INSTRUCTIONS: i64 = 10_000;

/// Cost budget of a single script execution.
pub const INITIAL_COST_BUDGET: i64 = 10_000;

/// Bytes that the registers and the stack of a script may hold in total.
pub const MAX_MEMORY: usize = 1 << 14;

/// Maximum depth of the script stack.
pub const MAX_STACK_LEN: usize = 1 << 16;

/// Factor by which replicated wallet data is billed.
pub const WALLET_ATOM_MULTIPLIER: u64 = 3;

/// Number of compiles a newly added sibling stays passive.
pub const SIBLING_PASSIVE_WINDOW: u8 = 5;

/// Wallet that seeds new wallets.
pub const FOUNTAIN_WALLET_ID: WalletID = WalletID::new(0);

/// Balance of the fountain wallet at genesis.
pub const FOUNTAIN_BALANCE: u128 = 25_000_000;

/// Balance of the bootstrap sibling's tether wallet at genesis.
pub const BOOTSTRAP_SIBLING_BALANCE: u128 = 1_000_000;

/// What the fountain script gives each wallet it creates.
pub const FOUNTAIN_GRANT: u128 = 25_000;

/// Snapshot generations kept on disk. Older snapshot files are deleted.
pub const SNAPSHOTS_RETAINED: u32 = 2;

/// Identifier of a wallet. Wallets are ordered by id in the wallet tree and in snapshots.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct WalletID(u64);

impl WalletID {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Filesystem-safe rendering of the id.
    pub fn hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl Display for WalletID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for WalletID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// An amount of coin. Arithmetic wraps: callers that must not overdraw a wallet
/// [compare](Balance::compare) first.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Balance(u128);

impl Balance {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }

    pub const fn add(self, rhs: Balance) -> Balance {
        Balance(self.0.wrapping_add(rhs.0))
    }

    pub const fn sub(self, rhs: Balance) -> Balance {
        Balance(self.0.wrapping_sub(rhs.0))
    }

    pub const fn mul(self, rhs: Balance) -> Balance {
        Balance(self.0.wrapping_mul(rhs.0))
    }

    /// Returns -1, 0, or 1 when `self` is less than, equal to, or greater than `other`.
    pub fn compare(&self, other: &Balance) -> i8 {
        match self.0.cmp(&other.0) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        }
    }

    /// Decode a balance from up to 16 little-endian bytes, zero-padding shorter inputs.
    pub fn from_le_slice(bytes: &[u8]) -> Balance {
        Balance(crate::encoding::decode_u128(bytes))
    }

    pub fn to_le_bytes(&self) -> [u8; 16] {
        self.0.to_le_bytes()
    }
}

impl Display for Balance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Debug for Balance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

impl FromStr for Balance {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Balance(u128::from_str(s.trim())?))
    }
}

/// A SHA-256 digest. The all-zero value doubles as the "no hash" placeholder.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// The placeholder stored for siblings that contributed no heartbeat.
    pub const fn zero() -> Self {
        Self([0; 64])
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }

    pub const fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl Default for SignatureBytes {
    fn default() -> Self {
        Self::zero()
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Bytes of an Ed25519 verifying key.
pub type PublicKeyBytes = [u8; 32];

/// Randomness contributed by a sibling or derived for a block.
pub type Entropy = [u8; 32];

/// Network location of a participant.
#[derive(
    Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
