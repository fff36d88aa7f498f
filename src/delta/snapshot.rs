/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Snapshots of the quorum state, taken each time the block history rolls.
//!
//! A snapshot file `{prefix}snapshot.{height}` holds the state as it was before block `height`
//! compiled:
//!
//! |Bytes|Contents|
//! |---|---|
//! |24|Offset table: six `u32`s giving the offset and length of each of the sections below.|
//! |var|The [`Metadata`].|
//! |16 per wallet|Wallet table: `(id: u64, offset: u32, length: u32)`, sorted by id.|
//! |var|The wallets, at the offsets given in the wallet table.|
//! |var|The pending [events](crate::state::Event).|
//!
//! Joining participants download the metadata and the wallets of a peer's most recent snapshot,
//! then replay the blocks compiled since.

use super::{DeltaError, Engine};
use crate::state::{Event, Metadata, Wallet};
use crate::types::{WalletID, SNAPSHOTS_RETAINED, SNAPSHOT_LENGTH};
use borsh::{BorshDeserialize, BorshSerialize};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};

const HEADER_LEN: usize = 24;
const WALLET_ENTRY_LEN: usize = 16;

enum Section {
    Metadata = 0,
    WalletTable = 1,
    Events = 2,
}

impl Engine {
    pub(crate) fn snapshot_filename(&self, height: u32) -> String {
        format!("{}snapshot.{}", self.file_prefix(), height)
    }

    /// Write a snapshot of the current state and delete the one that fell out of retention.
    pub(crate) fn save_snapshot(&mut self) -> Result<(), DeltaError> {
        let height = self.height();
        self.state.metadata.recent_snapshot = height;

        let metadata = self.state.metadata.try_to_vec()?;
        let mut ids = self.state.wallet_list();
        ids.sort();
        let wallets_offset = HEADER_LEN + metadata.len() + WALLET_ENTRY_LEN * ids.len();
        let mut wallet_table = Vec::with_capacity(WALLET_ENTRY_LEN * ids.len());
        let mut wallets = Vec::new();
        for id in ids {
            let wallet = self.state.load_wallet(id)?.try_to_vec()?;
            wallet_table.extend_from_slice(&id.to_le_bytes());
            wallet_table.extend_from_slice(&((wallets_offset + wallets.len()) as u32).to_le_bytes());
            wallet_table.extend_from_slice(&(wallet.len() as u32).to_le_bytes());
            wallets.extend_from_slice(&wallet);
        }
        let events = self.state.event_list.iter().cloned().collect::<Vec<Event>>().try_to_vec()?;

        let sections = [
            (HEADER_LEN, metadata.len()),
            (HEADER_LEN + metadata.len(), wallet_table.len()),
            (wallets_offset + wallets.len(), events.len()),
        ];
        let mut file = Vec::with_capacity(sections[2].0 + events.len());
        for (offset, len) in sections {
            file.extend_from_slice(&(offset as u32).to_le_bytes());
            file.extend_from_slice(&(len as u32).to_le_bytes());
        }
        file.extend_from_slice(&metadata);
        file.extend_from_slice(&wallet_table);
        file.extend_from_slice(&wallets);
        file.extend_from_slice(&events);
        fs::write(self.snapshot_filename(height), file)?;

        if let Some(expired) = height.checked_sub(SNAPSHOTS_RETAINED * SNAPSHOT_LENGTH) {
            let _ = fs::remove_file(self.snapshot_filename(expired));
        }
        log::debug!("saved snapshot {}", height);
        Ok(())
    }

    pub fn recent_snapshot(&self) -> u32 {
        self.state.metadata.recent_snapshot
    }

    pub fn load_snapshot_metadata(&self, height: u32) -> Result<Metadata, DeltaError> {
        let bytes = self.read_section(height, Section::Metadata)?;
        Metadata::try_from_slice(&bytes).map_err(|_| DeltaError::CorruptSnapshot("metadata"))
    }

    pub fn load_snapshot_wallet_list(&self, height: u32) -> Result<Vec<WalletID>, DeltaError> {
        Ok(self
            .load_wallet_table(height)?
            .into_iter()
            .map(|(id, _, _)| id)
            .collect())
    }

    pub fn load_snapshot_wallet(&self, height: u32, id: WalletID) -> Result<Wallet, DeltaError> {
        let table = self.load_wallet_table(height)?;
        let position = table
            .binary_search_by_key(&id, |(id, _, _)| *id)
            .map_err(|_| DeltaError::WalletNotInSnapshot {
                height,
                wallet_id: id,
            })?;
        let (_, offset, len) = table[position];
        let bytes = self.read_range(height, offset, len)?;
        Wallet::try_from_slice(&bytes).map_err(|_| DeltaError::CorruptSnapshot("wallet"))
    }

    pub fn load_snapshot_events(&self, height: u32) -> Result<Vec<Event>, DeltaError> {
        let bytes = self.read_section(height, Section::Events)?;
        Vec::<Event>::try_from_slice(&bytes).map_err(|_| DeltaError::CorruptSnapshot("events"))
    }

    fn load_wallet_table(&self, height: u32) -> Result<Vec<(WalletID, u32, u32)>, DeltaError> {
        let bytes = self.read_section(height, Section::WalletTable)?;
        if bytes.len() % WALLET_ENTRY_LEN != 0 {
            return Err(DeltaError::CorruptSnapshot("wallet table"));
        }
        Ok(bytes
            .chunks_exact(WALLET_ENTRY_LEN)
            .map(|entry| {
                let mut id = [0u8; 8];
                let mut offset = [0u8; 4];
                let mut len = [0u8; 4];
                id.copy_from_slice(&entry[0..8]);
                offset.copy_from_slice(&entry[8..12]);
                len.copy_from_slice(&entry[12..16]);
                (
                    WalletID::new(u64::from_le_bytes(id)),
                    u32::from_le_bytes(offset),
                    u32::from_le_bytes(len),
                )
            })
            .collect())
    }

    fn read_section(&self, height: u32, section: Section) -> Result<Vec<u8>, DeltaError> {
        let mut file = self.open_snapshot(height)?;
        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header)
            .map_err(|_| DeltaError::CorruptSnapshot("offset table"))?;
        let index = section as usize * 8;
        let mut offset = [0u8; 4];
        let mut len = [0u8; 4];
        offset.copy_from_slice(&header[index..index + 4]);
        len.copy_from_slice(&header[index + 4..index + 8]);
        read_at(&mut file, u32::from_le_bytes(offset), u32::from_le_bytes(len))
    }

    fn read_range(&self, height: u32, offset: u32, len: u32) -> Result<Vec<u8>, DeltaError> {
        let mut file = self.open_snapshot(height)?;
        read_at(&mut file, offset, len)
    }

    fn open_snapshot(&self, height: u32) -> Result<File, DeltaError> {
        File::open(self.snapshot_filename(height)).map_err(|_| DeltaError::SnapshotNotFound(height))
    }
}

fn read_at(file: &mut File, offset: u32, len: u32) -> Result<Vec<u8>, DeltaError> {
    file.seek(SeekFrom::Start(offset as u64))?;
    let mut bytes = vec![0u8; len as usize];
    file.read_exact(&mut bytes)
        .map_err(|_| DeltaError::CorruptSnapshot("section out of bounds"))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_utilities::{prefix, temp_dir};
    use crate::state::{EventKind, KnownScript};
    use crate::types::{Balance, CryptoHash};

    #[test]
    fn snapshot_holds_pre_roll_state() {
        let dir = temp_dir("snapshot");
        let mut engine = Engine::new(&prefix(&dir));

        // 1. Three wallets, one of which remembers a script input.
        for id in [9u64, 2, 5] {
            engine
                .state
                .insert_wallet(Wallet::new(WalletID::new(id), Balance::new(id as u128 * 10), vec![id as u8]), true)
                .unwrap();
        }
        let mut five = engine.state.load_wallet(WalletID::new(5)).unwrap();
        engine.state.learn_script(&mut five, CryptoHash::new([7; 32]), 4);
        engine.state.save_wallet(&five).unwrap();
        engine.state.metadata.height = 6;

        // 2. Snapshot at height 6.
        engine.save_snapshot().unwrap();
        assert_eq!(engine.recent_snapshot(), 6);

        // 3. Everything reads back from the file.
        let metadata = engine.load_snapshot_metadata(6).unwrap();
        assert_eq!(metadata.height, 6);
        assert_eq!(metadata.recent_snapshot, 6);
        assert_eq!(
            engine.load_snapshot_wallet_list(6).unwrap(),
            vec![WalletID::new(2), WalletID::new(5), WalletID::new(9)]
        );
        let loaded = engine.load_snapshot_wallet(6, WalletID::new(5)).unwrap();
        assert_eq!(loaded, five);
        assert_eq!(
            loaded.known_scripts.get(&CryptoHash::new([7; 32])),
            Some(&KnownScript { deadline: 4, counter: 1 })
        );
        let events = engine.load_snapshot_events(6).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].kind, EventKind::ScriptInputExpiry { .. }));

        // 4. Missing wallets and snapshots are reported.
        assert!(matches!(
            engine.load_snapshot_wallet(6, WalletID::new(3)),
            Err(DeltaError::WalletNotInSnapshot { .. })
        ));
        assert!(matches!(
            engine.load_snapshot_metadata(3),
            Err(DeltaError::SnapshotNotFound(3))
        ));
    }

    #[test]
    fn old_snapshots_are_deleted() {
        let dir = temp_dir("snapshot_retention");
        let mut engine = Engine::new(&prefix(&dir));
        for height in [0, 3, 6, 9] {
            engine.state.metadata.height = height;
            engine.save_snapshot().unwrap();
        }
        assert!(engine.load_snapshot_metadata(0).is_err());
        assert!(engine.load_snapshot_metadata(3).is_err());
        assert!(engine.load_snapshot_metadata(6).is_ok());
        assert!(engine.load_snapshot_metadata(9).is_ok());
    }
}
