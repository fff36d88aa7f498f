/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! On-disk history of compiled blocks.
//!
//! Blocks are stored in files of [`SNAPSHOT_LENGTH`] blocks each, named after the height of their
//! first block. A file starts with `SNAPSHOT_LENGTH` little-endian `u32` offsets, one per block,
//! followed by the blocks as length-prefixed records. Only two files are kept: the active one that
//! new blocks are appended to, and the most recent complete one. Each file starts at the height of
//! a [snapshot](super::snapshot), so a peer can always rebuild the state from the recent snapshot
//! and the blocks that follow it.

use super::{Block, DeltaError, Engine};
use crate::encoding::{read_prefixed, to_prefixed_bytes};
use crate::types::SNAPSHOT_LENGTH;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

const OFFSET_TABLE_LEN: u32 = 4 * SNAPSHOT_LENGTH;

impl Engine {
    pub(crate) fn history_filename(&self, head: u32) -> String {
        format!("{}blockHistory.{}", self.file_prefix(), head)
    }

    /// Start a new history file at the current height, and snapshot the state, if the active
    /// file is full or there is none yet. Returns whether the history rolled.
    pub(crate) fn roll_history_if_full(&mut self) -> Result<bool, DeltaError> {
        if self.active_history_head.is_some() && self.active_history_length < SNAPSHOT_LENGTH {
            return Ok(false);
        }

        if let Some(old_head) = self.active_history_head {
            if let Some(recent_head) = self.recent_history_head {
                let _ = fs::remove_file(self.history_filename(recent_head));
            }
            self.recent_history_head = Some(old_head);
        }

        let head = self.height();
        let mut header = vec![0u8; OFFSET_TABLE_LEN as usize];
        header[0..4].copy_from_slice(&OFFSET_TABLE_LEN.to_le_bytes());
        fs::write(self.history_filename(head), header)?;
        self.active_history_head = Some(head);
        self.active_history_length = 0;

        self.save_snapshot()?;
        Ok(true)
    }

    pub(crate) fn append_block(&mut self, block: &Block) -> Result<(), DeltaError> {
        let head = self.active_history_head.ok_or(DeltaError::BlockNotFound(block.height))?;
        let index = self.active_history_length;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.history_filename(head))?;

        let offset = read_offset(&mut file, index)?;
        let framed = to_prefixed_bytes(block)?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&framed)?;

        if index + 1 < SNAPSHOT_LENGTH {
            file.seek(SeekFrom::Start(4 * (index as u64 + 1)))?;
            file.write_all(&(offset + framed.len() as u32).to_le_bytes())?;
        }
        file.flush()?;
        self.active_history_length += 1;
        Ok(())
    }

    /// The block compiled at `height`, if it is in the active or the recent history.
    pub fn load_block(&self, height: u32) -> Result<Block, DeltaError> {
        let files = [
            (self.active_history_head, self.active_history_length),
            (self.recent_history_head, SNAPSHOT_LENGTH),
        ];
        for (head, length) in files {
            let Some(head) = head else { continue };
            if height < head || height - head >= length {
                continue;
            }
            let mut file = File::open(self.history_filename(head))?;
            let offset = read_offset(&mut file, height - head)?;
            file.seek(SeekFrom::Start(offset as u64))?;
            return Ok(read_prefixed(&mut BufReader::new(file))?);
        }
        Err(DeltaError::BlockNotFound(height))
    }

    /// First height of the active history file.
    pub fn active_history_head(&self) -> Option<u32> {
        self.active_history_head
    }
}

fn read_offset(file: &mut File, index: u32) -> Result<u32, DeltaError> {
    file.seek(SeekFrom::Start(4 * index as u64))?;
    let mut bytes = [0u8; 4];
    file.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}
