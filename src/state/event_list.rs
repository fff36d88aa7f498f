/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Time-ordered queue of pending events, kept as a skip list.
//!
//! Events are keyed by `(expiration << 32) | counter`. Counters are handed out from
//! [`Metadata::event_counter`](super::Metadata::event_counter) and never repeat, so the order is
//! total and events that expire at the same height fire in the order they were scheduled.

use crate::types::{CryptoHash, WalletID};
use borsh::{BorshDeserialize, BorshSerialize};
use rand_core::{OsRng, RngCore};

/// Something that must happen once the chain reaches `expiration`.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Event {
    pub expiration: u32,
    pub counter: u32,
    pub kind: EventKind,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum EventKind {
    /// The deadline of a script input passed: its hash may be forgotten.
    ScriptInputExpiry { wallet_id: WalletID, hash: CryptoHash },
    /// The deadline of a sector update passed: commit or drop it. The update is the one whose
    /// event counter equals this event's counter.
    SectorUpdateExpiry { wallet_id: WalletID },
}

impl Event {
    pub fn key(&self) -> u64 {
        event_key(self.expiration, self.counter)
    }

    pub fn wallet_id(&self) -> WalletID {
        match &self.kind {
            EventKind::ScriptInputExpiry { wallet_id, .. } => *wallet_id,
            EventKind::SectorUpdateExpiry { wallet_id } => *wallet_id,
        }
    }
}

pub fn event_key(expiration: u32, counter: u32) -> u64 {
    ((expiration as u64) << 32) | counter as u64
}

const HEAD: usize = 0;

#[derive(Clone, Debug)]
struct SkipNode {
    event: Option<Event>,
    next: Vec<Option<u32>>,
}

#[derive(Clone, Debug)]
pub struct EventList {
    nodes: Vec<SkipNode>,
    free: Vec<u32>,
    len: usize,
}

impl Default for EventList {
    fn default() -> Self {
        Self::new()
    }
}

impl EventList {
    pub fn new() -> EventList {
        EventList {
            nodes: vec![SkipNode {
                event: None,
                next: vec![None],
            }],
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn key_at(&self, n: u32) -> u64 {
        self.nodes[n as usize].event.as_ref().map_or(0, Event::key)
    }

    fn top_height(&self) -> usize {
        self.nodes[HEAD].next.len()
    }

    // Each extra level is taken with probability 32/87.
    fn random_height(&self) -> usize {
        let mut csprg = OsRng {};
        let mut height = 1;
        while height <= self.top_height() && csprg.next_u32() % 87 < 32 {
            height += 1;
        }
        height
    }

    /// For every level, the last node whose key is below `key`.
    fn predecessors(&self, key: u64) -> Vec<usize> {
        let mut update = vec![HEAD; self.top_height()];
        let mut cursor = HEAD;
        for level in (0..self.top_height()).rev() {
            while let Some(next) = self.nodes[cursor].next[level] {
                if self.key_at(next) < key {
                    cursor = next as usize;
                } else {
                    break;
                }
            }
            update[level] = cursor;
        }
        update
    }

    /// Schedule `event`. Returns `false` when an event with the same key is already queued.
    pub fn insert(&mut self, event: Event) -> bool {
        let key = event.key();
        let mut update = self.predecessors(key);
        if let Some(next) = self.nodes[update[0]].next[0] {
            if self.key_at(next) == key {
                return false;
            }
        }

        let height = self.random_height();
        while self.top_height() < height {
            self.nodes[HEAD].next.push(None);
            update.push(HEAD);
        }

        let node = SkipNode {
            event: Some(event),
            next: (0..height).map(|level| self.nodes[update[level]].next[level]).collect(),
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot as usize] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                (self.nodes.len() - 1) as u32
            }
        };
        for (level, pred) in update.iter().enumerate().take(height) {
            self.nodes[*pred].next[level] = Some(slot);
        }
        self.len += 1;
        true
    }

    pub fn remove(&mut self, key: u64) -> Option<Event> {
        let update = self.predecessors(key);
        let target = self.nodes[update[0]].next[0]?;
        if self.key_at(target) != key {
            return None;
        }

        for (level, pred) in update.iter().enumerate() {
            if self.nodes[*pred].next[level] == Some(target) {
                self.nodes[*pred].next[level] = self.nodes[target as usize].next[level];
            }
        }
        while self.top_height() > 1 && self.nodes[HEAD].next[self.top_height() - 1].is_none() {
            self.nodes[HEAD].next.pop();
        }

        let removed = self.nodes[target as usize].event.take();
        self.nodes[target as usize].next.clear();
        self.free.push(target);
        self.len -= 1;
        removed
    }

    pub fn peek_first(&self) -> Option<&Event> {
        let first = self.nodes[HEAD].next[0]?;
        self.nodes[first as usize].event.as_ref()
    }

    /// Remove and return the earliest event if it expires at or before `height`.
    pub fn pop_first_expired(&mut self, height: u32) -> Option<Event> {
        let key = match self.peek_first() {
            Some(event) if event.expiration <= height => event.key(),
            _ => return None,
        };
        self.remove(key)
    }

    pub fn pop_expired(&mut self, height: u32) -> Vec<Event> {
        let mut expired = Vec::new();
        while let Some(event) = self.pop_first_expired(height) {
            expired.push(event);
        }
        expired
    }

    /// Remove every event that refers to `wallet_id`.
    pub fn remove_wallet(&mut self, wallet_id: WalletID) -> Vec<Event> {
        let keys: Vec<u64> = self
            .iter()
            .filter(|event| event.wallet_id() == wallet_id)
            .map(Event::key)
            .collect();
        keys.into_iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Events in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        let mut cursor = self.nodes[HEAD].next[0];
        std::iter::from_fn(move || {
            let n = cursor?;
            cursor = self.nodes[n as usize].next[0];
            self.nodes[n as usize].event.as_ref()
        })
    }
}
