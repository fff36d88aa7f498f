/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of quorum events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are
//! published by the engine and the participant's threads onto a channel drained by the
//! [event bus](crate::event_bus), which runs registered handlers.

use crate::types::{CryptoHash, WalletID};
use std::sync::mpsc::Sender;
use std::time::SystemTime;

pub enum Event {
    // Events that change the quorum's state.
    CompileBlock(CompileBlockEvent),
    TossSibling(TossSiblingEvent),
    ExecuteScript(ExecuteScriptEvent),
    CommitSectorUpdate(CommitSectorUpdateEvent),
    DropSectorUpdate(DropSectorUpdateEvent),
    // Consensus events.
    NewSignedUpdate(NewSignedUpdateEvent),
    ReceiveSignedUpdate(ReceiveSignedUpdateEvent),
    RejectSignedUpdate(RejectSignedUpdateEvent),
    // Repair events.
    StartRepair(StartRepairEvent),
    EndRepair(EndRepairEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The bus only goes away during shutdown.
            let _ = event_publisher.send(event);
        }
    }
}

pub struct CompileBlockEvent {
    pub timestamp: SystemTime,
    /// Height of the compiled block.
    pub height: u32,
    pub block: CryptoHash,
}

pub struct TossSiblingEvent {
    pub timestamp: SystemTime,
    pub height: u32,
    pub sibling_index: u8,
}

pub struct ExecuteScriptEvent {
    pub timestamp: SystemTime,
    pub wallet_id: WalletID,
    pub script_input: CryptoHash,
    pub cost: i64,
    /// `None` when the script exited normally.
    pub trap: Option<String>,
}

pub struct CommitSectorUpdateEvent {
    pub timestamp: SystemTime,
    pub wallet_id: WalletID,
    pub counter: u32,
    pub repair_needed: bool,
}

pub struct DropSectorUpdateEvent {
    pub timestamp: SystemTime,
    pub wallet_id: WalletID,
    /// The expired update followed by the descendants dropped with it.
    pub counters: Vec<u32>,
}

pub struct NewSignedUpdateEvent {
    pub timestamp: SystemTime,
    pub height: u32,
    pub sibling_index: u8,
}

pub struct ReceiveSignedUpdateEvent {
    pub timestamp: SystemTime,
    pub height: u32,
    pub signatories: Vec<u8>,
}

pub struct RejectSignedUpdateEvent {
    pub timestamp: SystemTime,
    pub height: u32,
    pub reason: String,
}

pub struct StartRepairEvent {
    pub timestamp: SystemTime,
    pub wallet_id: WalletID,
}

pub struct EndRepairEvent {
    pub timestamp: SystemTime,
    pub wallet_id: WalletID,
    pub success: bool,
}
